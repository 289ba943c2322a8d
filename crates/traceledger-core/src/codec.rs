//! Binary action payload codec.
//!
//! Payloads use the chain's native little-endian serialization: fixed-width
//! integers, LEB128 `varuint32` length prefixes, names as `u64`, assets as
//! `i64` amount followed by a packed `u64` symbol.

use std::time::{Duration, Instant};

use crate::abi::{AbiDef, AbiValue, ActionFields};
use crate::error::DecodeError;
use crate::name::{Asset, Name, Symbol};

/// Maximum struct/array nesting accepted while decoding.
pub const MAX_NESTING: usize = 16;

/// Decode `payload` as the struct the ABI declares for `action`.
///
/// Fails with [`DecodeError::DeadlineExceeded`] once decoding has taken
/// longer than `deadline`.
pub fn decode_action(
    abi: &AbiDef,
    action: Name,
    payload: &[u8],
    deadline: Duration,
) -> Result<ActionFields, DecodeError> {
    let ty = abi
        .action_type(action)
        .ok_or_else(|| DecodeError::UnknownAction {
            action: action.to_string(),
        })?;

    let mut decoder = Decoder {
        abi,
        reader: BinaryReader::new(payload),
        started: Instant::now(),
        deadline,
    };
    match decoder.read_value(ty, &action.to_string(), 0)? {
        AbiValue::Struct(fields) => Ok(fields),
        _ => Err(DecodeError::TypeMismatch {
            field: action.to_string(),
            expected: "struct",
        }),
    }
}

struct Decoder<'a> {
    abi: &'a AbiDef,
    reader: BinaryReader<'a>,
    started: Instant,
    deadline: Duration,
}

impl<'a> Decoder<'a> {
    fn check_deadline(&self) -> Result<(), DecodeError> {
        if self.started.elapsed() >= self.deadline {
            return Err(DecodeError::DeadlineExceeded {
                ms: self.deadline.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn read_value(&mut self, ty: &str, field: &str, depth: usize) -> Result<AbiValue, DecodeError> {
        if depth > MAX_NESTING {
            return Err(DecodeError::TooDeep(MAX_NESTING));
        }
        self.check_deadline()?;

        let abi = self.abi;
        let ty = abi.resolve_type(ty);
        if let Some(elem) = ty.strip_suffix("[]") {
            let len = self.reader.read_varuint32()? as usize;
            // every element occupies at least one byte
            if len > self.reader.remaining() {
                return Err(DecodeError::UnexpectedEof {
                    offset: self.reader.position(),
                    needed: len,
                });
            }
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(self.read_value(elem, field, depth + 1)?);
            }
            return Ok(AbiValue::Array(items));
        }
        if let Some(inner) = ty.strip_suffix('?') {
            return match self.reader.read_u8()? {
                0 => Ok(AbiValue::Optional(None)),
                1 => Ok(AbiValue::Optional(Some(Box::new(
                    self.read_value(inner, field, depth + 1)?,
                )))),
                flag => Err(invalid(field, format!("optional flag {flag}"))),
            };
        }

        let r = &mut self.reader;
        let value = match ty {
            "bool" => match r.read_u8()? {
                0 => AbiValue::Bool(false),
                1 => AbiValue::Bool(true),
                b => return Err(invalid(field, format!("bool byte {b}"))),
            },
            "uint8" => AbiValue::Uint(r.read_u8()? as u64),
            "uint16" => AbiValue::Uint(r.read_u16()? as u64),
            "uint32" => AbiValue::Uint(r.read_u32()? as u64),
            "uint64" => AbiValue::Uint(r.read_u64()?),
            "varuint32" => AbiValue::Uint(r.read_varuint32()? as u64),
            "int8" => AbiValue::Int(r.read_u8()? as i8 as i64),
            "int16" => AbiValue::Int(r.read_u16()? as i16 as i64),
            "int32" => AbiValue::Int(r.read_u32()? as i32 as i64),
            "int64" => AbiValue::Int(r.read_i64()?),
            "time_point" => AbiValue::Int(r.read_i64()?),
            "time_point_sec" => AbiValue::Uint(r.read_u32()? as u64),
            "name" => AbiValue::Name(r.read_name()?),
            "string" => AbiValue::String(r.read_string(field)?),
            "bytes" => AbiValue::Bytes(r.read_bytes()?.to_vec()),
            "checksum256" => AbiValue::Bytes(r.take(32)?.to_vec()),
            "symbol" => AbiValue::Symbol(r.read_symbol(field)?),
            "symbol_code" => {
                let raw = r.read_u64()?;
                let sym = Symbol::from_raw(raw << 8).map_err(|e| invalid(field, e.to_string()))?;
                AbiValue::SymbolCode(sym.code())
            }
            "asset" => AbiValue::Asset(r.read_asset(field)?),
            other => return self.read_struct(other, depth),
        };
        Ok(value)
    }

    fn read_struct(&mut self, ty: &str, depth: usize) -> Result<AbiValue, DecodeError> {
        let abi = self.abi;
        let def = abi
            .struct_def(ty)
            .ok_or_else(|| DecodeError::UnknownType(ty.to_string()))?;

        let mut fields = ActionFields::default();
        if !def.base.is_empty() {
            match self.read_value(&def.base, &def.name, depth + 1)? {
                AbiValue::Struct(base) => fields.extend(base),
                _ => {
                    return Err(DecodeError::TypeMismatch {
                        field: def.base.clone(),
                        expected: "struct",
                    })
                }
            }
        }
        for f in &def.fields {
            let value = self.read_value(&f.ty, &f.name, depth + 1)?;
            fields.push(f.name.clone(), value);
        }
        Ok(AbiValue::Struct(fields))
    }
}

fn invalid(field: &str, reason: String) -> DecodeError {
    DecodeError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}

// ─── Reader ───────────────────────────────────────────────────────────────────

/// Cursor over a little-endian payload.
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: n,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.array().map(i64::from_le_bytes)
    }

    pub fn read_varuint32(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        let mut value: u64 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return u32::try_from(value).map_err(|_| {
                    invalid("varuint32", format!("value overflows at offset {start}"))
                });
            }
        }
        Err(invalid("varuint32", format!("encoding too long at offset {start}")))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varuint32()? as usize;
        self.take(len)
    }

    pub fn read_string(&mut self, field: &str) -> Result<String, DecodeError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| invalid(field, e.to_string()))
    }

    pub fn read_name(&mut self) -> Result<Name, DecodeError> {
        self.read_u64().map(Name::from_u64)
    }

    pub fn read_symbol(&mut self, field: &str) -> Result<Symbol, DecodeError> {
        let raw = self.read_u64()?;
        Symbol::from_raw(raw).map_err(|e| invalid(field, e.to_string()))
    }

    pub fn read_asset(&mut self, field: &str) -> Result<Asset, DecodeError> {
        let amount = self.read_i64()?;
        let symbol = self.read_symbol(field)?;
        let asset = Asset::new(amount, symbol);
        if !asset.is_amount_within_range() {
            return Err(invalid(field, format!("amount {amount} out of range")));
        }
        Ok(asset)
    }
}

// ─── Writer ───────────────────────────────────────────────────────────────────

/// Builds payloads in the same encoding the decoder reads.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn varuint32(&mut self, mut v: u32) -> &mut Self {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return self;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn name(&mut self, n: Name) -> &mut Self {
        self.u64(n.as_u64())
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.varuint32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn asset(&mut self, a: &Asset) -> &mut Self {
        self.i64(a.amount).u64(a.symbol.raw())
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Encode a token `transfer` payload.
pub fn encode_transfer(from: Name, to: Name, quantity: &Asset, memo: &str) -> Vec<u8> {
    PayloadWriter::new()
        .name(from)
        .name(to)
        .asset(quantity)
        .string(memo)
        .finish()
}

/// Encode a token `create` payload.
pub fn encode_create(issuer: Name, maximum_supply: &Asset) -> Vec<u8> {
    PayloadWriter::new().name(issuer).asset(maximum_supply).finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{FieldDef, StructDef, TypeDef};
    use crate::name::MAX_AMOUNT;

    const DEADLINE: Duration = Duration::from_secs(1);

    fn n(s: &'static str) -> Name {
        Name::from_static(s)
    }

    #[test]
    fn decodes_token_transfer() {
        let qty: Asset = "10.0000 TOK".parse().unwrap();
        let payload = encode_transfer(n("alice"), n("bob"), &qty, "rent");

        let fields = decode_action(&AbiDef::token(), n("transfer"), &payload, DEADLINE).unwrap();
        assert_eq!(fields.name("from").unwrap(), n("alice"));
        assert_eq!(fields.name("to").unwrap(), n("bob"));
        assert_eq!(fields.asset("quantity").unwrap(), qty);
        assert_eq!(fields.get("memo"), Some(&AbiValue::String("rent".into())));
    }

    #[test]
    fn truncated_payload_fails() {
        let qty: Asset = "1.0000 TOK".parse().unwrap();
        let mut payload = encode_transfer(n("alice"), n("bob"), &qty, "");
        payload.truncate(20);
        let err = decode_action(&AbiDef::token(), n("transfer"), &payload, DEADLINE).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { offset: 16, needed: 8 }));
    }

    #[test]
    fn unknown_action_and_type() {
        let err = decode_action(&AbiDef::token(), n("retire"), &[], DEADLINE).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownAction { .. }));

        let mut abi = AbiDef::token();
        abi.structs[0].fields[3].ty = "memo_t".into();
        let qty: Asset = "1.0000 TOK".parse().unwrap();
        let payload = encode_transfer(n("alice"), n("bob"), &qty, "");
        let err = decode_action(&abi, n("transfer"), &payload, DEADLINE).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType("memo_t".into()));
    }

    #[test]
    fn zero_deadline_is_exceeded() {
        let qty: Asset = "1.0000 TOK".parse().unwrap();
        let payload = encode_transfer(n("alice"), n("bob"), &qty, "");
        let err =
            decode_action(&AbiDef::token(), n("transfer"), &payload, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DecodeError::DeadlineExceeded { ms: 0 }));
    }

    #[test]
    fn invalid_symbol_is_rejected() {
        let payload = PayloadWriter::new()
            .name(n("alice"))
            .name(n("bob"))
            .i64(5)
            .u64(4 | (b'x' as u64) << 8) // lowercase symbol code
            .string("")
            .finish();
        let err = decode_action(&AbiDef::token(), n("transfer"), &payload, DEADLINE).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { ref field, .. } if field == "quantity"));
    }

    #[test]
    fn out_of_range_amount_is_rejected() {
        let tok = Symbol::new(4, "TOK").unwrap();
        for amount in [i64::MIN, i64::MAX, MAX_AMOUNT + 1, -MAX_AMOUNT - 1] {
            let payload = encode_transfer(n("alice"), n("bob"), &Asset::new(amount, tok), "");
            let err =
                decode_action(&AbiDef::token(), n("transfer"), &payload, DEADLINE).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidValue { ref field, .. } if field == "quantity"),
                "amount {amount}: {err:?}"
            );
        }
        let payload = encode_transfer(n("alice"), n("bob"), &Asset::new(-MAX_AMOUNT, tok), "");
        let fields = decode_action(&AbiDef::token(), n("transfer"), &payload, DEADLINE).unwrap();
        assert_eq!(fields.asset("quantity").unwrap().amount, -MAX_AMOUNT);
    }

    #[test]
    fn arrays_optionals_and_base_structs() {
        let abi = AbiDef {
            version: String::new(),
            types: vec![TypeDef {
                new_type_name: "account_name".into(),
                ty: "name".into(),
            }],
            structs: vec![
                StructDef {
                    name: "header".into(),
                    base: String::new(),
                    fields: vec![FieldDef {
                        name: "owner".into(),
                        ty: "account_name".into(),
                    }],
                },
                StructDef {
                    name: "batch".into(),
                    base: "header".into(),
                    fields: vec![
                        FieldDef {
                            name: "targets".into(),
                            ty: "name[]".into(),
                        },
                        FieldDef {
                            name: "note".into(),
                            ty: "string?".into(),
                        },
                    ],
                },
            ],
            actions: vec![crate::abi::ActionDef {
                name: n("batch"),
                ty: "batch".into(),
            }],
        };
        let payload = PayloadWriter::new()
            .name(n("carol"))
            .varuint32(2)
            .name(n("alice"))
            .name(n("bob"))
            .u8(0)
            .finish();

        let fields = decode_action(&abi, n("batch"), &payload, DEADLINE).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.name("owner").unwrap(), n("carol"));
        assert_eq!(
            fields.get("targets"),
            Some(&AbiValue::Array(vec![AbiValue::Name(n("alice")), AbiValue::Name(n("bob"))]))
        );
        assert_eq!(fields.get("note"), Some(&AbiValue::Optional(None)));
    }

    #[test]
    fn varuint32_roundtrip_and_overflow() {
        for v in [0u32, 1, 127, 128, 300, u32::MAX] {
            let bytes = PayloadWriter::new().varuint32(v).finish();
            assert_eq!(BinaryReader::new(&bytes).read_varuint32().unwrap(), v);
        }
        let too_long = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(BinaryReader::new(&too_long).read_varuint32().is_err());
    }

    #[test]
    fn oversized_array_length_fails_fast() {
        let abi = AbiDef {
            structs: vec![StructDef {
                name: "many".into(),
                base: String::new(),
                fields: vec![FieldDef {
                    name: "items".into(),
                    ty: "uint64[]".into(),
                }],
            }],
            actions: vec![crate::abi::ActionDef {
                name: n("many"),
                ty: "many".into(),
            }],
            ..Default::default()
        };
        let payload = PayloadWriter::new().varuint32(1_000_000).finish();
        let err = decode_action(&abi, n("many"), &payload, DEADLINE).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { .. }));
    }
}
