//! Chain primitives: 64-bit names, token symbols and assets.
//!
//! Names pack up to 13 characters of the alphabet `.12345a-z` into a `u64`
//! (5 bits per character, 4 bits for the 13th). Symbols pack a precision
//! byte and up to 7 uppercase letters. Assets pair a scaled `i64` amount
//! with a symbol and print as `"10.0000 TOK"`.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AssetError, NameError};

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Highest precision an asset may carry (`10^18` still fits in a `u64`).
pub const MAX_PRECISION: u8 = 18;

/// Largest magnitude an asset amount may have, `2^62 - 1`. Sums and
/// negations of in-range amounts cannot overflow an `i64`.
pub const MAX_AMOUNT: i64 = (1 << 62) - 1;

const fn char_to_symbol(c: u8) -> u64 {
    match c {
        b'a'..=b'z' => (c - b'a') as u64 + 6,
        b'1'..=b'5' => (c - b'1') as u64 + 1,
        _ => 0,
    }
}

// ─── Name ─────────────────────────────────────────────────────────────────────

/// An account, action or permission name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(u64);

impl Name {
    /// Encode a name at compile time. Characters outside the alphabet encode
    /// as `.`; use [`str::parse`] when the input is untrusted.
    pub const fn from_static(s: &str) -> Self {
        let bytes = s.as_bytes();
        let mut value = 0u64;
        let mut i = 0;
        while i < bytes.len() && i < 13 {
            let sym = char_to_symbol(bytes[i]);
            if i < 12 {
                value |= (sym & 0x1f) << (64 - 5 * (i + 1));
            } else {
                value |= sym & 0x0f;
            }
            i += 1;
        }
        Name(value)
    }

    pub const fn from_u64(value: u64) -> Self {
        Name(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 13 {
            return Err(NameError::TooLong(s.to_string()));
        }
        for (i, ch) in s.chars().enumerate() {
            let valid = ch == '.' || ('1'..='5').contains(&ch) || ch.is_ascii_lowercase();
            if !valid {
                return Err(NameError::InvalidChar {
                    name: s.to_string(),
                    ch,
                });
            }
            if i == 12 && char_to_symbol(ch as u8) > 0x0f {
                return Err(NameError::InvalidLastChar(s.to_string()));
            }
        }
        Ok(Name::from_static(s))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
            out[12 - i] = CHARMAP[(tmp & mask) as usize];
            tmp >>= shift;
        }
        let end = out.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
        // CHARMAP is pure ASCII
        f.write_str(std::str::from_utf8(&out[..end]).map_err(|_| fmt::Error)?)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ─── Symbol ───────────────────────────────────────────────────────────────────

/// A token symbol: precision plus a 1-7 letter uppercase code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u64);

impl Symbol {
    pub fn new(precision: u8, code: &str) -> Result<Self, AssetError> {
        if precision > MAX_PRECISION {
            return Err(AssetError::PrecisionTooLarge(precision));
        }
        if code.is_empty() || code.len() > 7 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(AssetError::InvalidSymbolCode(code.to_string()));
        }
        let mut raw = precision as u64;
        for (i, b) in code.bytes().enumerate() {
            raw |= (b as u64) << (8 * (i + 1));
        }
        Ok(Symbol(raw))
    }

    /// Validate a packed symbol as read from a binary payload.
    pub fn from_raw(raw: u64) -> Result<Self, AssetError> {
        let precision = (raw & 0xff) as u8;
        if precision > MAX_PRECISION {
            return Err(AssetError::PrecisionTooLarge(precision));
        }
        let code = Self::code_of(raw);
        Symbol::new(precision, &code)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn precision(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub fn code(&self) -> String {
        Self::code_of(self.0)
    }

    fn code_of(raw: u64) -> String {
        (1..8)
            .map(|i| ((raw >> (8 * i)) & 0xff) as u8)
            .take_while(|&b| b != 0)
            .map(char::from)
            .collect()
    }
}

impl FromStr for Symbol {
    type Err = AssetError;

    /// Parses `"4,TOK"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| AssetError::Malformed(s.to_string()))?;
        let precision: u8 = precision
            .trim()
            .parse()
            .map_err(|_| AssetError::Malformed(s.to_string()))?;
        Symbol::new(precision, code.trim())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision(), self.code())
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ─── Asset ────────────────────────────────────────────────────────────────────

/// A token quantity. `amount` is scaled by `10^precision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl Asset {
    pub fn new(amount: i64, symbol: Symbol) -> Self {
        Self { amount, symbol }
    }

    pub fn precision(&self) -> u8 {
        self.symbol.precision()
    }

    pub fn is_amount_within_range(&self) -> bool {
        (-MAX_AMOUNT..=MAX_AMOUNT).contains(&self.amount)
    }
}

impl FromStr for Asset {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AssetError::Malformed(s.to_string());
        let (number, code) = s.trim().split_once(' ').ok_or_else(malformed)?;
        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
            || (digits.contains('.') && frac_part.is_empty())
        {
            return Err(malformed());
        }
        let precision =
            u8::try_from(frac_part.len()).map_err(|_| AssetError::PrecisionTooLarge(u8::MAX))?;
        let symbol = Symbol::new(precision, code.trim())?;
        let magnitude: i64 = format!("{int_part}{frac_part}")
            .parse()
            .map_err(|_| AssetError::Overflow(s.to_string()))?;
        if magnitude > MAX_AMOUNT {
            return Err(AssetError::Overflow(s.to_string()));
        }
        let amount = if negative { -magnitude } else { magnitude };
        Ok(Asset { amount, symbol })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.precision() as u32;
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        let code = self.symbol.code();
        if precision == 0 {
            return write!(f, "{sign}{abs} {code}");
        }
        let scale = 10u64.pow(precision);
        write!(
            f,
            "{sign}{}.{:0width$} {code}",
            abs / scale,
            abs % scale,
            width = precision as usize
        )
    }
}

impl Serialize for Asset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
