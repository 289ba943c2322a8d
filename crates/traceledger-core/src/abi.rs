//! Contract ABIs, decoded action values, and the resolver seam.
//!
//! An [`AbiDef`] describes how a contract lays out its action payloads.
//! The pipeline never owns ABIs: it asks an [`AbiResolver`] for the
//! contract's *current* ABI each time it decodes an action.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::DecodeError;
use crate::name::{Asset, Name, Symbol};

/// Maximum typedef chain followed when resolving an alias.
const MAX_ALIAS_DEPTH: usize = 8;

// ─── ABI definition ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: Name,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A contract ABI in the JSON shape published on chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

impl AbiDef {
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(json).map_err(|e| DecodeError::AbiParse(e.to_string()))
    }

    /// The struct type carried by `action`, if the ABI declares it.
    pub fn action_type(&self, action: Name) -> Option<&str> {
        self.actions
            .iter()
            .find(|a| a.name == action)
            .map(|a| a.ty.as_str())
    }

    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// Follow typedef aliases down to a concrete type name.
    pub fn resolve_type<'a>(&'a self, mut ty: &'a str) -> &'a str {
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.types.iter().find(|t| t.new_type_name == ty) {
                Some(alias) => ty = &alias.ty,
                None => break,
            }
        }
        ty
    }

    /// The standard token contract ABI (`transfer`, `create`, `issue`).
    pub fn token() -> Self {
        fn field(name: &str, ty: &str) -> FieldDef {
            FieldDef {
                name: name.into(),
                ty: ty.into(),
            }
        }
        fn action(name: &'static str) -> ActionDef {
            ActionDef {
                name: Name::from_static(name),
                ty: name.into(),
            }
        }
        Self {
            version: "eosio::abi/1.1".into(),
            types: vec![TypeDef {
                new_type_name: "account_name".into(),
                ty: "name".into(),
            }],
            structs: vec![
                StructDef {
                    name: "transfer".into(),
                    base: String::new(),
                    fields: vec![
                        field("from", "account_name"),
                        field("to", "account_name"),
                        field("quantity", "asset"),
                        field("memo", "string"),
                    ],
                },
                StructDef {
                    name: "create".into(),
                    base: String::new(),
                    fields: vec![field("issuer", "account_name"), field("maximum_supply", "asset")],
                },
                StructDef {
                    name: "issue".into(),
                    base: String::new(),
                    fields: vec![
                        field("to", "account_name"),
                        field("quantity", "asset"),
                        field("memo", "string"),
                    ],
                },
            ],
            actions: vec![action("transfer"), action("create"), action("issue")],
        }
    }
}

// ─── Decoded values ──────────────────────────────────────────────────────────

/// A value decoded from a binary action payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Bool(bool),
    Uint(u64),
    Int(i64),
    Name(Name),
    Symbol(Symbol),
    SymbolCode(String),
    Asset(Asset),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<AbiValue>),
    Optional(Option<Box<AbiValue>>),
    Struct(ActionFields),
}

/// Ordered `(field, value)` pairs of a decoded struct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFields(Vec<(String, AbiValue)>);

impl ActionFields {
    pub fn new(fields: Vec<(String, AbiValue)>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&AbiValue> {
        self.0.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, AbiValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn extend(&mut self, other: ActionFields) {
        self.0.extend(other.0);
    }

    pub(crate) fn push(&mut self, field: String, value: AbiValue) {
        self.0.push((field, value));
    }

    /// Required `name` field.
    pub fn name(&self, field: &str) -> Result<Name, DecodeError> {
        match self.require(field)? {
            AbiValue::Name(n) => Ok(*n),
            _ => Err(DecodeError::TypeMismatch {
                field: field.to_string(),
                expected: "name",
            }),
        }
    }

    /// Required `asset` field.
    pub fn asset(&self, field: &str) -> Result<Asset, DecodeError> {
        match self.require(field)? {
            AbiValue::Asset(a) => Ok(*a),
            _ => Err(DecodeError::TypeMismatch {
                field: field.to_string(),
                expected: "asset",
            }),
        }
    }

    fn require(&self, field: &str) -> Result<&AbiValue, DecodeError> {
        self.get(field).ok_or_else(|| DecodeError::MissingField {
            field: field.to_string(),
        })
    }
}

// ─── Resolver ─────────────────────────────────────────────────────────────────

/// Supplies a contract's current ABI and decodes payloads against it.
///
/// Implementations must be cheap to call from many extraction workers at
/// once. The default `decode` uses the built-in binary decoder.
pub trait AbiResolver: Send + Sync {
    /// Current ABI of `account`, or `None` if the contract has none.
    fn resolve(&self, account: Name) -> Option<Arc<AbiDef>>;

    /// Decode `payload` as the struct the ABI declares for `action`.
    fn decode(
        &self,
        abi: &AbiDef,
        action: Name,
        payload: &[u8],
        deadline: Duration,
    ) -> Result<ActionFields, DecodeError> {
        codec::decode_action(abi, action, payload, deadline)
    }
}

/// Thread-safe in-memory ABI registry keyed by contract account.
#[derive(Clone, Default)]
pub struct MemoryAbiRegistry {
    inner: Arc<RwLock<HashMap<Name, Arc<AbiDef>>>>,
}

impl MemoryAbiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the ABI of `account`. Returns the previous one.
    pub fn set_abi(&self, account: Name, abi: AbiDef) -> Option<Arc<AbiDef>> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account, Arc::new(abi))
    }

    pub fn remove_abi(&self, account: Name) -> Option<Arc<AbiDef>> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&account)
    }

    pub fn load_json(&self, account: Name, json: &str) -> Result<(), DecodeError> {
        self.set_abi(account, AbiDef::from_json(json)?);
        Ok(())
    }

    pub fn load_file(&self, account: Name, path: &Path) -> Result<(), DecodeError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::AbiParse(format!("{}: {e}", path.display())))?;
        self.load_json(account, &json)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AbiResolver for MemoryAbiRegistry {
    fn resolve(&self, account: Name) -> Option<Arc<AbiDef>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&account)
            .cloned()
    }
}
