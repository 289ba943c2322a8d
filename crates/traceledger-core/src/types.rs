//! Trace input types and the row types extraction produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::name::{Asset, Name, Symbol};

// ─── Trace input ─────────────────────────────────────────────────────────────

/// One authorization entry on an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    pub fn new(actor: Name, permission: Name) -> Self {
        Self { actor, permission }
    }
}

/// A single executed action and the inline actions it spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTrace {
    /// Account whose code handled this (possibly notification) execution.
    pub receiver: Name,
    /// Contract that defines the action.
    pub account: Name,
    /// Action name, e.g. `transfer`.
    pub name: Name,
    /// ABI-encoded action payload.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub authorization: Vec<PermissionLevel>,
    /// Chain-wide, monotonically increasing action id.
    pub global_sequence: u64,
    #[serde(default)]
    pub inline_traces: Vec<ActionTrace>,
}

/// All actions executed by one applied transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTrace {
    /// Transaction id (hex).
    pub id: String,
    #[serde(rename = "block_num")]
    pub block_number: u64,
    pub block_time: DateTime<Utc>,
    #[serde(default)]
    pub action_traces: Vec<ActionTrace>,
}

impl TransactionTrace {
    /// Total number of actions in the trace, inline actions included.
    pub fn action_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&ActionTrace> = self.action_traces.iter().collect();
        while let Some(action) = stack.pop() {
            count += 1;
            stack.extend(action.inline_traces.iter());
        }
        count
    }
}

// ─── Extracted rows ───────────────────────────────────────────────────────────

/// One row of the `ledger` table. Produced for emitted transfers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub action_id: u64,
    pub transaction_id: String,
    pub block_number: u64,
    pub block_time: DateTime<Utc>,
    pub contract_owner: Name,
    pub from_account: Name,
    pub to_account: Name,
    pub quantity: Asset,
    pub receiver: Name,
    pub action_name: Name,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Scaled integer amount.
    pub fn amount(&self) -> i64 {
        self.quantity.amount
    }

    pub fn precision(&self) -> u8 {
        self.quantity.precision()
    }

    pub fn symbol(&self) -> String {
        self.quantity.symbol.code()
    }
}

/// A signed change to one account's balance of one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceDelta {
    pub account: Name,
    pub symbol: Symbol,
    pub amount: i64,
    pub contract_owner: Name,
}

impl TokenBalanceDelta {
    pub fn precision(&self) -> u8 {
        self.symbol.precision()
    }
}

/// Provenance row: one per authorization entry of a processed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRow {
    pub action_id: u64,
    pub actor: Name,
    pub permission: Name,
}

/// Registration of a token created by a `create` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRegistration {
    pub contract_owner: Name,
    pub maximum_supply: Asset,
}

// ─── Hex payload serde ───────────────────────────────────────────────────────

/// Serializes `Vec<u8>` as a lowercase hex string (optional `0x` prefix on input).
mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(de::Error::custom)
    }
}
