//! SQL rendering for extracted rows.
//!
//! Statements use the `ON CONFLICT` dialect understood by both Postgres and
//! SQLite. Ledger and authorization rows are rendered as value fragments and
//! combined into one multi-row insert by a [`Batcher`](crate::batch::Batcher);
//! balance deltas and token registrations are rendered as whole statements.

use chrono::{DateTime, Utc};

use crate::types::{AuthorizationRow, LedgerEntry, TokenBalanceDelta, TokenRegistration};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Turns one row into a `( ... )` value fragment and a set of fragments
/// into a complete statement.
pub trait RowRenderer: Send + Sync + 'static {
    type Row: Send;

    /// Render the `(v1, v2, ...)` fragment for one row.
    fn values(&self, row: &Self::Row) -> String;

    /// Combine buffered fragments into one statement. `values` is never empty.
    fn statement(&self, values: &[String]) -> String;
}

/// Single-quoted SQL string literal.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn time_literal(t: &DateTime<Utc>) -> String {
    quote(&t.format(TIME_FORMAT).to_string())
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Renders the `ledger` table. Re-delivered actions are ignored by `action_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerRows;

impl RowRenderer for LedgerRows {
    type Row = LedgerEntry;

    fn values(&self, e: &LedgerEntry) -> String {
        format!(
            "({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            e.action_id,
            quote(&e.transaction_id),
            e.block_number,
            time_literal(&e.block_time),
            quote(&e.contract_owner.to_string()),
            quote(&e.from_account.to_string()),
            quote(&e.to_account.to_string()),
            e.amount(),
            e.precision(),
            quote(&e.symbol()),
            quote(&e.receiver.to_string()),
            quote(&e.action_name.to_string()),
            time_literal(&e.created_at),
        )
    }

    fn statement(&self, values: &[String]) -> String {
        format!(
            "INSERT INTO ledger (action_id, transaction_id, block_number, timestamp, \
             contract_owner, from_account, to_account, amount, precision, symbol, \
             receiver, action_name, created_at) VALUES {} ON CONFLICT (action_id) DO NOTHING",
            values.join(", ")
        )
    }
}

// ─── Authorizations ──────────────────────────────────────────────────────────

/// Renders the `actions_accounts` provenance table (plain insert).
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationRows;

impl RowRenderer for AuthorizationRows {
    type Row = AuthorizationRow;

    fn values(&self, r: &AuthorizationRow) -> String {
        format!(
            "({}, {}, {})",
            r.action_id,
            quote(&r.actor.to_string()),
            quote(&r.permission.to_string())
        )
    }

    fn statement(&self, values: &[String]) -> String {
        format!(
            "INSERT INTO actions_accounts (action_id, actor, permission) VALUES {}",
            values.join(", ")
        )
    }
}

// ─── Single statements ───────────────────────────────────────────────────────

/// Upsert-add of one balance change into `tokens`.
pub fn balance_delta_statement(d: &TokenBalanceDelta) -> String {
    format!(
        "INSERT INTO tokens (account, symbol, precision, contract_owner, amount) \
         VALUES ({}, {}, {}, {}, {}) \
         ON CONFLICT (account, symbol) DO UPDATE SET amount = tokens.amount + excluded.amount",
        quote(&d.account.to_string()),
        quote(&d.symbol.code()),
        d.precision(),
        quote(&d.contract_owner.to_string()),
        d.amount,
    )
}

/// Insert-ignore of a created token into `tokenlist`.
pub fn token_registration_statement(r: &TokenRegistration) -> String {
    format!(
        "INSERT INTO tokenlist (contract_owner, symbol, precision, maximum_supply) \
         VALUES ({}, {}, {}, {}) ON CONFLICT (contract_owner, symbol) DO NOTHING",
        quote(&r.contract_owner.to_string()),
        quote(&r.maximum_supply.symbol.code()),
        r.maximum_supply.precision(),
        r.maximum_supply.amount,
    )
}
