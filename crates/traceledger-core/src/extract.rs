//! Economic event extraction from transaction traces.
//!
//! The [`Extractor`] walks the action tree of one trace depth first, decodes
//! `transfer` and `create` actions against the acting contract's current ABI
//! and turns them into ledger rows, balance deltas, token registrations and
//! authorization rows. Nothing here touches storage; the result is a
//! [`TraceOutcome`] the caller renders and submits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::abi::{AbiResolver, ActionFields};
use crate::error::DecodeError;
use crate::name::{Asset, Name};
use crate::types::{
    ActionTrace, AuthorizationRow, LedgerEntry, TokenBalanceDelta, TokenRegistration,
    TransactionTrace,
};

pub const TRANSFER: Name = Name::from_static("transfer");
pub const CREATE: Name = Name::from_static("create");

/// Why a node of the action tree was not processed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nested deeper than the configured bound.
    DepthExceeded,
    /// Its `global_sequence` was already visited in this trace.
    DuplicateSequence,
}

/// What extraction did with one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Not a `transfer` or `create`.
    Ignored,
    /// Decoded and emitted rows.
    Decoded,
    /// A transfer observed on a notification (`from != receiver`); only its
    /// authorization rows are emitted.
    Suppressed,
    /// Decoding failed; only its authorization rows are emitted.
    Dropped(DecodeError),
    Skipped(SkipReason),
}

/// Everything extracted from one trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceOutcome {
    pub ledger: Vec<LedgerEntry>,
    pub deltas: Vec<TokenBalanceDelta>,
    pub registrations: Vec<TokenRegistration>,
    pub authorizations: Vec<AuthorizationRow>,
    /// `(global_sequence, outcome)` in traversal order.
    pub actions: Vec<(u64, ActionOutcome)>,
}

impl TraceOutcome {
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
            && self.deltas.is_empty()
            && self.registrations.is_empty()
            && self.authorizations.is_empty()
    }

    pub fn decoded(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Decoded))
    }

    pub fn dropped(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Dropped(_)))
    }

    pub fn suppressed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Suppressed))
    }

    fn count(&self, f: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.actions.iter().filter(|(_, o)| f(o)).count()
    }
}

pub struct Extractor {
    resolver: Arc<dyn AbiResolver>,
    max_depth: usize,
    decode_deadline: Duration,
}

impl Extractor {
    pub fn new(resolver: Arc<dyn AbiResolver>) -> Self {
        Self {
            resolver,
            max_depth: 32,
            decode_deadline: Duration::from_millis(1_000),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_decode_deadline(mut self, deadline: Duration) -> Self {
        self.decode_deadline = deadline;
        self
    }

    /// Extract all rows from one trace. Traces of block 0 yield nothing.
    pub fn extract(&self, trace: &TransactionTrace) -> TraceOutcome {
        let mut out = TraceOutcome::default();
        if trace.block_number == 0 {
            return out;
        }
        let created_at = Utc::now();
        let mut seen = HashSet::new();

        // reversed so siblings pop in order
        let mut stack: Vec<(&ActionTrace, usize)> =
            trace.action_traces.iter().rev().map(|a| (a, 0)).collect();
        while let Some((action, depth)) = stack.pop() {
            if depth >= self.max_depth {
                warn!(
                    tx = %trace.id,
                    action_id = action.global_sequence,
                    depth,
                    "action nested too deep, skipping subtree"
                );
                out.actions.push((
                    action.global_sequence,
                    ActionOutcome::Skipped(SkipReason::DepthExceeded),
                ));
                continue;
            }
            if !seen.insert(action.global_sequence) {
                warn!(
                    tx = %trace.id,
                    action_id = action.global_sequence,
                    "repeated action id in trace, skipping subtree"
                );
                out.actions.push((
                    action.global_sequence,
                    ActionOutcome::Skipped(SkipReason::DuplicateSequence),
                ));
                continue;
            }
            stack.extend(action.inline_traces.iter().rev().map(|c| (c, depth + 1)));

            let outcome = self.process(trace, action, created_at, &mut out);
            out.actions.push((action.global_sequence, outcome));
        }
        out
    }

    fn process(
        &self,
        trace: &TransactionTrace,
        action: &ActionTrace,
        created_at: DateTime<Utc>,
        out: &mut TraceOutcome,
    ) -> ActionOutcome {
        if action.name != TRANSFER && action.name != CREATE {
            return ActionOutcome::Ignored;
        }
        out.authorizations
            .extend(action.authorization.iter().map(|auth| AuthorizationRow {
                action_id: action.global_sequence,
                actor: auth.actor,
                permission: auth.permission,
            }));

        let result = self.decode(action).and_then(|fields| {
            if action.name == TRANSFER {
                transfer(trace, action, &fields, created_at, out)
            } else {
                create(action, &fields, out)
            }
        });
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(
                    tx = %trace.id,
                    action_id = action.global_sequence,
                    contract = %action.account,
                    action = %action.name,
                    error = %e,
                    "dropping undecodable action"
                );
                ActionOutcome::Dropped(e)
            }
        }
    }

    fn decode(&self, action: &ActionTrace) -> Result<ActionFields, DecodeError> {
        let abi = self
            .resolver
            .resolve(action.account)
            .ok_or_else(|| DecodeError::AbiNotFound {
                account: action.account.to_string(),
            })?;
        self.resolver
            .decode(&abi, action.name, &action.data, self.decode_deadline)
    }
}

fn transfer(
    trace: &TransactionTrace,
    action: &ActionTrace,
    fields: &ActionFields,
    created_at: DateTime<Utc>,
    out: &mut TraceOutcome,
) -> Result<ActionOutcome, DecodeError> {
    let from = fields.name("from")?;
    let to = fields.name("to")?;
    let quantity = fields.asset("quantity")?;
    let debit = in_range(&quantity, "quantity")?;

    // every party to a transfer is notified; book it once, from the sender's receipt
    if from != action.receiver {
        return Ok(ActionOutcome::Suppressed);
    }

    out.ledger.push(LedgerEntry {
        action_id: action.global_sequence,
        transaction_id: trace.id.clone(),
        block_number: trace.block_number,
        block_time: trace.block_time,
        contract_owner: action.account,
        from_account: from,
        to_account: to,
        quantity,
        receiver: action.receiver,
        action_name: action.name,
        created_at,
    });
    out.deltas.push(TokenBalanceDelta {
        account: from,
        symbol: quantity.symbol,
        amount: debit,
        contract_owner: action.account,
    });
    out.deltas.push(TokenBalanceDelta {
        account: to,
        symbol: quantity.symbol,
        amount: quantity.amount,
        contract_owner: action.account,
    });
    Ok(ActionOutcome::Decoded)
}

fn create(
    action: &ActionTrace,
    fields: &ActionFields,
    out: &mut TraceOutcome,
) -> Result<ActionOutcome, DecodeError> {
    let issuer = fields.name("issuer")?;
    let maximum_supply = fields.asset("maximum_supply")?;
    in_range(&maximum_supply, "maximum_supply")?;

    out.registrations.push(TokenRegistration {
        contract_owner: action.account,
        maximum_supply,
    });
    out.deltas.push(TokenBalanceDelta {
        account: issuer,
        symbol: maximum_supply.symbol,
        amount: maximum_supply.amount,
        contract_owner: action.account,
    });
    Ok(ActionOutcome::Decoded)
}

/// Checks the amount against the asset range and returns its negation.
fn in_range(asset: &Asset, field: &str) -> Result<i64, DecodeError> {
    asset
        .amount
        .checked_neg()
        .filter(|_| asset.is_amount_within_range())
        .ok_or_else(|| DecodeError::InvalidValue {
            field: field.to_string(),
            reason: format!("amount {} out of range", asset.amount),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiDef, MemoryAbiRegistry};
    use crate::codec::{encode_create, encode_transfer};
    use crate::types::PermissionLevel;
    use chrono::TimeZone;

    fn n(s: &'static str) -> Name {
        Name::from_static(s)
    }

    fn extractor() -> Extractor {
        let registry = MemoryAbiRegistry::new();
        registry.set_abi(n("eosio.token"), AbiDef::token());
        Extractor::new(Arc::new(registry))
    }

    fn transfer_action(
        seq: u64,
        receiver: &'static str,
        from: &'static str,
        to: &'static str,
    ) -> ActionTrace {
        let qty: Asset = "10.0000 TOK".parse().unwrap();
        transfer_of(seq, receiver, from, to, qty)
    }

    fn transfer_of(
        seq: u64,
        receiver: &'static str,
        from: &'static str,
        to: &'static str,
        qty: Asset,
    ) -> ActionTrace {
        ActionTrace {
            receiver: n(receiver),
            account: n("eosio.token"),
            name: TRANSFER,
            data: encode_transfer(n(from), n(to), &qty, "memo"),
            authorization: vec![PermissionLevel::new(n(from), n("active"))],
            global_sequence: seq,
            inline_traces: vec![],
        }
    }

    fn trace(block_number: u64, actions: Vec<ActionTrace>) -> TransactionTrace {
        TransactionTrace {
            id: "tx1".into(),
            block_number,
            block_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            action_traces: actions,
        }
    }

    #[test]
    fn transfer_emits_ledger_row_and_balanced_deltas() {
        let action = transfer_action(1, "alice", "alice", "bob");
        let out = extractor().extract(&trace(100, vec![action]));
        assert_eq!(out.ledger.len(), 1);
        let row = &out.ledger[0];
        assert_eq!(row.amount(), 100_000);
        assert_eq!(row.precision(), 4);
        assert_eq!(row.symbol(), "TOK");
        assert_eq!(row.block_number, 100);

        assert_eq!(out.deltas.len(), 2);
        assert_eq!(out.deltas.iter().map(|d| d.amount).sum::<i64>(), 0);
        assert_eq!(out.deltas[0].account, n("alice"));
        assert_eq!(out.deltas[0].amount, -100_000);
        assert_eq!(out.deltas[1].account, n("bob"));

        assert_eq!(out.authorizations.len(), 1);
        assert_eq!(out.actions, vec![(1, ActionOutcome::Decoded)]);
    }

    #[test]
    fn notification_receipts_are_suppressed() {
        let mut root = transfer_action(1, "alice", "alice", "bob");
        root.inline_traces.push(transfer_action(2, "bob", "alice", "bob"));
        let out = extractor().extract(&trace(100, vec![root]));
        assert_eq!(out.ledger.len(), 1);
        assert_eq!(out.deltas.len(), 2);
        // authorizations are kept for both receipts
        assert_eq!(out.authorizations.len(), 2);
        assert_eq!(out.actions[1], (2, ActionOutcome::Suppressed));
    }

    #[test]
    fn block_zero_yields_nothing() {
        let out = extractor().extract(&trace(0, vec![transfer_action(1, "alice", "alice", "bob")]));
        assert!(out.is_empty());
        assert!(out.actions.is_empty());
    }

    #[test]
    fn undecodable_action_keeps_authorization_rows() {
        let mut bad = transfer_action(1, "alice", "alice", "bob");
        bad.data.truncate(10);
        let good = transfer_action(2, "carol", "carol", "dave");
        let out = extractor().extract(&trace(100, vec![bad, good]));
        assert_eq!(out.ledger.len(), 1);
        assert_eq!(out.ledger[0].action_id, 2);
        assert_eq!(out.authorizations.len(), 2);
        assert!(matches!(
            out.actions[0],
            (1, ActionOutcome::Dropped(DecodeError::UnexpectedEof { .. }))
        ));
        assert_eq!(out.dropped(), 1);
        assert_eq!(out.decoded(), 1);
    }

    #[test]
    fn missing_abi_drops_action() {
        let mut action = transfer_action(1, "alice", "alice", "bob");
        action.account = n("fake.token");
        let out = extractor().extract(&trace(100, vec![action]));
        assert!(out.ledger.is_empty());
        assert!(matches!(
            out.actions[0].1,
            ActionOutcome::Dropped(DecodeError::AbiNotFound { .. })
        ));
    }

    #[test]
    fn zero_deadline_drops_action() {
        let out = extractor()
            .with_decode_deadline(Duration::ZERO)
            .extract(&trace(100, vec![transfer_action(1, "alice", "alice", "bob")]));
        assert!(out.ledger.is_empty());
        assert_eq!(out.authorizations.len(), 1);
        assert!(matches!(
            out.actions[0].1,
            ActionOutcome::Dropped(DecodeError::DeadlineExceeded { .. })
        ));
    }

    #[test]
    fn create_registers_token_and_credits_issuer() {
        let supply: Asset = "1000000.0000 TOK".parse().unwrap();
        let action = ActionTrace {
            receiver: n("eosio.token"),
            account: n("eosio.token"),
            name: CREATE,
            data: encode_create(n("issuer"), &supply),
            authorization: vec![PermissionLevel::new(n("eosio.token"), n("active"))],
            global_sequence: 9,
            inline_traces: vec![],
        };
        let out = extractor().extract(&trace(100, vec![action]));
        assert!(out.ledger.is_empty());
        assert_eq!(out.registrations.len(), 1);
        assert_eq!(out.registrations[0].maximum_supply, supply);
        assert_eq!(out.deltas.len(), 1);
        assert_eq!(out.deltas[0].account, n("issuer"));
        assert_eq!(out.deltas[0].amount, supply.amount);
    }

    #[test]
    fn other_actions_are_ignored() {
        let mut action = transfer_action(1, "alice", "alice", "bob");
        action.name = n("issue");
        let out = extractor().extract(&trace(100, vec![action]));
        assert!(out.is_empty());
        assert_eq!(out.actions, vec![(1, ActionOutcome::Ignored)]);
    }

    #[test]
    fn traversal_is_depth_first_in_order() {
        let mut a = transfer_action(1, "alice", "alice", "bob");
        let mut b = transfer_action(2, "bob", "bob", "carol");
        b.inline_traces.push(transfer_action(3, "carol", "carol", "dave"));
        a.inline_traces.push(b);
        a.inline_traces.push(transfer_action(4, "dave", "dave", "erin"));
        let c = transfer_action(5, "erin", "erin", "frank");
        let out = extractor().extract(&trace(100, vec![a, c]));
        let order: Vec<u64> = out.actions.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn depth_bound_and_duplicates_are_skipped() {
        let mut root = transfer_action(1, "alice", "alice", "bob");
        let mut child = transfer_action(2, "bob", "bob", "carol");
        child.inline_traces.push(transfer_action(3, "carol", "carol", "dave"));
        root.inline_traces.push(child);
        root.inline_traces.push(transfer_action(1, "alice", "alice", "bob"));

        let out = extractor().with_max_depth(2).extract(&trace(100, vec![root]));
        assert_eq!(
            out.actions,
            vec![
                (1, ActionOutcome::Decoded),
                (2, ActionOutcome::Decoded),
                (3, ActionOutcome::Skipped(SkipReason::DepthExceeded)),
                (1, ActionOutcome::Skipped(SkipReason::DuplicateSequence)),
            ]
        );
        assert_eq!(out.ledger.len(), 2);
    }

    #[test]
    fn out_of_range_amount_is_dropped() {
        let tok = crate::name::Symbol::new(4, "TOK").unwrap();
        let bad = transfer_of(1, "alice", "alice", "bob", Asset::new(i64::MIN, tok));
        let good = transfer_action(2, "carol", "carol", "dave");
        let out = extractor().extract(&trace(100, vec![bad, good]));
        assert!(matches!(
            out.actions[0],
            (1, ActionOutcome::Dropped(DecodeError::InvalidValue { .. }))
        ));
        assert_eq!(out.ledger.len(), 1);
        assert_eq!(out.ledger[0].action_id, 2);
        assert_eq!(out.deltas.iter().map(|d| d.amount).sum::<i64>(), 0);
    }

    #[test]
    fn range_check_rejects_unnegatable_amounts() {
        let tok = crate::name::Symbol::new(4, "TOK").unwrap();
        assert!(in_range(&Asset::new(i64::MIN, tok), "quantity").is_err());
        assert!(in_range(&Asset::new(crate::name::MAX_AMOUNT + 1, tok), "quantity").is_err());
        assert_eq!(in_range(&Asset::new(500, tok), "quantity"), Ok(-500));
    }
}
