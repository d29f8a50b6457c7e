//! Action ledger: records issued actions and arbitrates event claims
//!
//! Scoped to one scenario. Shared-read/single-writer; one browser
//! session models one user at a time, so unrelated concurrent scenarios
//! must not share a ledger. The claims table enforces the single-claim
//! invariant: an observed event binds to at most one in-flight action,
//! with earlier-issued pending actions taking priority for patterns
//! they are still hungry for.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use vigil_common::{
    Action, ActionId, CorrelationResult, Error, EventPattern, ObservedEvent, Result, Timestamp,
};

/// Outcome of one claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The event now belongs to this action.
    Claimed,
    /// Permanently unavailable: already claimed, or the claimer is not
    /// pending.
    Refused,
    /// An earlier-issued, still-pending action has priority; retry once
    /// that action resolves or satisfies the overlapping pattern.
    Deferred,
}

struct Pending {
    id: ActionId,
    issued_at: Timestamp,
    patterns: Vec<EventPattern>,
    /// Which patterns this action has already bound an event for.
    satisfied: Vec<bool>,
}

impl Pending {
    /// Still hungry for an event shaped like this one?
    fn wants(&self, event: &ObservedEvent) -> bool {
        event.observed_at >= self.issued_at
            && self
                .patterns
                .iter()
                .zip(&self.satisfied)
                .any(|(pattern, satisfied)| !satisfied && pattern.matches(event))
    }
}

#[derive(Default)]
struct LedgerInner {
    actions: HashMap<ActionId, Action>,
    /// In-flight correlations, kept sorted by issue time.
    pending: Vec<Pending>,
    /// Event seq -> owning action.
    claims: HashMap<u64, ActionId>,
    results: HashMap<ActionId, CorrelationResult>,
}

/// Per-scenario action ledger. Cheap to clone.
#[derive(Clone, Default)]
pub struct ActionLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issued action; returns its correlation token.
    pub fn record(&self, action: &Action) -> ActionId {
        let mut inner = self.inner.write();
        inner.actions.insert(action.id, action.clone());
        debug!("recorded action {} ({})", action.id, action.kind);
        action.id
    }

    pub fn lookup(&self, id: ActionId) -> Option<Action> {
        self.inner.read().actions.get(&id).cloned()
    }

    /// Register an in-flight correlation with its expected patterns.
    /// The pattern set is what gives earlier actions claim priority.
    pub fn begin(&self, id: ActionId, patterns: &[EventPattern]) -> Result<()> {
        let mut inner = self.inner.write();
        let action = inner
            .actions
            .get(&id)
            .ok_or_else(|| Error::UnknownAction { action: id.to_string() })?;
        if inner.results.contains_key(&id) {
            return Err(Error::AlreadyResolved { action: id.to_string() });
        }
        let issued_at = action.issued_at;
        inner.pending.retain(|p| p.id != id);
        inner.pending.push(Pending {
            id,
            issued_at,
            patterns: patterns.to_vec(),
            satisfied: vec![false; patterns.len()],
        });
        inner.pending.sort_by_key(|p| p.issued_at);
        Ok(())
    }

    /// Attempt to claim `event` for action `id`.
    ///
    /// `Deferred` means an earlier-issued, still-pending action's
    /// unsatisfied patterns also match the event: the earliest action
    /// after whose issue the event was observed wins, which prevents one
    /// backend response from being counted against two rapid-fire
    /// actions.
    pub fn try_claim(&self, id: ActionId, event: &ObservedEvent) -> ClaimOutcome {
        let mut inner = self.inner.write();

        if inner.claims.contains_key(&event.seq) {
            return ClaimOutcome::Refused;
        }
        let Some(me) = inner.pending.iter().find(|p| p.id == id) else {
            return ClaimOutcome::Refused;
        };
        let my_issued_at = me.issued_at;

        let preempted = inner
            .pending
            .iter()
            .any(|p| p.id != id && p.issued_at < my_issued_at && p.wants(event));
        if preempted {
            return ClaimOutcome::Deferred;
        }

        inner.claims.insert(event.seq, id);
        let me = inner
            .pending
            .iter_mut()
            .find(|p| p.id == id)
            .expect("pending entry checked above");
        for (idx, pattern) in me.patterns.iter().enumerate() {
            if pattern.matches(event) {
                me.satisfied[idx] = true;
            }
        }
        ClaimOutcome::Claimed
    }

    /// Store the correlation result, exactly once; the pending entry is
    /// retired so later actions stop yielding claim priority to it.
    pub fn resolve(&self, id: ActionId, result: CorrelationResult) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.results.contains_key(&id) {
            return Err(Error::AlreadyResolved { action: id.to_string() });
        }
        inner.pending.retain(|p| p.id != id);
        inner.results.insert(id, result);
        Ok(())
    }

    pub fn result(&self, id: ActionId) -> Option<CorrelationResult> {
        self.inner.read().results.get(&id).cloned()
    }

    pub fn is_pending(&self, id: ActionId) -> bool {
        self.inner.read().pending.iter().any(|p| p.id == id)
    }

    /// Which action claimed an event, if any.
    pub fn claimant(&self, seq: u64) -> Option<ActionId> {
        self.inner.read().claims.get(&seq).copied()
    }
}
