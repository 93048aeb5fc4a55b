//! Principals, caller permissions, and the two-party confirmation flow.
//!
//! Two principals govern the engine: the operator runs day-to-day
//! settings and wind-downs, the methodologist co-signs the changes that
//! redirect control itself. Keeper operations are gated by an
//! allowed-caller set unless the engine is opened to anyone.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use flexlev_core::types::CallerId;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct Authority {
    operator: CallerId,
    methodologist: CallerId,
    allowed_callers: HashSet<CallerId>,
    anyone_callable: bool,
}

impl Authority {
    #[must_use]
    pub fn new(operator: CallerId, methodologist: CallerId) -> Self {
        Self {
            operator,
            methodologist,
            allowed_callers: HashSet::new(),
            anyone_callable: false,
        }
    }

    #[must_use]
    pub fn operator(&self) -> &CallerId {
        &self.operator
    }

    #[must_use]
    pub fn methodologist(&self) -> &CallerId {
        &self.methodologist
    }

    pub fn set_operator(&mut self, operator: CallerId) {
        self.operator = operator;
    }

    pub fn set_methodologist(&mut self, methodologist: CallerId) {
        self.methodologist = methodologist;
    }

    pub fn ensure_operator(&self, caller: &CallerId) -> Result<(), EngineError> {
        if caller == &self.operator {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(caller.clone()))
        }
    }

    /// Keeper gate for `rebalance` and `iterate_rebalance`. The operator
    /// always passes; everyone else needs the allowlist unless the engine
    /// has been opened to any caller.
    pub fn ensure_allowed_caller(&self, caller: &CallerId) -> Result<(), EngineError> {
        if self.anyone_callable || caller == &self.operator || self.allowed_callers.contains(caller)
        {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(caller.clone()))
        }
    }

    pub fn update_caller_status(&mut self, caller: CallerId, allowed: bool) {
        if allowed {
            self.allowed_callers.insert(caller);
        } else {
            self.allowed_callers.remove(&caller);
        }
    }

    pub fn update_anyone_callable(&mut self, anyone_callable: bool) {
        self.anyone_callable = anyone_callable;
    }
}

/// Changes sensitive enough to need both principals' signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GovernanceAction {
    SetOperator(CallerId),
    SetMethodologist(CallerId),
}

/// Which principal recorded a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Operator,
    Methodologist,
}

#[derive(Debug, Clone)]
struct PendingAction {
    action: GovernanceAction,
    recorded_at: DateTime<Utc>,
    operator_confirmed: bool,
    methodologist_confirmed: bool,
}

/// Two-phase commit for governance actions: a pending record keyed by the
/// content hash of the action, applied only once both principals confirm
/// the identical arguments inside the expiry window.
#[derive(Debug, Clone)]
pub struct MutualConfirmation {
    pending: HashMap<u64, PendingAction>,
    expiry: Duration,
}

impl MutualConfirmation {
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            expiry,
        }
    }

    fn action_key(action: &GovernanceAction) -> u64 {
        let mut hasher = DefaultHasher::new();
        action.hash(&mut hasher);
        hasher.finish()
    }

    /// Records one principal's confirmation. Returns the action once both
    /// principals have confirmed it; until then `None`. An expired record
    /// is discarded and the submitted confirmation starts a fresh one.
    pub fn confirm(
        &mut self,
        principal: Principal,
        action: GovernanceAction,
        now: DateTime<Utc>,
    ) -> Option<GovernanceAction> {
        let key = Self::action_key(&action);
        self.pending.retain(|_, p| now - p.recorded_at < self.expiry);

        let entry = self.pending.entry(key).or_insert_with(|| PendingAction {
            action,
            recorded_at: now,
            operator_confirmed: false,
            methodologist_confirmed: false,
        });
        match principal {
            Principal::Operator => entry.operator_confirmed = true,
            Principal::Methodologist => entry.methodologist_confirmed = true,
        }

        if entry.operator_confirmed && entry.methodologist_confirmed {
            self.pending.remove(&key).map(|p| p.action)
        } else {
            None
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn new_operator_action() -> GovernanceAction {
        GovernanceAction::SetOperator(CallerId::new("ops-2"))
    }

    #[test]
    fn single_confirmation_stays_pending() {
        let mut confirm = MutualConfirmation::new(Duration::hours(24));
        let applied = confirm.confirm(Principal::Operator, new_operator_action(), t0());
        assert!(applied.is_none());
        assert_eq!(confirm.pending_count(), 1);
    }

    #[test]
    fn matching_confirmations_apply() {
        let mut confirm = MutualConfirmation::new(Duration::hours(24));
        confirm.confirm(Principal::Operator, new_operator_action(), t0());
        let applied = confirm.confirm(
            Principal::Methodologist,
            new_operator_action(),
            t0() + Duration::hours(1),
        );
        assert_eq!(applied, Some(new_operator_action()));
        assert_eq!(confirm.pending_count(), 0);
    }

    #[test]
    fn differing_arguments_do_not_match() {
        let mut confirm = MutualConfirmation::new(Duration::hours(24));
        confirm.confirm(Principal::Operator, new_operator_action(), t0());
        let applied = confirm.confirm(
            Principal::Methodologist,
            GovernanceAction::SetOperator(CallerId::new("someone-else")),
            t0(),
        );
        assert!(applied.is_none());
        assert_eq!(confirm.pending_count(), 2);
    }

    #[test]
    fn expired_record_restarts() {
        let mut confirm = MutualConfirmation::new(Duration::hours(24));
        confirm.confirm(Principal::Operator, new_operator_action(), t0());
        // The methodologist shows up two days later; the stale record is
        // gone and their confirmation opens a new one.
        let applied = confirm.confirm(
            Principal::Methodologist,
            new_operator_action(),
            t0() + Duration::days(2),
        );
        assert!(applied.is_none());
        assert_eq!(confirm.pending_count(), 1);
    }

    #[test]
    fn authority_allowlist_and_anyone_callable() {
        let mut authority = Authority::new(CallerId::new("ops"), CallerId::new("meth"));
        let keeper = CallerId::new("keeper-1");

        assert!(authority.ensure_allowed_caller(&keeper).is_err());
        authority.update_caller_status(keeper.clone(), true);
        assert!(authority.ensure_allowed_caller(&keeper).is_ok());
        authority.update_caller_status(keeper.clone(), false);
        assert!(authority.ensure_allowed_caller(&keeper).is_err());

        authority.update_anyone_callable(true);
        assert!(authority.ensure_allowed_caller(&keeper).is_ok());
    }

    #[test]
    fn operator_gate() {
        let authority = Authority::new(CallerId::new("ops"), CallerId::new("meth"));
        assert!(authority.ensure_operator(&CallerId::new("ops")).is_ok());
        assert!(matches!(
            authority.ensure_operator(&CallerId::new("meth")),
            Err(EngineError::Unauthorized(_))
        ));
    }
}
