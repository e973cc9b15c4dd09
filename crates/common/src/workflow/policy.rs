//! Status transition policy
//!
//! A closed table from `(current, target)` to the minimum role allowed to
//! make that move. Admin is applied afterwards as a uniform override.
//! Anything not in the table is denied.

use crate::auth::Role;
use crate::db::models::InvoiceStatus;

use InvoiceStatus::*;

/// Minimum role for a transition, or `None` when the table has no entry
pub fn minimum_role(current: InvoiceStatus, target: InvoiceStatus) -> Option<Role> {
    if current == target {
        return None;
    }

    match (current, target) {
        (Submitted, UnderReview) => Some(Role::PM),
        (UnderReview, Approved) | (UnderReview, Rejected) => Some(Role::PM),
        (Approved, InProgress) => Some(Role::PM),
        (InProgress, PmoReview) => Some(Role::PM),
        (PmoReview, Completed) | (PmoReview, Rejected) => Some(Role::PMO),

        // Hold and resume; the engine narrows resume to the held-from state
        (from, OnHold) if from.is_active() => Some(Role::Head),
        (OnHold, to) if to.is_active() => Some(Role::Head),

        (from, Cancelled) if !from.is_terminal() => Some(Role::Head),

        _ => None,
    }
}

/// Whether `role` may move an invoice from `current` to `target`.
///
/// Self-transitions are always rejected so they never produce ledger
/// entries, even for Admin.
pub fn can_transition(current: InvoiceStatus, target: InvoiceStatus, role: Role) -> bool {
    if current == target {
        return false;
    }
    if role == Role::Admin {
        return true;
    }
    minimum_role(current, target).is_some_and(|min| role.at_least(min))
}

/// Every target `role` may reach from `current`
pub fn allowed_targets(current: InvoiceStatus, role: Role) -> Vec<InvoiceStatus> {
    InvoiceStatus::ALL
        .into_iter()
        .filter(|target| can_transition(current, *target, role))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [Role; 6] = [
        Role::ReadOnly,
        Role::Secretary,
        Role::PM,
        Role::PMO,
        Role::Head,
        Role::Admin,
    ];

    /// The rules, written out longhand
    fn permitted(current: InvoiceStatus, target: InvoiceStatus, role: Role) -> bool {
        if current == target {
            return false;
        }
        if role == Role::Admin {
            return true;
        }
        let listed: &[(InvoiceStatus, InvoiceStatus, Role)] = &[
            (Submitted, UnderReview, Role::PM),
            (UnderReview, Approved, Role::PM),
            (UnderReview, Rejected, Role::PM),
            (Approved, InProgress, Role::PM),
            (InProgress, PmoReview, Role::PM),
            (PmoReview, Completed, Role::PMO),
            (PmoReview, Rejected, Role::PMO),
        ];
        if listed
            .iter()
            .any(|(c, t, min)| *c == current && *t == target && role >= *min)
        {
            return true;
        }
        if target == OnHold && current.is_active() {
            return role >= Role::Head;
        }
        if current == OnHold && target.is_active() {
            return role >= Role::Head;
        }
        if target == Cancelled && !current.is_terminal() {
            return role >= Role::Head;
        }
        false
    }

    #[test]
    fn test_table_matches_rules_for_every_triple() {
        for current in InvoiceStatus::ALL {
            for target in InvoiceStatus::ALL {
                for role in ROLES {
                    assert_eq!(
                        can_transition(current, target, role),
                        permitted(current, target, role),
                        "{} -> {} as {}",
                        current,
                        target,
                        role
                    );
                }
            }
        }
    }

    #[test]
    fn test_self_transition_always_rejected() {
        for status in InvoiceStatus::ALL {
            for role in ROLES {
                assert!(!can_transition(status, status, role));
            }
        }
    }

    #[test]
    fn test_terminal_states_closed_to_non_admin() {
        for current in InvoiceStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for role in ROLES.into_iter().filter(|r| *r != Role::Admin) {
                assert!(allowed_targets(current, role).is_empty());
            }
            assert!(can_transition(current, Submitted, Role::Admin));
        }
    }

    #[test]
    fn test_review_scenarios() {
        assert!(can_transition(UnderReview, Approved, Role::PM));
        assert!(!can_transition(UnderReview, Approved, Role::Secretary));
        assert!(!can_transition(PmoReview, Completed, Role::PM));
        assert!(can_transition(PmoReview, Completed, Role::PMO));
        assert!(!can_transition(Submitted, Approved, Role::Head));
    }

    #[test]
    fn test_hold_and_cancel_need_head() {
        assert!(!can_transition(Approved, OnHold, Role::PMO));
        assert!(can_transition(Approved, OnHold, Role::Head));
        assert!(can_transition(OnHold, Approved, Role::Head));
        assert!(can_transition(OnHold, Cancelled, Role::Head));
        assert!(!can_transition(OnHold, Completed, Role::Head));
        assert!(!can_transition(Completed, Cancelled, Role::Head));
        assert!(!can_transition(InProgress, Cancelled, Role::PMO));
    }

    #[test]
    fn test_read_only_and_secretary_move_nothing() {
        for current in InvoiceStatus::ALL {
            assert!(allowed_targets(current, Role::ReadOnly).is_empty());
            assert!(allowed_targets(current, Role::Secretary).is_empty());
        }
    }
}
