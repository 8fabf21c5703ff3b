//! Work order lifecycle state machine
//!
//! Every status change made by a tool goes through [`transition`]. The
//! adjacency table below is the only place legal moves are defined.

use chrono::{DateTime, Utc};
use shared_types::{new_record_id, TimelineEvent, WorkOrder, WorkOrderStatus};

use WorkOrderStatus::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid work order transition {from} -> {to}; allowed from {from}: {allowed}")]
    InvalidTransition {
        from: WorkOrderStatus,
        to: WorkOrderStatus,
        allowed: String,
    },
}

/// Statuses reachable in one step from `from`.
pub fn allowed_transitions(from: WorkOrderStatus) -> &'static [WorkOrderStatus] {
    match from {
        New => &[Triaged, Cancelled],
        Triaged => &[VendorSearch, PendingBids, Cancelled, Escalated],
        VendorSearch => &[PendingBids, Dispatched, Cancelled, Escalated],
        PendingBids => &[Dispatched, Cancelled, Escalated],
        Dispatched => &[Scheduled, InProgress, Cancelled, Escalated],
        Scheduled => &[InProgress, Cancelled, Escalated],
        InProgress => &[PendingReview, Completed, Cancelled, Escalated],
        PendingReview => &[Completed, InProgress, Escalated],
        OnHold => &[Triaged, VendorSearch, Cancelled],
        Escalated => &[Triaged, VendorSearch, Dispatched, InProgress, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: WorkOrderStatus, to: WorkOrderStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Validate and apply a status change. On error the order is untouched.
pub fn transition(
    order: &mut WorkOrder,
    to: WorkOrderStatus,
    now: DateTime<Utc>,
) -> Result<TimelineEvent, TransitionError> {
    let from = order.status;
    if !can_transition(from, to) {
        let allowed = allowed_transitions(from)
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>();
        return Err(TransitionError::InvalidTransition {
            from,
            to,
            allowed: if allowed.is_empty() {
                "none (terminal)".to_string()
            } else {
                allowed.join(", ")
            },
        });
    }

    order.status = to;
    order.updated_at = now;
    match to {
        Dispatched if order.dispatched_at.is_none() => order.dispatched_at = Some(now),
        Completed => order.completed_at = Some(now),
        _ => {}
    }

    Ok(TimelineEvent {
        id: new_record_id(),
        work_order_id: order.id.clone(),
        kind: "status_changed".to_string(),
        from_status: Some(from),
        to_status: Some(to),
        detail: format!("{from} -> {to}"),
        at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Priority;

    fn order(status: WorkOrderStatus) -> WorkOrder {
        let now = Utc::now();
        WorkOrder {
            id: "wo-1".to_string(),
            organization_id: "org-1".to_string(),
            property_id: "prop-1".to_string(),
            unit_id: Some("unit-1".to_string()),
            tenant_id: None,
            vendor_id: None,
            title: "Leaking sink".to_string(),
            description: "Kitchen sink drips".to_string(),
            category: "plumbing".to_string(),
            priority: Priority::Normal,
            status,
            estimated_cost: None,
            approved_cost: None,
            actual_cost: None,
            po_number: None,
            scheduled_for: None,
            dispatched_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        assert!(allowed_transitions(Completed).is_empty());
        assert!(allowed_transitions(Cancelled).is_empty());
        for status in WorkOrderStatus::ALL {
            assert_eq!(allowed_transitions(status).is_empty(), status.is_terminal());
        }
    }

    #[test]
    fn test_dispatched_cannot_jump_to_completed() {
        let mut wo = order(Dispatched);
        let err = transition(&mut wo, Completed, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::InvalidTransition {
                from: Dispatched,
                to: Completed,
                ..
            }
        ));
        assert_eq!(wo.status, Dispatched);

        transition(&mut wo, InProgress, Utc::now()).unwrap();
        let event = transition(&mut wo, Completed, Utc::now()).unwrap();
        assert_eq!(wo.status, Completed);
        assert!(wo.completed_at.is_some());
        assert_eq!(event.from_status, Some(InProgress));
        assert_eq!(event.to_status, Some(Completed));
    }

    #[test]
    fn test_every_unlisted_pair_is_rejected_and_leaves_status() {
        for from in WorkOrderStatus::ALL {
            for to in WorkOrderStatus::ALL {
                let mut wo = order(from);
                let result = transition(&mut wo, to, Utc::now());
                if can_transition(from, to) {
                    assert!(result.is_ok(), "{from} -> {to} should be allowed");
                    assert_eq!(wo.status, to);
                } else {
                    assert!(result.is_err(), "{from} -> {to} should be rejected");
                    assert_eq!(wo.status, from);
                }
            }
        }
    }

    #[test]
    fn test_self_transition_is_rejected() {
        let mut wo = order(Triaged);
        assert!(transition(&mut wo, Triaged, Utc::now()).is_err());
    }

    #[test]
    fn test_dispatch_stamps_dispatched_at_once() {
        let mut wo = order(VendorSearch);
        let now = Utc::now();
        transition(&mut wo, Dispatched, now).unwrap();
        assert_eq!(wo.dispatched_at, Some(now));
    }
}
