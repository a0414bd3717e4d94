use crate::models::request::{CancelActor, RequestKind, RequestStatus};

/// Every mutating operation the service exposes. `Rate` leaves the status
/// unchanged but still participates in the table so its precondition lives
/// in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Accept,
    MarkArrived,
    Start,
    Complete,
    Cancel(CancelActor),
    Rate,
    MarkRequesterNoShow,
    MarkPackageRefused,
    MarkDeliveryFailed,
    ConfirmPayment,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Accept => "accept",
            Operation::MarkArrived => "mark_arrived",
            Operation::Start => "start",
            Operation::Complete => "complete",
            Operation::Cancel(_) => "cancel",
            Operation::Rate => "rate",
            Operation::MarkRequesterNoShow => "mark_requester_no_show",
            Operation::MarkPackageRefused => "mark_package_refused",
            Operation::MarkDeliveryFailed => "mark_delivery_failed",
            Operation::ConfirmPayment => "confirm_payment",
        }
    }
}

/// The transition table. Returns the resulting status when `op` is legal
/// from `current` for the given kind, `None` otherwise. This is the single
/// source of truth for legal lifecycle edges; callers turn `None` into an
/// `InvalidTransition` error.
pub fn next_status(kind: RequestKind, current: RequestStatus, op: Operation) -> Option<RequestStatus> {
    use RequestStatus::*;

    match op {
        Operation::Accept => (current == Requested).then_some(Assigned),
        Operation::MarkArrived => (current == Assigned).then_some(Arrived),
        Operation::Start => (current == Arrived).then_some(InProgress),
        Operation::Complete => (current == InProgress).then_some(Completed),
        Operation::Cancel(actor) => {
            let cancellable = matches!(current, Requested | Assigned | Arrived)
                || (kind == RequestKind::Parcel && current == InProgress);
            cancellable.then_some(actor.cancelled_status())
        }
        Operation::Rate => matches!(current, Completed | Paid).then_some(current),
        Operation::MarkRequesterNoShow => (kind == RequestKind::Parcel
            && matches!(current, Assigned | Arrived))
        .then_some(RequesterNoShow),
        Operation::MarkPackageRefused => {
            (kind == RequestKind::Parcel && current == InProgress).then_some(PackageRefused)
        }
        Operation::MarkDeliveryFailed => {
            (kind == RequestKind::Parcel && current == InProgress).then_some(DeliveryFailed)
        }
        Operation::ConfirmPayment => (current == Completed).then_some(Paid),
    }
}

#[cfg(test)]
mod tests {
    use super::{next_status, Operation};
    use crate::models::request::{CancelActor, RequestKind, RequestStatus};

    const ALL_STATUSES: [RequestStatus; 12] = [
        RequestStatus::Requested,
        RequestStatus::Assigned,
        RequestStatus::Arrived,
        RequestStatus::InProgress,
        RequestStatus::Completed,
        RequestStatus::Paid,
        RequestStatus::CancelledByRequester,
        RequestStatus::CancelledByWorker,
        RequestStatus::CancelledBySystem,
        RequestStatus::RequesterNoShow,
        RequestStatus::PackageRefused,
        RequestStatus::DeliveryFailed,
    ];

    #[test]
    fn happy_path_edges_for_both_kinds() {
        for kind in [RequestKind::Trip, RequestKind::Parcel] {
            assert_eq!(
                next_status(kind, RequestStatus::Requested, Operation::Accept),
                Some(RequestStatus::Assigned)
            );
            assert_eq!(
                next_status(kind, RequestStatus::Assigned, Operation::MarkArrived),
                Some(RequestStatus::Arrived)
            );
            assert_eq!(
                next_status(kind, RequestStatus::Arrived, Operation::Start),
                Some(RequestStatus::InProgress)
            );
            assert_eq!(
                next_status(kind, RequestStatus::InProgress, Operation::Complete),
                Some(RequestStatus::Completed)
            );
            assert_eq!(
                next_status(kind, RequestStatus::Completed, Operation::ConfirmPayment),
                Some(RequestStatus::Paid)
            );
        }
    }

    #[test]
    fn accept_is_only_legal_from_requested() {
        for status in ALL_STATUSES {
            let expected = (status == RequestStatus::Requested).then_some(RequestStatus::Assigned);
            assert_eq!(
                next_status(RequestKind::Trip, status, Operation::Accept),
                expected,
                "accept from {status:?}"
            );
        }
    }

    #[test]
    fn no_edge_can_skip_ahead() {
        assert_eq!(
            next_status(RequestKind::Trip, RequestStatus::Requested, Operation::Start),
            None
        );
        assert_eq!(
            next_status(
                RequestKind::Trip,
                RequestStatus::Assigned,
                Operation::Complete
            ),
            None
        );
        assert_eq!(
            next_status(
                RequestKind::Trip,
                RequestStatus::Requested,
                Operation::Complete
            ),
            None
        );
    }

    #[test]
    fn cancel_window_closes_at_in_progress_for_trips_only() {
        let op = Operation::Cancel(CancelActor::Requester);
        assert_eq!(
            next_status(RequestKind::Trip, RequestStatus::InProgress, op),
            None
        );
        assert_eq!(
            next_status(RequestKind::Parcel, RequestStatus::InProgress, op),
            Some(RequestStatus::CancelledByRequester)
        );
        for kind in [RequestKind::Trip, RequestKind::Parcel] {
            assert_eq!(next_status(kind, RequestStatus::Completed, op), None);
            assert_eq!(next_status(kind, RequestStatus::Paid, op), None);
        }
    }

    #[test]
    fn cancel_actor_selects_the_terminal_status() {
        for (actor, status) in [
            (CancelActor::Requester, RequestStatus::CancelledByRequester),
            (CancelActor::Worker, RequestStatus::CancelledByWorker),
            (CancelActor::System, RequestStatus::CancelledBySystem),
        ] {
            assert_eq!(
                next_status(
                    RequestKind::Trip,
                    RequestStatus::Requested,
                    Operation::Cancel(actor)
                ),
                Some(status)
            );
        }
    }

    #[test]
    fn parcel_failure_edges_are_parcel_only() {
        assert_eq!(
            next_status(
                RequestKind::Parcel,
                RequestStatus::Assigned,
                Operation::MarkRequesterNoShow
            ),
            Some(RequestStatus::RequesterNoShow)
        );
        assert_eq!(
            next_status(
                RequestKind::Parcel,
                RequestStatus::InProgress,
                Operation::MarkPackageRefused
            ),
            Some(RequestStatus::PackageRefused)
        );
        assert_eq!(
            next_status(
                RequestKind::Parcel,
                RequestStatus::InProgress,
                Operation::MarkDeliveryFailed
            ),
            Some(RequestStatus::DeliveryFailed)
        );

        for op in [
            Operation::MarkRequesterNoShow,
            Operation::MarkPackageRefused,
            Operation::MarkDeliveryFailed,
        ] {
            for status in ALL_STATUSES {
                assert_eq!(next_status(RequestKind::Trip, status, op), None);
            }
        }
    }

    #[test]
    fn rating_window_is_completed_or_paid() {
        for status in ALL_STATUSES {
            let legal = matches!(status, RequestStatus::Completed | RequestStatus::Paid);
            assert_eq!(
                next_status(RequestKind::Trip, status, Operation::Rate).is_some(),
                legal,
                "rate from {status:?}"
            );
        }
    }

    #[test]
    fn terminal_statuses_admit_no_lifecycle_edge() {
        let terminal = [
            RequestStatus::Paid,
            RequestStatus::CancelledByRequester,
            RequestStatus::CancelledByWorker,
            RequestStatus::CancelledBySystem,
            RequestStatus::RequesterNoShow,
            RequestStatus::PackageRefused,
            RequestStatus::DeliveryFailed,
        ];
        let ops = [
            Operation::Accept,
            Operation::MarkArrived,
            Operation::Start,
            Operation::Complete,
            Operation::Cancel(CancelActor::System),
            Operation::ConfirmPayment,
        ];
        for status in terminal {
            assert!(status.is_terminal());
            for op in ops {
                assert_eq!(
                    next_status(RequestKind::Parcel, status, op),
                    None,
                    "{op:?} from {status:?}"
                );
            }
        }
    }
}
