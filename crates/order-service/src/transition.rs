use model::OrderStatus;
use uuid::Uuid;

/// An event that can advance (or fail to advance) an order's status.
/// Every path that mutates order status — the RPC reply handler, the
/// `StockReserved`/`OrderVerified` consumer, and the cancel handler — goes
/// through [`apply`] with one of these, never by writing `status` directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    ReservationConfirmed { reservation_id: Uuid },
    ReservationDomainFailure { reason: String },
    ReservationPendingVerification,
    Cancelled,
}

/// The single idempotent state-transition function (§4.1, §9).
///
/// Terminal states (`confirmed`, `failed`, `cancelled`) are absorbing:
/// `apply` is a no-op on them regardless of the event, so the first
/// terminal transition to commit wins and a racing second transition
/// (RPC reply vs. consumer, or a redelivered bus message) observes no
/// change.
pub fn apply(current: OrderStatus, event: &Transition) -> OrderStatus {
    if current.is_terminal() {
        return current;
    }
    match event {
        Transition::ReservationConfirmed { .. } => OrderStatus::Confirmed,
        Transition::ReservationDomainFailure { .. } => OrderStatus::Failed,
        Transition::ReservationPendingVerification => OrderStatus::PendingVerification,
        Transition::Cancelled => OrderStatus::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_absorbs_any_event() {
        let confirmed = OrderStatus::Confirmed;
        assert_eq!(
            apply(
                confirmed,
                &Transition::ReservationDomainFailure {
                    reason: "too late".into()
                }
            ),
            OrderStatus::Confirmed
        );
    }

    #[test]
    fn pending_verification_confirms_on_reservation_event() {
        let pending = OrderStatus::PendingVerification;
        let next = apply(
            pending,
            &Transition::ReservationConfirmed {
                reservation_id: Uuid::new_v4(),
            },
        );
        assert_eq!(next, OrderStatus::Confirmed);
    }

    #[test]
    fn pending_moves_to_pending_verification_on_timeout() {
        let next = apply(OrderStatus::Pending, &Transition::ReservationPendingVerification);
        assert_eq!(next, OrderStatus::PendingVerification);
    }

    #[test]
    fn repeated_confirmation_is_idempotent() {
        let once = apply(
            OrderStatus::Pending,
            &Transition::ReservationConfirmed {
                reservation_id: Uuid::new_v4(),
            },
        );
        let twice = apply(
            once,
            &Transition::ReservationConfirmed {
                reservation_id: Uuid::new_v4(),
            },
        );
        assert_eq!(once, OrderStatus::Confirmed);
        assert_eq!(twice, OrderStatus::Confirmed);
    }
}
