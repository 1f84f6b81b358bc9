//! Checkout session aggregate.

use chrono::{DateTime, Duration, Utc};
use common::CheckoutId;
use serde::{Deserialize, Serialize};

use super::{
    CheckoutItem, CheckoutStatus, Currency, Money, NewCheckoutItem, PaymentMethod,
    ShippingAddress, UserId,
};
use crate::error::CheckoutDomainError;

/// How long a session stays open after creation, in minutes.
pub const CHECKOUT_TTL_MINUTES: i64 = 30;

/// Failure reason recorded when the shopper cancels.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

/// Session time-to-live.
pub fn checkout_ttl() -> Duration {
    Duration::minutes(CHECKOUT_TTL_MINUTES)
}

/// Stored subtotal disagreed with the line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountDrift {
    pub stored: Money,
    pub recomputed: Money,
}

/// A shopper's checkout session.
///
/// Amounts are kept in minor currency units and always satisfy
/// `total = subtotal - discount + shipping` after any mutation that
/// touches them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: CheckoutId,
    pub user_id: UserId,
    pub status: CheckoutStatus,
    pub items: Vec<CheckoutItem>,
    pub currency: Currency,
    pub subtotal_amount: Money,
    pub discount_amount: Money,
    pub shipping_amount: Money,
    pub total_amount: Money,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: Option<PaymentMethod>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Starts a new session in `Initiated` with amounts derived from the items.
    pub fn initiate(
        user_id: UserId,
        items: Vec<NewCheckoutItem>,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Result<Self, CheckoutDomainError> {
        if items.is_empty() {
            return Err(CheckoutDomainError::NoItems);
        }
        let items = items
            .into_iter()
            .map(CheckoutItem::new)
            .collect::<Result<Vec<_>, _>>()?;

        let mut session = Self {
            id: CheckoutId::new(),
            user_id,
            status: CheckoutStatus::Initiated,
            items,
            currency,
            subtotal_amount: Money::zero(),
            discount_amount: Money::zero(),
            shipping_amount: Money::zero(),
            total_amount: Money::zero(),
            shipping_address: None,
            payment_method: None,
            order_id: None,
            payment_id: None,
            expires_at: now + checkout_ttl(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        session.subtotal_amount = session.recompute_subtotal()?;
        session.total_amount = session.compute_total()?;
        Ok(session)
    }

    /// Returns true once `now` is past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Sums `price * quantity` over the line items.
    pub fn recompute_subtotal(&self) -> Result<Money, CheckoutDomainError> {
        self.items.iter().try_fold(Money::zero(), |acc, item| {
            item.line_total()
                .and_then(|line| acc.checked_add(line))
                .ok_or(CheckoutDomainError::AmountOverflow)
        })
    }

    /// Re-derives the subtotal from the items and the total from the subtotal.
    ///
    /// Returns the drift when the stored subtotal disagreed.
    pub fn reconcile_amounts(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<AmountDrift>, CheckoutDomainError> {
        let recomputed = self.recompute_subtotal()?;
        let drift = (recomputed != self.subtotal_amount).then_some(AmountDrift {
            stored: self.subtotal_amount,
            recomputed,
        });
        self.subtotal_amount = recomputed;
        let total = self.compute_total()?;
        if drift.is_some() || total != self.total_amount {
            self.total_amount = total;
            self.updated_at = now;
        }
        Ok(drift)
    }

    /// Forces the session into `Expired`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), CheckoutDomainError> {
        self.transition(CheckoutStatus::Expired, "expire", now)
    }

    /// Sets the shipping address; only legal while `Initiated`.
    pub fn set_shipping_address(
        &mut self,
        address: ShippingAddress,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        self.ensure_editable("set shipping address")?;
        address.validate()?;
        self.shipping_address = Some(address);
        self.updated_at = now;
        Ok(())
    }

    /// Sets the payment method; only legal while `Initiated`.
    pub fn set_payment_method(
        &mut self,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        self.ensure_editable("set payment method")?;
        self.payment_method = Some(method);
        self.updated_at = now;
        Ok(())
    }

    /// Assigns reservation ids to the items by position.
    pub fn assign_reservations(
        &mut self,
        reservation_ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        if reservation_ids.len() != self.items.len() {
            return Err(CheckoutDomainError::ReservationMismatch {
                expected: self.items.len(),
                actual: reservation_ids.len(),
            });
        }
        for (item, reservation_id) in self.items.iter_mut().zip(reservation_ids) {
            item.reservation_id = Some(reservation_id);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Returns the reservation ids currently held, in item order.
    pub fn reservation_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.reservation_id.clone())
            .collect()
    }

    /// Forgets every reservation id.
    pub fn clear_reservations(&mut self, now: DateTime<Utc>) {
        for item in &mut self.items {
            item.reservation_id = None;
        }
        self.updated_at = now;
    }

    /// Records that inventory is held for every item.
    pub fn mark_items_reserved(&mut self, now: DateTime<Utc>) -> Result<(), CheckoutDomainError> {
        self.transition(CheckoutStatus::ItemsReserved, "mark items reserved", now)
    }

    /// Records the downstream order and moves to `PaymentProcessing`.
    pub fn record_order(
        &mut self,
        order_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        self.transition(CheckoutStatus::PaymentProcessing, "record order", now)?;
        self.order_id = Some(order_id.into());
        Ok(())
    }

    /// Records the payment and completes the session.
    pub fn complete(
        &mut self,
        payment_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        self.transition(CheckoutStatus::Completed, "complete", now)?;
        self.payment_id = Some(payment_id.into());
        Ok(())
    }

    /// Moves the session to `Failed` with a reason.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        self.transition(CheckoutStatus::Failed, "fail", now)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Cancels on the shopper's behalf.
    ///
    /// Reservation ids are dropped locally; the inventory service is not
    /// called here.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), CheckoutDomainError> {
        self.transition(CheckoutStatus::Failed, "cancel", now)?;
        self.clear_reservations(now);
        self.failure_reason = Some(CANCELLED_BY_USER.to_string());
        Ok(())
    }

    fn compute_total(&self) -> Result<Money, CheckoutDomainError> {
        self.subtotal_amount
            .checked_sub(self.discount_amount)
            .and_then(|amount| amount.checked_add(self.shipping_amount))
            .ok_or(CheckoutDomainError::AmountOverflow)
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), CheckoutDomainError> {
        if !self.status.can_edit_details() {
            return Err(CheckoutDomainError::InvalidStateTransition {
                current: self.status,
                action,
            });
        }
        Ok(())
    }

    fn transition(
        &mut self,
        next: CheckoutStatus,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutDomainError> {
        if !self.status.can_transition_to(next) {
            return Err(CheckoutDomainError::InvalidStateTransition {
                current: self.status,
                action,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(sku: &str, price: i64, quantity: u32) -> NewCheckoutItem {
        NewCheckoutItem {
            product_id: format!("prod-{sku}"),
            variant_id: format!("var-{sku}"),
            name: format!("Item {sku}"),
            sku: sku.to_string(),
            price,
            quantity,
        }
    }

    fn session(items: Vec<NewCheckoutItem>) -> CheckoutSession {
        CheckoutSession::initiate(
            UserId::new("user-1").unwrap(),
            items,
            Currency::new("USD").unwrap(),
            Utc::now(),
        )
        .unwrap()
    }

    fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Ada Lovelace".to_string(),
            address_line: "12 Analytical Row".to_string(),
            city: "London".to_string(),
            postal_code: "N1 9GU".to_string(),
            country: "GB".to_string(),
        }
    }

    fn assert_total_invariant(session: &CheckoutSession) {
        assert_eq!(
            session.total_amount.minor_units(),
            session.subtotal_amount.minor_units() - session.discount_amount.minor_units()
                + session.shipping_amount.minor_units()
        );
    }

    #[test]
    fn test_initiate_computes_amounts() {
        let session = session(vec![item("A", 2999, 2)]);

        assert_eq!(session.status, CheckoutStatus::Initiated);
        assert_eq!(session.subtotal_amount, Money::from_minor(5998));
        assert_eq!(session.total_amount, Money::from_minor(5998));
        assert_eq!(session.expires_at, session.created_at + checkout_ttl());
        assert_total_invariant(&session);
    }

    #[test]
    fn test_initiate_requires_items() {
        let result = CheckoutSession::initiate(
            UserId::new("user-1").unwrap(),
            vec![],
            Currency::new("USD").unwrap(),
            Utc::now(),
        );
        assert_eq!(result, Err(CheckoutDomainError::NoItems));
    }

    #[test]
    fn test_initiate_rejects_overflowing_subtotal() {
        let result = CheckoutSession::initiate(
            UserId::new("user-1").unwrap(),
            vec![item("A", i64::MAX, 2)],
            Currency::new("USD").unwrap(),
            Utc::now(),
        );
        assert_eq!(result, Err(CheckoutDomainError::AmountOverflow));
    }

    #[test]
    fn test_expiry_is_strictly_after_deadline() {
        let session = session(vec![item("A", 100, 1)]);
        assert!(!session.is_expired(session.expires_at));
        assert!(session.is_expired(session.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_reconcile_restores_tampered_subtotal() {
        let mut session = session(vec![item("A", 2999, 2)]);
        session.subtotal_amount = Money::from_minor(9999);

        let drift = session.reconcile_amounts(Utc::now()).unwrap();

        assert_eq!(
            drift,
            Some(AmountDrift {
                stored: Money::from_minor(9999),
                recomputed: Money::from_minor(5998),
            })
        );
        assert_eq!(session.subtotal_amount, Money::from_minor(5998));
        assert_eq!(session.total_amount, Money::from_minor(5998));
    }

    #[test]
    fn test_reconcile_keeps_discount_and_shipping() {
        let mut session = session(vec![item("A", 1000, 3), item("B", 500, 1)]);
        session.discount_amount = Money::from_minor(250);
        session.shipping_amount = Money::from_minor(499);

        let drift = session.reconcile_amounts(Utc::now()).unwrap();

        assert!(drift.is_none());
        assert_eq!(session.subtotal_amount, Money::from_minor(3500));
        assert_eq!(session.total_amount, Money::from_minor(3749));
        assert_total_invariant(&session);
    }

    #[test]
    fn test_details_only_editable_while_initiated() {
        let mut session = session(vec![item("A", 100, 1)]);
        let now = Utc::now();
        session.set_shipping_address(address(), now).unwrap();
        session
            .set_payment_method(PaymentMethod::new("card").unwrap(), now)
            .unwrap();

        session.mark_items_reserved(now).unwrap();

        assert!(matches!(
            session.set_shipping_address(address(), now),
            Err(CheckoutDomainError::InvalidStateTransition {
                current: CheckoutStatus::ItemsReserved,
                ..
            })
        ));
        assert!(
            session
                .set_payment_method(PaymentMethod::new("paypal").unwrap(), now)
                .is_err()
        );
        assert_eq!(session.payment_method.unwrap().as_str(), "card");
    }

    #[test]
    fn test_full_forward_path() {
        let mut session = session(vec![item("A", 100, 1), item("B", 200, 2)]);
        let now = Utc::now();

        session
            .assign_reservations(vec!["res-1".into(), "res-2".into()], now)
            .unwrap();
        session.mark_items_reserved(now).unwrap();
        session.record_order("order-1", now).unwrap();
        assert_eq!(session.status, CheckoutStatus::PaymentProcessing);
        session.complete("pay-1", now).unwrap();

        assert_eq!(session.status, CheckoutStatus::Completed);
        assert_eq!(session.order_id.as_deref(), Some("order-1"));
        assert_eq!(session.payment_id.as_deref(), Some("pay-1"));
        assert_eq!(session.reservation_ids(), vec!["res-1", "res-2"]);
    }

    #[test]
    fn test_reservation_count_must_match_items() {
        let mut session = session(vec![item("A", 100, 1), item("B", 200, 2)]);
        let result = session.assign_reservations(vec!["res-1".into()], Utc::now());
        assert_eq!(
            result,
            Err(CheckoutDomainError::ReservationMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert!(session.reservation_ids().is_empty());
    }

    #[test]
    fn test_cancel_clears_reservations() {
        let mut session = session(vec![item("A", 100, 1)]);
        let now = Utc::now();
        session.assign_reservations(vec!["res-1".into()], now).unwrap();
        session.mark_items_reserved(now).unwrap();

        session.cancel(now).unwrap();

        assert_eq!(session.status, CheckoutStatus::Failed);
        assert_eq!(session.failure_reason.as_deref(), Some(CANCELLED_BY_USER));
        assert!(session.reservation_ids().is_empty());
    }

    #[test]
    fn test_terminal_sessions_reject_everything() {
        let mut session = session(vec![item("A", 100, 1)]);
        let now = Utc::now();
        session.fail("boom", now).unwrap();

        assert!(session.cancel(now).is_err());
        assert!(session.expire(now).is_err());
        assert!(session.mark_items_reserved(now).is_err());
        assert_eq!(session.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cannot_skip_steps() {
        let mut session = session(vec![item("A", 100, 1)]);
        assert!(session.record_order("order-1", Utc::now()).is_err());
        assert!(session.complete("pay-1", Utc::now()).is_err());
        assert!(session.order_id.is_none());
    }

    #[test]
    fn test_session_json_roundtrip() {
        let session = session(vec![item("A", 100, 1)]);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "initiated");
        assert_eq!(json["subtotal_amount"], 100);
        let restored: CheckoutSession = serde_json::from_value(json).unwrap();
        assert_eq!(restored, session);
    }
}
