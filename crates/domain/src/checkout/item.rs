//! Checkout line items.

use serde::{Deserialize, Serialize};

use super::{Money, ProductId, VariantId};
use crate::error::CheckoutDomainError;

/// A line item as submitted by the caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCheckoutItem {
    pub product_id: String,
    pub variant_id: String,
    pub name: String,
    pub sku: String,
    pub price: i64,
    pub quantity: u32,
}

/// A validated line item in a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub name: String,
    pub sku: String,
    /// Unit price in minor units, always positive.
    pub price: Money,
    /// Always positive.
    pub quantity: u32,
    /// Set only while inventory is held for this line.
    #[serde(default)]
    pub reservation_id: Option<String>,
}

impl CheckoutItem {
    /// Validates caller input into a line item.
    pub fn new(item: NewCheckoutItem) -> Result<Self, CheckoutDomainError> {
        let NewCheckoutItem {
            product_id,
            variant_id,
            name,
            sku,
            price,
            quantity,
        } = item;

        for (field, value) in [
            ("product_id", &product_id),
            ("variant_id", &variant_id),
            ("name", &name),
            ("sku", &sku),
        ] {
            if value.trim().is_empty() {
                return Err(CheckoutDomainError::MissingField { field });
            }
        }
        let price = Money::from_minor(price);
        if !price.is_positive() {
            return Err(CheckoutDomainError::InvalidPrice {
                sku,
                price: price.minor_units(),
            });
        }
        if quantity == 0 {
            return Err(CheckoutDomainError::InvalidQuantity { sku, quantity });
        }

        Ok(Self {
            product_id: ProductId::new(product_id),
            variant_id: VariantId::new(variant_id),
            name,
            sku,
            price,
            quantity,
            reservation_id: None,
        })
    }

    /// Returns `price * quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_multiply(self.quantity)
    }
}
