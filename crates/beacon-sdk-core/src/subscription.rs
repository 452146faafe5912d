// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Subscription purchases.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// A subscription purchase reported by the host application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subscription {
	pub sku: String,
	pub price: f64,
	pub currency: String,
	pub order_id: Option<String>,
	pub purchase_time: Option<DateTime<Utc>>,
	pub callback_params: BTreeMap<String, String>,
	pub partner_params: BTreeMap<String, String>,
}

impl Subscription {
	#[must_use]
	pub fn new(sku: impl Into<String>, price: f64, currency: impl Into<String>) -> Self {
		Self {
			sku: sku.into(),
			price,
			currency: currency.into(),
			..Self::default()
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.sku.trim().is_empty() {
			return Err(CoreError::InvalidEvent("missing subscription sku".to_string()));
		}
		if !self.price.is_finite() || self.price < 0.0 {
			return Err(CoreError::InvalidEvent(format!(
				"invalid subscription price {}",
				self.price
			)));
		}
		if self.currency.is_empty() {
			return Err(CoreError::InvalidEvent(
				"subscription requires a currency".to_string(),
			));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_valid_subscription() {
		assert!(Subscription::new("premium_monthly", 9.99, "USD")
			.validate()
			.is_ok());
	}

	#[test]
	fn test_missing_sku_rejected() {
		assert!(Subscription::new(" ", 9.99, "USD").validate().is_err());
	}

	#[test]
	fn test_negative_price_rejected() {
		assert!(Subscription::new("sku", -1.0, "USD").validate().is_err());
	}

	#[test]
	fn test_missing_currency_rejected() {
		assert!(Subscription::new("sku", 1.0, "").validate().is_err());
	}
}
