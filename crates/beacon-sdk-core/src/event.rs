// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Custom in-app events and their local validation.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// A custom event tracked by the host application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
	pub token: String,
	pub revenue: Option<f64>,
	pub currency: Option<String>,
	/// Deduplication key; a repeated order ID drops the event.
	pub order_id: Option<String>,
	pub callback_params: BTreeMap<String, String>,
	pub partner_params: BTreeMap<String, String>,
}

impl Event {
	#[must_use]
	pub fn new(token: impl Into<String>) -> Self {
		Self {
			token: token.into(),
			..Self::default()
		}
	}

	/// Attaches a revenue amount and its currency.
	#[must_use]
	pub fn with_revenue(mut self, amount: f64, currency: impl Into<String>) -> Self {
		self.revenue = Some(amount);
		self.currency = Some(currency.into());
		self
	}

	/// Sets the deduplication order ID.
	#[must_use]
	pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
		self.order_id = Some(order_id.into());
		self
	}

	/// Adds an event-scoped callback parameter.
	#[must_use]
	pub fn with_callback_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.callback_params.insert(key.into(), value.into());
		self
	}

	/// Adds an event-scoped partner parameter.
	#[must_use]
	pub fn with_partner_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.partner_params.insert(key.into(), value.into());
		self
	}

	/// Rejects malformed events before they reach the queue.
	pub fn validate(&self) -> Result<()> {
		if self.token.trim().is_empty() {
			return Err(CoreError::InvalidEvent("missing event token".to_string()));
		}
		if let Some(revenue) = self.revenue {
			if !revenue.is_finite() || revenue < 0.0 {
				return Err(CoreError::InvalidEvent(format!(
					"invalid revenue {revenue}"
				)));
			}
			if self.currency.as_deref().is_none_or(str::is_empty) {
				return Err(CoreError::InvalidEvent(
					"revenue requires a currency".to_string(),
				));
			}
		}
		Ok(())
	}
}
