// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Attribution state returned by the backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribution of this install as resolved by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attribution {
	pub tracker_token: Option<String>,
	pub tracker_name: Option<String>,
	pub network: Option<String>,
	pub campaign: Option<String>,
	pub adgroup: Option<String>,
	pub creative: Option<String>,
	pub click_label: Option<String>,
	pub cost_type: Option<String>,
	pub cost_amount: Option<f64>,
	pub cost_currency: Option<String>,
	/// Deferred deeplink. Handed to the host for dispatch; not part of
	/// attribution equality.
	pub deeplink: Option<String>,
}

impl Attribution {
	/// Decodes an `attribution` object from a response body.
	///
	/// Cost fields are only attached when `with_cost` is set (the caller
	/// opted into cost data); the deeplink rides along either way.
	#[must_use]
	pub fn from_json(value: &Value, with_cost: bool) -> Option<Self> {
		let object = value.as_object()?;
		let string = |key: &str| {
			object
				.get(key)
				.and_then(Value::as_str)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
		};

		let mut attribution = Attribution {
			tracker_token: string("tracker_token"),
			tracker_name: string("tracker_name"),
			network: string("network"),
			campaign: string("campaign"),
			adgroup: string("adgroup"),
			creative: string("creative"),
			click_label: string("click_label"),
			cost_type: None,
			cost_amount: None,
			cost_currency: None,
			deeplink: string("deeplink"),
		};
		if with_cost {
			attribution.cost_type = string("cost_type");
			attribution.cost_amount = object.get("cost_amount").and_then(Value::as_f64);
			attribution.cost_currency = string("cost_currency");
		}
		Some(attribution)
	}

	/// Compares attribution payloads, ignoring the transient deeplink.
	#[must_use]
	pub fn same_attribution(&self, other: &Self) -> bool {
		self.tracker_token == other.tracker_token
			&& self.tracker_name == other.tracker_name
			&& self.network == other.network
			&& self.campaign == other.campaign
			&& self.adgroup == other.adgroup
			&& self.creative == other.creative
			&& self.click_label == other.click_label
			&& self.cost_type == other.cost_type
			&& self.cost_amount == other.cost_amount
			&& self.cost_currency == other.cost_currency
	}
}
