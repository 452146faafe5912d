// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stateless package construction from a state snapshot.
//!
//! The builder copies the counters it needs once; it never holds a live
//! reference to the coordinator's state. A parameter is only written when
//! its value is present and meaningful; absent values are omitted from the
//! wire map entirely.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::warn;

use beacon_sdk_core::{
	encode_parameters, merge_parameters, ActivityKind, ClickSource, Event, Package,
	SessionParameters, SessionState, Subscription,
};

use crate::config::{SdkConfig, ThirdPartySharingOptions};
use crate::device::DeviceIds;

/// Point-in-time copy of the session state a package reports.
#[derive(Debug, Clone)]
pub struct Snapshot {
	pub uuid: String,
	pub session_count: u64,
	pub subsession_count: u64,
	pub event_count: u64,
	pub session_length_ms: i64,
	pub time_spent_ms: i64,
	pub last_interval_ms: Option<i64>,
	pub push_token: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl Snapshot {
	#[must_use]
	pub fn of(state: &SessionState, now: DateTime<Utc>) -> Self {
		Self {
			uuid: state.uuid.clone(),
			session_count: state.session_count,
			subsession_count: state.subsession_count,
			event_count: state.event_count,
			session_length_ms: state.session_length_ms,
			time_spent_ms: state.time_spent_ms,
			last_interval_ms: state.last_interval_ms,
			push_token: state.push_token.clone(),
			created_at: now,
		}
	}
}

/// Builds one package per activity kind.
pub struct PackageBuilder<'a> {
	config: &'a SdkConfig,
	device: &'a DeviceIds,
	session_params: &'a SessionParameters,
	snapshot: Snapshot,
	in_delayed_start: bool,
}

/// Milliseconds to whole seconds with standard rounding.
#[must_use]
pub fn ms_to_seconds(ms: i64) -> i64 {
	(ms + 500) / 1000
}

fn add_string(map: &mut BTreeMap<String, String>, key: &str, value: &str) {
	if !value.is_empty() {
		map.insert(key.to_string(), value.to_string());
	}
}

fn add_opt(map: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
	if let Some(value) = value {
		add_string(map, key, value);
	}
}

fn add_count(map: &mut BTreeMap<String, String>, key: &str, value: u64) {
	map.insert(key.to_string(), value.to_string());
}

fn add_duration(map: &mut BTreeMap<String, String>, key: &str, ms: i64) {
	if ms >= 0 {
		map.insert(key.to_string(), ms_to_seconds(ms).to_string());
	}
}

fn add_bool(map: &mut BTreeMap<String, String>, key: &str, value: bool) {
	map.insert(key.to_string(), if value { "1" } else { "0" }.to_string());
}

fn add_time(map: &mut BTreeMap<String, String>, key: &str, value: Option<DateTime<Utc>>) {
	if let Some(value) = value {
		map.insert(
			key.to_string(),
			value.to_rfc3339_opts(SecondsFormat::Millis, true),
		);
	}
}

impl<'a> PackageBuilder<'a> {
	#[must_use]
	pub fn new(
		config: &'a SdkConfig,
		device: &'a DeviceIds,
		session_params: &'a SessionParameters,
		snapshot: Snapshot,
		in_delayed_start: bool,
	) -> Self {
		Self {
			config,
			device,
			session_params,
			snapshot,
			in_delayed_start,
		}
	}

	fn default_parameters(&self) -> BTreeMap<String, String> {
		let mut p = BTreeMap::new();
		add_string(&mut p, "app_token", &self.config.app_token);
		add_string(&mut p, "environment", self.config.environment.as_str());
		add_string(&mut p, "uuid", &self.snapshot.uuid);
		p.insert(
			"created_at".to_string(),
			self.snapshot
				.created_at
				.to_rfc3339_opts(SecondsFormat::Millis, true),
		);
		add_opt(&mut p, "advertising_id", self.device.advertising_id.as_deref());
		add_opt(&mut p, "device_id", self.device.device_id.as_deref());
		add_opt(&mut p, "push_token", self.snapshot.push_token.as_deref());
		add_opt(
			&mut p,
			"external_device_id",
			self.config.external_device_id.as_deref(),
		);
		if self.config.needs_cost {
			add_bool(&mut p, "needs_cost", true);
		}

		if !p.contains_key("advertising_id") && !p.contains_key("device_id") {
			warn!("Package carries no device identifier");
		}
		p
	}

	fn session_counters(&self, p: &mut BTreeMap<String, String>) {
		add_count(p, "session_count", self.snapshot.session_count);
		add_count(p, "subsession_count", self.snapshot.subsession_count);
		add_duration(p, "session_length", self.snapshot.session_length_ms);
		add_duration(p, "time_spent", self.snapshot.time_spent_ms);
		if let Some(last_interval) = self.snapshot.last_interval_ms {
			add_duration(p, "last_interval", last_interval);
		}
	}

	/// Applies callback/partner parameters. While in delayed start they
	/// ride on the package unflattened so the delivery queue can re-merge
	/// them once the global session parameters are final.
	fn finish(
		&self,
		mut package: Package,
		callback: BTreeMap<String, String>,
		partner: BTreeMap<String, String>,
	) -> Package {
		if self.in_delayed_start {
			package.callback_params = Some(callback);
			package.partner_params = Some(partner);
		} else {
			let merged = merge_parameters(&self.session_params.callback, &callback, "callback");
			if let Some(encoded) = encode_parameters(&merged) {
				package.parameters.insert("callback_params".to_string(), encoded);
			}
			let merged = merge_parameters(&self.session_params.partner, &partner, "partner");
			if let Some(encoded) = encode_parameters(&merged) {
				package.parameters.insert("partner_params".to_string(), encoded);
			}
		}
		package
	}

	#[must_use]
	pub fn session_package(&self) -> Package {
		let mut p = self.default_parameters();
		self.session_counters(&mut p);
		add_opt(&mut p, "default_tracker", self.config.default_tracker.as_deref());
		let package = Package::new(ActivityKind::Session, p);
		self.finish(package, BTreeMap::new(), BTreeMap::new())
	}

	#[must_use]
	pub fn event_package(&self, event: &Event) -> Package {
		let mut p = self.default_parameters();
		add_count(&mut p, "event_count", self.snapshot.event_count);
		add_string(&mut p, "event_token", &event.token);
		if let Some(revenue) = event.revenue {
			// Event revenue is rounded to 5 decimal places.
			p.insert("revenue".to_string(), format!("{revenue:.5}"));
			add_opt(&mut p, "currency", event.currency.as_deref());
		}
		add_opt(&mut p, "order_id", event.order_id.as_deref());
		let package = Package::new(ActivityKind::Event, p);
		self.finish(
			package,
			event.callback_params.clone(),
			event.partner_params.clone(),
		)
	}

	#[must_use]
	pub fn click_package(
		&self,
		source: &ClickSource,
		content: &str,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
	) -> Package {
		let mut p = self.default_parameters();
		self.session_counters(&mut p);
		match source {
			ClickSource::Deeplink => {
				add_string(&mut p, "source", "deeplink");
				add_string(&mut p, "deeplink", content);
			}
			ClickSource::Referrer(referrer) => {
				p.insert("source".to_string(), referrer.to_string());
				add_string(&mut p, "referrer", content);
			}
			ClickSource::Preinstall { location } => {
				add_string(&mut p, "source", "preinstall");
				add_string(&mut p, "location", location);
				add_string(&mut p, "payload", content);
			}
		}
		add_time(&mut p, "click_time", click_time);
		add_time(&mut p, "install_begin_time", install_begin);

		let mut package = Package::new(ActivityKind::Click, p);
		package.click_source = Some(source.clone());
		package.click_time = click_time;
		package.install_begin = install_begin;
		self.finish(package, BTreeMap::new(), BTreeMap::new())
	}

	#[must_use]
	pub fn attribution_package(&self, initiated_by: &str) -> Package {
		let mut p = self.default_parameters();
		add_string(&mut p, "initiated_by", initiated_by);
		Package::new(ActivityKind::Attribution, p)
	}

	#[must_use]
	pub fn gdpr_package(&self) -> Package {
		Package::new(ActivityKind::Gdpr, self.default_parameters())
	}

	#[must_use]
	pub fn disable_third_party_sharing_package(&self) -> Package {
		Package::new(ActivityKind::DisableThirdPartySharing, self.default_parameters())
	}

	#[must_use]
	pub fn third_party_sharing_package(&self, options: &ThirdPartySharingOptions) -> Package {
		let mut p = self.default_parameters();
		if let Some(enabled) = options.enabled {
			add_bool(&mut p, "sharing", enabled);
		}
		if !options.granular.is_empty() {
			if let Ok(encoded) = serde_json::to_string(&options.granular) {
				p.insert("granular_third_party_sharing_options".to_string(), encoded);
			}
		}
		Package::new(ActivityKind::ThirdPartySharing, p)
	}

	#[must_use]
	pub fn measurement_consent_package(&self, consent: bool) -> Package {
		let mut p = self.default_parameters();
		add_string(
			&mut p,
			"measurement",
			if consent { "enable" } else { "disable" },
		);
		Package::new(ActivityKind::MeasurementConsent, p)
	}

	#[must_use]
	pub fn ad_revenue_package(&self, source: &str, payload: &Value) -> Package {
		let mut p = self.default_parameters();
		add_string(&mut p, "source", source);
		if !payload.is_null() {
			// Ad revenue rides as the raw payload; amounts stay unrounded.
			p.insert("payload".to_string(), payload.to_string());
		}
		let package = Package::new(ActivityKind::AdRevenue, p);
		self.finish(package, BTreeMap::new(), BTreeMap::new())
	}

	#[must_use]
	pub fn subscription_package(&self, subscription: &Subscription) -> Package {
		let mut p = self.default_parameters();
		add_string(&mut p, "sku", &subscription.sku);
		p.insert("price".to_string(), subscription.price.to_string());
		add_string(&mut p, "currency", &subscription.currency);
		add_opt(&mut p, "order_id", subscription.order_id.as_deref());
		add_time(&mut p, "purchase_time", subscription.purchase_time);
		let package = Package::new(ActivityKind::Subscription, p);
		self.finish(
			package,
			subscription.callback_params.clone(),
			subscription.partner_params.clone(),
		)
	}

	#[must_use]
	pub fn info_package(&self, source: &str) -> Package {
		let mut p = self.default_parameters();
		add_string(&mut p, "source", source);
		Package::new(ActivityKind::Info, p)
	}
}
