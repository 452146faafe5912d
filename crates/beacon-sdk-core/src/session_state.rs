// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted per-install session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::package::ReferrerSource;

/// Schema version of the persisted session state document.
pub const SCHEMA_VERSION: u32 = 1;

/// Most recent order IDs remembered for event deduplication.
pub const MAX_ORDER_IDS: usize = 10;

/// Saved install-referrer timestamps for one referrer source, used to
/// suppress re-sending identical referrer data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerTimestamps {
	pub click_time: Option<DateTime<Utc>>,
	pub install_begin: Option<DateTime<Utc>>,
}

/// Per-install session state. Owned and serialized by the session
/// coordinator; nothing else writes it.
///
/// Counters are monotonically non-decreasing while the state is not reset;
/// `uuid` is generated once and never changes; `gdpr_forgotten` is a
/// terminal one-way flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
	/// Schema version of this document.
	pub version: u32,
	/// Unique device-install identifier.
	pub uuid: String,
	pub enabled: bool,
	pub offline: bool,
	pub event_count: u64,
	pub session_count: u64,
	pub subsession_count: u64,
	pub session_length_ms: i64,
	pub time_spent_ms: i64,
	pub last_activity_at: Option<DateTime<Utc>>,
	/// Gap between the two most recent sessions.
	pub last_interval_ms: Option<i64>,
	/// Set once the backend confirms the first session package. Gates the
	/// install-specific backoff strategy.
	pub install_tracked: bool,
	pub asking_attribution: bool,
	pub gdpr_forgotten: bool,
	pub third_party_sharing_disabled: bool,
	pub push_token: Option<String>,
	#[serde(default)]
	order_ids: VecDeque<String>,
	#[serde(default)]
	pub google_play_referrer: ReferrerTimestamps,
	#[serde(default)]
	pub huawei_ads_referrer: ReferrerTimestamps,
	#[serde(default)]
	pub huawei_app_gallery_referrer: ReferrerTimestamps,
}

impl SessionState {
	/// Fresh state for a first-ever SDK start.
	#[must_use]
	pub fn new() -> Self {
		Self {
			version: SCHEMA_VERSION,
			uuid: Uuid::new_v4().to_string(),
			enabled: true,
			offline: false,
			event_count: 0,
			session_count: 0,
			subsession_count: 0,
			session_length_ms: 0,
			time_spent_ms: 0,
			last_activity_at: None,
			last_interval_ms: None,
			install_tracked: false,
			asking_attribution: false,
			gdpr_forgotten: false,
			third_party_sharing_disabled: false,
			push_token: None,
			order_ids: VecDeque::new(),
			google_play_referrer: ReferrerTimestamps::default(),
			huawei_ads_referrer: ReferrerTimestamps::default(),
			huawei_app_gallery_referrer: ReferrerTimestamps::default(),
		}
	}

	/// Remembers an order ID for deduplication.
	///
	/// Returns false if the ID is already known; the remembered list is not
	/// touched in that case. The list keeps the most recent
	/// [`MAX_ORDER_IDS`] entries, oldest evicted first.
	pub fn push_order_id(&mut self, order_id: &str) -> bool {
		if self.has_order_id(order_id) {
			return false;
		}
		if self.order_ids.len() >= MAX_ORDER_IDS {
			self.order_ids.pop_front();
		}
		self.order_ids.push_back(order_id.to_string());
		true
	}

	#[must_use]
	pub fn has_order_id(&self, order_id: &str) -> bool {
		self.order_ids.iter().any(|known| known == order_id)
	}

	#[must_use]
	pub fn order_id_count(&self) -> usize {
		self.order_ids.len()
	}

	/// Resets per-session accounting when a new session opens.
	pub fn reset_session_attributes(&mut self, now: DateTime<Utc>) {
		self.subsession_count = 1;
		self.session_length_ms = 0;
		self.time_spent_ms = 0;
		self.last_activity_at = Some(now);
	}

	#[must_use]
	pub fn referrer(&self, source: ReferrerSource) -> ReferrerTimestamps {
		match source {
			ReferrerSource::GooglePlay => self.google_play_referrer,
			ReferrerSource::HuaweiAds => self.huawei_ads_referrer,
			ReferrerSource::HuaweiAppGallery => self.huawei_app_gallery_referrer,
		}
	}

	pub fn set_referrer(&mut self, source: ReferrerSource, timestamps: ReferrerTimestamps) {
		match source {
			ReferrerSource::GooglePlay => self.google_play_referrer = timestamps,
			ReferrerSource::HuaweiAds => self.huawei_ads_referrer = timestamps,
			ReferrerSource::HuaweiAppGallery => self.huawei_app_gallery_referrer = timestamps,
		}
	}
}

impl Default for SessionState {
	fn default() -> Self {
		Self::new()
	}
}
