// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The unit of work queued for delivery to the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::activity_kind::ActivityKind;

/// Referrer API a click payload was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerSource {
	/// The Google Play install referrer API.
	GooglePlay,
	/// Huawei Ads install referrer.
	HuaweiAds,
	/// Huawei AppGallery install referrer.
	HuaweiAppGallery,
}

impl fmt::Display for ReferrerSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReferrerSource::GooglePlay => write!(f, "google_play"),
			ReferrerSource::HuaweiAds => write!(f, "huawei_ads"),
			ReferrerSource::HuaweiAppGallery => write!(f, "huawei_app_gallery"),
		}
	}
}

/// Where a click package originated. Drives the success side effect in the
/// click dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickSource {
	/// In-app deeplink open.
	Deeplink,
	/// Install referrer payload.
	Referrer(ReferrerSource),
	/// Preinstall payload baked into a system location.
	Preinstall { location: String },
}

/// An immutable-once-built unit of work bound for the backend.
///
/// Parameters are fixed after construction; the only later writes are the
/// retry counter and the delivery queue's re-merge of global session
/// parameters for packages built during delayed start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
	pub kind: ActivityKind,
	pub path: String,
	pub parameters: BTreeMap<String, String>,
	/// Event-scoped callback parameters, kept unflattened while global
	/// session parameters are not yet known (delayed start).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub callback_params: Option<BTreeMap<String, String>>,
	/// Event-scoped partner parameters, same lifecycle as `callback_params`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub partner_params: Option<BTreeMap<String, String>>,
	#[serde(default)]
	pub retries: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub click_source: Option<ClickSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub click_time: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub install_begin: Option<DateTime<Utc>>,
}

impl Package {
	/// Creates a package of `kind` with its fixed backend path.
	#[must_use]
	pub fn new(kind: ActivityKind, parameters: BTreeMap<String, String>) -> Self {
		Self {
			kind,
			path: kind.path().to_string(),
			parameters,
			callback_params: None,
			partner_params: None,
			retries: 0,
			click_source: None,
			click_time: None,
			install_begin: None,
		}
	}

	/// Increments and returns the retry counter. The counter only grows.
	pub fn increment_retries(&mut self) -> u32 {
		self.retries += 1;
		self.retries
	}

	/// Short description for log lines.
	#[must_use]
	pub fn suffix(&self) -> String {
		match self.kind {
			ActivityKind::Event => match self.parameters.get("event_token") {
				Some(token) => format!("event {token}"),
				None => "event".to_string(),
			},
			kind => kind.to_string(),
		}
	}
}
