// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Global callback/partner parameters applied to every outgoing package.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Session-scoped callback and partner parameter maps.
///
/// These are merged into every outgoing package unless the package carries
/// its own event-scoped values, in which case the local values win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
	#[serde(default)]
	pub callback: BTreeMap<String, String>,
	#[serde(default)]
	pub partner: BTreeMap<String, String>,
}

impl SessionParameters {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.callback.is_empty() && self.partner.is_empty()
	}
}

/// Encodes a parameter map as the JSON object string carried on the wire.
/// Empty maps are omitted entirely, never sent as `{}`.
#[must_use]
pub fn encode_parameters(map: &BTreeMap<String, String>) -> Option<String> {
	if map.is_empty() {
		return None;
	}
	serde_json::to_string(map).ok()
}

/// Merges session-scoped and package-local parameters.
///
/// Local values take precedence; a key collision with a differing value
/// logs a warning. `label` names the parameter family in the log line.
#[must_use]
pub fn merge_parameters(
	global: &BTreeMap<String, String>,
	local: &BTreeMap<String, String>,
	label: &str,
) -> BTreeMap<String, String> {
	let mut merged = global.clone();
	for (key, value) in local {
		if let Some(previous) = merged.insert(key.clone(), value.clone()) {
			if &previous != value {
				warn!(key = %key, family = %label, "Local parameter overrides session parameter");
			}
		}
	}
	merged
}
