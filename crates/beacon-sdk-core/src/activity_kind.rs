// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Activity kinds and their backend paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The kind of activity a package reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
	/// Session start (install or new session after the session interval).
	Session,
	/// Custom in-app event.
	Event,
	/// Click, install referrer or preinstall payload.
	Click,
	/// Attribution query.
	Attribution,
	/// GDPR forget-device request.
	Gdpr,
	/// Legacy one-shot third-party-sharing opt-out.
	DisableThirdPartySharing,
	/// Granular third-party-sharing settings.
	ThirdPartySharing,
	/// Measurement consent grant or revocation.
	MeasurementConsent,
	/// Ad revenue report.
	AdRevenue,
	/// Subscription purchase.
	Subscription,
	/// SDK info update (push token).
	Info,
}

impl ActivityKind {
	/// Backend path this kind of package is posted to.
	#[must_use]
	pub fn path(&self) -> &'static str {
		match self {
			ActivityKind::Session => "/sessions",
			ActivityKind::Event => "/events",
			ActivityKind::Click => "/sdk_clicks",
			ActivityKind::Attribution => "/attributions",
			ActivityKind::Gdpr => "/gdpr_forget_device",
			ActivityKind::DisableThirdPartySharing => "/disable_third_party_sharing",
			ActivityKind::ThirdPartySharing => "/third_party_sharing",
			ActivityKind::MeasurementConsent => "/measurement_consent",
			ActivityKind::AdRevenue => "/ad_revenue",
			ActivityKind::Subscription => "/v2/purchase",
			ActivityKind::Info => "/sdk_info",
		}
	}
}

impl fmt::Display for ActivityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ActivityKind::Session => write!(f, "session"),
			ActivityKind::Event => write!(f, "event"),
			ActivityKind::Click => write!(f, "click"),
			ActivityKind::Attribution => write!(f, "attribution"),
			ActivityKind::Gdpr => write!(f, "gdpr"),
			ActivityKind::DisableThirdPartySharing => write!(f, "disable_third_party_sharing"),
			ActivityKind::ThirdPartySharing => write!(f, "third_party_sharing"),
			ActivityKind::MeasurementConsent => write!(f, "measurement_consent"),
			ActivityKind::AdRevenue => write!(f, "ad_revenue"),
			ActivityKind::Subscription => write!(f, "subscription"),
			ActivityKind::Info => write!(f, "info"),
		}
	}
}

impl FromStr for ActivityKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"session" => Ok(ActivityKind::Session),
			"event" => Ok(ActivityKind::Event),
			"click" => Ok(ActivityKind::Click),
			"attribution" => Ok(ActivityKind::Attribution),
			"gdpr" => Ok(ActivityKind::Gdpr),
			"disable_third_party_sharing" => Ok(ActivityKind::DisableThirdPartySharing),
			"third_party_sharing" => Ok(ActivityKind::ThirdPartySharing),
			"measurement_consent" => Ok(ActivityKind::MeasurementConsent),
			"ad_revenue" => Ok(ActivityKind::AdRevenue),
			"subscription" => Ok(ActivityKind::Subscription),
			"info" => Ok(ActivityKind::Info),
			_ => Err(CoreError::Serialization(format!("unknown activity kind: {s}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	const ALL_KINDS: [ActivityKind; 11] = [
		ActivityKind::Session,
		ActivityKind::Event,
		ActivityKind::Click,
		ActivityKind::Attribution,
		ActivityKind::Gdpr,
		ActivityKind::DisableThirdPartySharing,
		ActivityKind::ThirdPartySharing,
		ActivityKind::MeasurementConsent,
		ActivityKind::AdRevenue,
		ActivityKind::Subscription,
		ActivityKind::Info,
	];

	#[test]
	fn test_paths_are_fixed() {
		assert_eq!(ActivityKind::Session.path(), "/sessions");
		assert_eq!(ActivityKind::Event.path(), "/events");
		assert_eq!(ActivityKind::Click.path(), "/sdk_clicks");
		assert_eq!(ActivityKind::Attribution.path(), "/attributions");
		assert_eq!(ActivityKind::Gdpr.path(), "/gdpr_forget_device");
		assert_eq!(ActivityKind::Subscription.path(), "/v2/purchase");
		assert_eq!(ActivityKind::Info.path(), "/sdk_info");
	}

	#[test]
	fn test_paths_are_distinct() {
		let mut seen = std::collections::HashSet::new();
		for kind in ALL_KINDS {
			assert!(seen.insert(kind.path()), "duplicate path for {kind}");
		}
	}

	#[test]
	fn test_unknown_kind_rejected() {
		assert!("bogus".parse::<ActivityKind>().is_err());
	}

	proptest! {
		#[test]
		fn activity_kind_roundtrip(kind in proptest::sample::select(&ALL_KINDS[..])) {
			let s = kind.to_string();
			let parsed: ActivityKind = s.parse().unwrap();
			prop_assert_eq!(kind, parsed);
		}
	}
}
