// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SDK configuration. One explicit struct passed into the client builder;
//! no process-wide state.

use std::collections::BTreeMap;
use std::time::Duration;

use beacon_sdk_core::BackoffStrategy;

use crate::error::{Result, SdkError};

/// Expected app token length.
const APP_TOKEN_LEN: usize = 12;

/// Target backend environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkEnvironment {
	/// Test traffic, discarded by the backend.
	Sandbox,
	/// Live traffic.
	Production,
}

impl SdkEnvironment {
	#[must_use]
	pub fn as_str(&self) -> &'static str {
		match self {
			SdkEnvironment::Sandbox => "sandbox",
			SdkEnvironment::Production => "production",
		}
	}
}

/// Granular third-party-sharing settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThirdPartySharingOptions {
	/// Blanket grant or revocation; `None` leaves the blanket state alone.
	pub enabled: Option<bool>,
	/// Per-partner option maps.
	pub granular: BTreeMap<String, BTreeMap<String, String>>,
}

/// Actions requested by the host before the SDK started, applied in
/// priority order on the first-ever start.
#[derive(Debug, Clone, Default)]
pub struct PreLaunchActions {
	pub gdpr_forget_me: bool,
	pub disable_third_party_sharing: bool,
	pub measurement_consent: Option<bool>,
	pub third_party_sharing: Vec<ThirdPartySharingOptions>,
}

/// SDK configuration.
#[derive(Debug, Clone)]
pub struct SdkConfig {
	pub app_token: String,
	pub environment: SdkEnvironment,
	/// Keep delivering while the app is backgrounded.
	pub send_in_background: bool,
	/// Hold package sending for this long after start so the host can
	/// install session parameters first.
	pub delay_start: Option<Duration>,
	pub session_interval: Duration,
	pub subsession_interval: Duration,
	pub foreground_timer_start: Duration,
	pub foreground_timer_interval: Duration,
	pub background_timer_interval: Duration,
	pub default_tracker: Option<String>,
	pub external_device_id: Option<String>,
	/// Opt into cost data on attribution payloads.
	pub needs_cost: bool,
	/// Strategy for ordinary packages.
	pub delivery_strategy: BackoffStrategy,
	/// Strategy while the install session is unconfirmed.
	pub install_strategy: BackoffStrategy,
	/// Strategy for the click dispatcher.
	pub click_strategy: BackoffStrategy,
	pub pre_launch: PreLaunchActions,
}

impl SdkConfig {
	/// Configuration with production defaults.
	#[must_use]
	pub fn new(app_token: impl Into<String>, environment: SdkEnvironment) -> Self {
		Self {
			app_token: app_token.into(),
			environment,
			send_in_background: false,
			delay_start: None,
			session_interval: Duration::from_secs(30 * 60),
			subsession_interval: Duration::from_secs(1),
			foreground_timer_start: Duration::from_secs(60),
			foreground_timer_interval: Duration::from_secs(60),
			background_timer_interval: Duration::from_secs(60),
			default_tracker: None,
			external_device_id: None,
			needs_cost: false,
			delivery_strategy: BackoffStrategy::LONG_WAIT,
			install_strategy: BackoffStrategy::SHORT_WAIT,
			click_strategy: BackoffStrategy::LONG_WAIT,
			pre_launch: PreLaunchActions::default(),
		}
	}

	/// Rejects configurations the backend would not accept.
	pub fn validate(&self) -> Result<()> {
		if self.app_token.is_empty() {
			return Err(SdkError::InvalidConfig("missing app token".to_string()));
		}
		if self.app_token.len() != APP_TOKEN_LEN {
			return Err(SdkError::InvalidConfig(format!(
				"app token must be {APP_TOKEN_LEN} characters, got {}",
				self.app_token.len()
			)));
		}
		if self.subsession_interval > self.session_interval {
			return Err(SdkError::InvalidConfig(
				"subsession interval exceeds session interval".to_string(),
			));
		}
		Ok(())
	}
}
