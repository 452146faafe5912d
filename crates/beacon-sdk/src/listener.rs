// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host-facing completion callbacks.
//!
//! Each package reaches its terminal outcome exactly once, and exactly one
//! callback fires for it; retries are invisible to the listener.

use serde_json::Value;

use beacon_sdk_core::{Attribution, ResponseData};

/// Payload for a delivered session or event.
#[derive(Debug, Clone)]
pub struct SuccessData {
	pub message: Option<String>,
	pub timestamp: Option<String>,
	pub adid: Option<String>,
	pub json_response: Value,
}

/// Payload for a package that failed without a further retry.
#[derive(Debug, Clone)]
pub struct FailureData {
	pub message: Option<String>,
	pub timestamp: Option<String>,
	pub adid: Option<String>,
	pub json_response: Value,
}

impl SuccessData {
	pub(crate) fn from_response(response: &ResponseData) -> Self {
		Self {
			message: response.message.clone(),
			timestamp: response.timestamp.clone(),
			adid: response.adid.clone(),
			json_response: response.json_response.clone(),
		}
	}
}

impl FailureData {
	pub(crate) fn from_response(response: &ResponseData) -> Self {
		Self {
			message: response.message.clone(),
			timestamp: response.timestamp.clone(),
			adid: response.adid.clone(),
			json_response: response.json_response.clone(),
		}
	}
}

/// Callbacks invoked by the coordinator on completion events.
///
/// Implementations must not block; they run on the coordinator's task.
pub trait SdkListener: Send + Sync {
	fn session_success(&self, _data: SuccessData) {}
	fn session_failure(&self, _data: FailureData) {}
	fn event_success(&self, _data: SuccessData) {}
	fn event_failure(&self, _data: FailureData) {}
	fn attribution_changed(&self, _attribution: Attribution) {}
	fn deferred_deeplink(&self, _url: String) {}
}

/// Listener that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl SdkListener for NoopListener {}
