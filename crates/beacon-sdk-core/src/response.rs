// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsed backend replies and the retry decision they carry.

use serde_json::Value;

use crate::activity_kind::ActivityKind;
use crate::attribution::Attribution;

/// Server-driven tracking state sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
	/// The device opted out server-side; tracking must stop.
	OptedOut,
}

/// Parsed reply for one delivered package.
///
/// Created per exchange, consumed once by response routing, then dropped.
#[derive(Debug, Clone)]
pub struct ResponseData {
	pub kind: ActivityKind,
	pub success: bool,
	pub will_retry: bool,
	pub adid: Option<String>,
	pub message: Option<String>,
	pub timestamp: Option<String>,
	pub json_response: Value,
	pub tracking_state: Option<TrackingState>,
	pub attribution: Option<Attribution>,
	/// Server hint: re-ask for attribution after this many milliseconds.
	pub ask_in: Option<u64>,
	/// Server hint: retry this package after this many milliseconds.
	pub retry_in: Option<u64>,
	/// Server hint echoed for foreground pacing; logged, not acted upon.
	pub continue_in: Option<u64>,
}

impl ResponseData {
	/// Parses an HTTP exchange into a response.
	///
	/// Success requires a 2xx status without an opt-out sentinel. Transient
	/// statuses (408, 429, 5xx) and an explicit `retry_in` mark the response
	/// as retryable; other client errors are terminal.
	#[must_use]
	pub fn parse(kind: ActivityKind, status: u16, body: &str, with_cost: bool) -> Self {
		let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);

		let string = |key: &str| {
			json.get(key)
				.and_then(Value::as_str)
				.map(str::to_string)
		};
		let millis = |key: &str| json.get(key).and_then(Value::as_u64);

		let adid = string("adid");
		let message = string("message");
		let timestamp = string("timestamp");
		let ask_in = millis("ask_in");
		let retry_in = millis("retry_in");
		let continue_in = millis("continue_in");

		let tracking_state = match json.get("tracking_state").and_then(Value::as_str) {
			Some("opted_out") => Some(TrackingState::OptedOut),
			_ => None,
		};
		let attribution = json
			.get("attribution")
			.and_then(|value| Attribution::from_json(value, with_cost));

		let ok = (200..300).contains(&status);
		let success = ok && tracking_state.is_none();
		let will_retry = if tracking_state.is_some() || ok {
			false
		} else {
			retry_in.is_some() || matches!(status, 408 | 429 | 500..=599)
		};

		Self {
			kind,
			success,
			will_retry,
			adid,
			message,
			timestamp,
			json_response: json,
			tracking_state,
			attribution,
			ask_in,
			retry_in,
			continue_in,
		}
	}

	/// Response for an exchange that never reached the backend. Always
	/// retried.
	#[must_use]
	pub fn network_error(kind: ActivityKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			success: false,
			will_retry: true,
			adid: None,
			message: Some(message.into()),
			timestamp: None,
			json_response: Value::Null,
			tracking_state: None,
			attribution: None,
			ask_in: None,
			retry_in: None,
			continue_in: None,
		}
	}
}
