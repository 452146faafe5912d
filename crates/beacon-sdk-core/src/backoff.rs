// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry wait computation: exponential backoff with a ceiling and jitter.

use std::time::Duration;

/// A named backoff policy.
///
/// The wait before retry `r` is zero while `r < min_retries`, then
/// `min(max_wait, 2^(r - min_retries) * multiplier_ms)` scaled by a uniform
/// jitter factor drawn from `[jitter_min, jitter_max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy {
	/// Number of retries that wait zero time before backoff kicks in.
	pub min_retries: u32,
	/// Base multiplier in milliseconds.
	pub multiplier_ms: u64,
	/// Ceiling for the computed wait, applied before jitter.
	pub max_wait: Duration,
	/// Lower jitter bound, inclusive.
	pub jitter_min: f64,
	/// Upper jitter bound, exclusive.
	pub jitter_max: f64,
}

impl BackoffStrategy {
	/// Default strategy for ordinary packages.
	pub const LONG_WAIT: Self = Self {
		min_retries: 1,
		multiplier_ms: 2 * 60 * 1000,
		max_wait: Duration::from_secs(24 * 60 * 60),
		jitter_min: 0.5,
		jitter_max: 1.0,
	};

	/// Short strategy used while the install session is still unconfirmed.
	pub const SHORT_WAIT: Self = Self {
		min_retries: 1,
		multiplier_ms: 200,
		max_wait: Duration::from_secs(60 * 60),
		jitter_min: 0.5,
		jitter_max: 1.0,
	};

	/// Fast variant for tests exercising real waits.
	pub const TEST_WAIT: Self = Self {
		min_retries: 1,
		multiplier_ms: 200,
		max_wait: Duration::from_secs(1),
		jitter_min: 0.5,
		jitter_max: 1.0,
	};

	/// Effectively-zero waits for CI.
	pub const NO_WAIT: Self = Self {
		min_retries: 100,
		multiplier_ms: 1,
		max_wait: Duration::from_secs(1),
		jitter_min: 1.0,
		jitter_max: 1.0,
	};
}

/// Computes the wait before retry number `retries` under `strategy`.
#[must_use]
pub fn wait_for(retries: u32, strategy: &BackoffStrategy) -> Duration {
	if retries < strategy.min_retries {
		return Duration::ZERO;
	}

	let exponent = retries - strategy.min_retries;
	// Saturate the shift far past any sane ceiling instead of overflowing.
	let base_ms = if exponent >= 63 {
		u64::MAX
	} else {
		strategy.multiplier_ms.saturating_mul(1u64 << exponent)
	};
	let capped = Duration::from_millis(base_ms).min(strategy.max_wait);

	let jitter = if strategy.jitter_max > strategy.jitter_min {
		strategy.jitter_min + fastrand::f64() * (strategy.jitter_max - strategy.jitter_min)
	} else {
		strategy.jitter_min
	};

	capped.mul_f64(jitter)
}
