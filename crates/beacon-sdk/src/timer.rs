// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cancellable timers that feed actor mailboxes.
//!
//! A fire is nothing more than a closure invocation; owners pass a closure
//! that submits a message to their own mailbox, so fires are serialized
//! with every other message the actor handles.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// One-shot timer. Re-arming replaces any previously scheduled fire.
pub struct OneShotTimer {
	name: &'static str,
	handle: Option<JoinHandle<()>>,
	fire_at: Option<Instant>,
}

impl OneShotTimer {
	#[must_use]
	pub fn new(name: &'static str) -> Self {
		Self {
			name,
			handle: None,
			fire_at: None,
		}
	}

	/// Arms the timer, replacing any pending fire.
	pub fn start_in<F>(&mut self, delay: Duration, on_fire: F)
	where
		F: FnOnce() + Send + 'static,
	{
		self.cancel();
		let fire_at = Instant::now() + delay;
		self.fire_at = Some(fire_at);
		debug!(timer = self.name, delay_ms = delay.as_millis() as u64, "Timer armed");
		self.handle = Some(tokio::spawn(async move {
			tokio::time::sleep_until(fire_at).await;
			on_fire();
		}));
	}

	/// Discards any pending fire.
	pub fn cancel(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
			debug!(timer = self.name, "Timer cancelled");
		}
		self.fire_at = None;
	}

	/// True while a fire is scheduled and has not happened yet.
	#[must_use]
	pub fn is_pending(&self) -> bool {
		self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
	}

	/// Scheduled fire instant, while pending.
	#[must_use]
	pub fn fire_at(&self) -> Option<Instant> {
		if self.is_pending() {
			self.fire_at
		} else {
			None
		}
	}
}

impl Drop for OneShotTimer {
	fn drop(&mut self) {
		self.cancel();
	}
}

/// Cyclic timer: fires after an initial delay, then every period until
/// suspended.
pub struct CycleTimer {
	name: &'static str,
	handle: Option<JoinHandle<()>>,
}

impl CycleTimer {
	#[must_use]
	pub fn new(name: &'static str) -> Self {
		Self { name, handle: None }
	}

	/// Starts the cycle, replacing any running one.
	pub fn start<F>(&mut self, initial: Duration, period: Duration, on_fire: F)
	where
		F: Fn() + Send + 'static,
	{
		self.suspend();
		debug!(timer = self.name, period_ms = period.as_millis() as u64, "Cycle started");
		self.handle = Some(tokio::spawn(async move {
			tokio::time::sleep(initial).await;
			loop {
				on_fire();
				tokio::time::sleep(period).await;
			}
		}));
	}

	/// Stops firing until the next `start`.
	pub fn suspend(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
			debug!(timer = self.name, "Cycle suspended");
		}
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
	}
}

impl Drop for CycleTimer {
	fn drop(&mut self) {
		self.suspend();
	}
}
