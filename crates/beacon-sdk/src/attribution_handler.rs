// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Attribution resolution: a single-flight, timer-driven request loop.
//!
//! The resolver never makes attribution wait longer than an already-armed
//! check, and never preempts a sooner pending one. Pausing blocks the send,
//! not the timer arming; a fire that lands while paused is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use beacon_common_http::{RetryableError, Transport};
use beacon_sdk_core::{Package, ResponseData};

use crate::coordinator::CoordinatorHandle;
use crate::delivery::sending_parameters;
use crate::timer::OneShotTimer;

/// Commands handled by the attribution resolver actor.
pub enum AttributionCommand {
	/// Ask the backend now (reason `sdk`).
	RequestNow,
	/// Ask the backend after a delay.
	RequestAfter { delay_ms: u64, from_backend: bool },
	/// The armed timer fired.
	Fire,
	/// The coordinator built the attribution package to send.
	Send(Box<Package>),
	/// Result of the in-flight exchange.
	HandleResponse(Box<ResponseData>),
	Pause,
	Resume,
	Teardown,
}

/// Handle submitting commands to the attribution resolver.
#[derive(Clone)]
pub struct AttributionHandle {
	tx: mpsc::UnboundedSender<AttributionCommand>,
}

impl AttributionHandle {
	pub fn request_now(&self) {
		let _ = self.tx.send(AttributionCommand::RequestNow);
	}

	pub fn request_after(&self, delay_ms: u64, from_backend: bool) {
		let _ = self.tx.send(AttributionCommand::RequestAfter {
			delay_ms,
			from_backend,
		});
	}

	pub fn send_package(&self, package: Package) {
		let _ = self.tx.send(AttributionCommand::Send(Box::new(package)));
	}

	pub fn pause(&self) {
		let _ = self.tx.send(AttributionCommand::Pause);
	}

	pub fn resume(&self) {
		let _ = self.tx.send(AttributionCommand::Resume);
	}

	pub fn teardown(&self) {
		let _ = self.tx.send(AttributionCommand::Teardown);
	}
}

pub(crate) struct AttributionResolver {
	transport: Arc<dyn Transport>,
	coordinator: CoordinatorHandle,
	timer: OneShotTimer,
	paused: bool,
	in_flight: bool,
	reason: Option<&'static str>,
	tx: mpsc::UnboundedSender<AttributionCommand>,
}

impl AttributionResolver {
	pub fn spawn(transport: Arc<dyn Transport>, coordinator: CoordinatorHandle) -> AttributionHandle {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let mut actor = Self {
			transport,
			coordinator,
			timer: OneShotTimer::new("attribution"),
			paused: true,
			in_flight: false,
			reason: None,
			tx: tx.clone(),
		};
		tokio::spawn(async move {
			while let Some(command) = rx.recv().await {
				if actor.handle(command) {
					break;
				}
			}
			debug!("Attribution resolver stopped");
		});
		AttributionHandle { tx }
	}

	/// Returns true on teardown.
	fn handle(&mut self, command: AttributionCommand) -> bool {
		match command {
			AttributionCommand::RequestNow => self.request_after(0, false),
			AttributionCommand::RequestAfter {
				delay_ms,
				from_backend,
			} => self.request_after(delay_ms, from_backend),
			AttributionCommand::Fire => self.fire(),
			AttributionCommand::Send(package) => self.send(*package),
			AttributionCommand::HandleResponse(response) => {
				self.in_flight = false;
				self.coordinator.response(*response);
			}
			AttributionCommand::Pause => self.paused = true,
			AttributionCommand::Resume => self.paused = false,
			AttributionCommand::Teardown => {
				self.timer.cancel();
				return true;
			}
		}
		false
	}

	fn request_after(&mut self, delay_ms: u64, from_backend: bool) {
		let delay = Duration::from_millis(delay_ms);
		if let Some(fire_at) = self.timer.fire_at() {
			// Never lengthen an already-armed sooner check.
			if fire_at <= Instant::now() + delay {
				debug!(delay_ms, "Attribution check already pending sooner");
				return;
			}
		}
		self.reason = Some(if from_backend { "backend" } else { "sdk" });
		debug!(delay_ms, "Waiting to query attribution");
		let tx = self.tx.clone();
		self.timer.start_in(delay, move || {
			let _ = tx.send(AttributionCommand::Fire);
		});
	}

	fn fire(&mut self) {
		if self.paused {
			debug!("Attribution timer fired while paused");
			return;
		}
		if self.in_flight {
			return;
		}
		let reason = self.reason.take().unwrap_or("sdk");
		self.in_flight = true;
		self.coordinator.attribution_requested(reason);
	}

	fn send(&mut self, package: Package) {
		if self.paused {
			self.in_flight = false;
			return;
		}
		let transport = Arc::clone(&self.transport);
		let tx = self.tx.clone();
		tokio::spawn(async move {
			let response = match transport.send(&package, &sending_parameters(0)).await {
				Ok(response) => response,
				Err(e) => {
					warn!(error = %e, "Attribution transport error");
					let mut response = ResponseData::network_error(package.kind, e.to_string());
					response.will_retry = e.is_retryable();
					response
				}
			};
			let _ = tx.send(AttributionCommand::HandleResponse(Box::new(response)));
		});
	}
}
