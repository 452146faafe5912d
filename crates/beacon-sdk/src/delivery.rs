// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable, ordered, single-flight package delivery.
//!
//! The queue is an actor: one task drains its mailbox in FIFO order. At
//! most one HTTP exchange is in flight at a time; a `SendFirst` arriving
//! while one is in flight is a no-op. The queue is persisted after every
//! mutation so a process restart resumes with no lost or duplicated
//! packages.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beacon_common_http::{RetryableError, Transport};
use beacon_sdk_core::{
	encode_parameters, merge_parameters, wait_for, ActivityKind, BackoffStrategy, Package,
	ResponseData, SessionParameters,
};

use crate::config::SdkConfig;
use crate::coordinator::CoordinatorHandle;
use crate::store::{FileStore, PACKAGE_QUEUE_FILE};

/// Commands handled by the delivery queue actor.
pub enum DeliveryCommand {
	/// Append and persist; no send side effect.
	Add(Package),
	/// Attempt to send the head package.
	SendFirst,
	/// Clear the in-flight flag and attempt the head (retry wait elapsed).
	SendNext,
	/// Result of the in-flight exchange.
	HandleResponse(Box<ResponseData>),
	/// Re-merge global session parameters into every queued package.
	UpdatePackages(Box<SessionParameters>),
	/// Drop every queued package.
	Flush,
	Pause,
	Resume,
	/// The backend confirmed the install; stop using the install strategy.
	InstallTracked,
	Teardown,
}

/// Handle submitting commands to the delivery queue.
#[derive(Clone)]
pub struct DeliveryHandle {
	tx: mpsc::UnboundedSender<DeliveryCommand>,
}

impl DeliveryHandle {
	pub fn add(&self, package: Package) {
		let _ = self.tx.send(DeliveryCommand::Add(package));
	}

	pub fn send_first(&self) {
		let _ = self.tx.send(DeliveryCommand::SendFirst);
	}

	pub fn update_packages(&self, params: SessionParameters) {
		let _ = self.tx.send(DeliveryCommand::UpdatePackages(Box::new(params)));
	}

	pub fn flush(&self) {
		let _ = self.tx.send(DeliveryCommand::Flush);
	}

	pub fn pause(&self) {
		let _ = self.tx.send(DeliveryCommand::Pause);
	}

	pub fn resume(&self) {
		let _ = self.tx.send(DeliveryCommand::Resume);
	}

	pub fn install_tracked(&self) {
		let _ = self.tx.send(DeliveryCommand::InstallTracked);
	}

	pub fn teardown(&self) {
		let _ = self.tx.send(DeliveryCommand::Teardown);
	}
}

/// Send-time parameters attached next to the package's own.
pub(crate) fn sending_parameters(remaining: usize) -> BTreeMap<String, String> {
	let mut sending = BTreeMap::new();
	sending.insert(
		"sent_at".to_string(),
		Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
	);
	if remaining > 0 {
		sending.insert("queue_size".to_string(), remaining.to_string());
	}
	sending
}

pub(crate) struct DeliveryQueue {
	store: FileStore,
	transport: Arc<dyn Transport>,
	coordinator: CoordinatorHandle,
	default_strategy: BackoffStrategy,
	install_strategy: BackoffStrategy,
	queue: Vec<Package>,
	paused: bool,
	in_flight: bool,
	install_tracked: bool,
	tx: mpsc::UnboundedSender<DeliveryCommand>,
}

impl DeliveryQueue {
	/// Restores the persisted queue and starts the actor. The queue starts
	/// paused; the coordinator resumes it once gating flags are known.
	pub fn spawn(
		store: FileStore,
		transport: Arc<dyn Transport>,
		coordinator: CoordinatorHandle,
		config: &SdkConfig,
		install_tracked: bool,
	) -> DeliveryHandle {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let queue = store.load_queue(PACKAGE_QUEUE_FILE);
		if !queue.is_empty() {
			info!(count = queue.len(), "Restored package queue");
		}
		let mut actor = Self {
			store,
			transport,
			coordinator,
			default_strategy: config.delivery_strategy,
			install_strategy: config.install_strategy,
			queue,
			paused: true,
			in_flight: false,
			install_tracked,
			tx: tx.clone(),
		};
		tokio::spawn(async move {
			while let Some(command) = rx.recv().await {
				if actor.handle(command) {
					break;
				}
			}
			debug!("Delivery queue stopped");
		});
		DeliveryHandle { tx }
	}

	fn persist(&self) {
		self.store.save_queue(PACKAGE_QUEUE_FILE, &self.queue);
	}

	/// Returns true on teardown.
	fn handle(&mut self, command: DeliveryCommand) -> bool {
		match command {
			DeliveryCommand::Add(package) => {
				debug!(package = %package.suffix(), size = self.queue.len() + 1, "Package queued");
				self.queue.push(package);
				self.persist();
			}
			DeliveryCommand::SendFirst => self.try_send_head(),
			DeliveryCommand::SendNext => {
				self.in_flight = false;
				self.try_send_head();
			}
			DeliveryCommand::HandleResponse(response) => self.handle_response(*response),
			DeliveryCommand::UpdatePackages(params) => self.update_packages(&params),
			DeliveryCommand::Flush => {
				info!(count = self.queue.len(), "Flushing package queue");
				self.queue.clear();
				self.persist();
			}
			DeliveryCommand::Pause => self.paused = true,
			DeliveryCommand::Resume => self.paused = false,
			DeliveryCommand::InstallTracked => self.install_tracked = true,
			DeliveryCommand::Teardown => return true,
		}
		false
	}

	fn try_send_head(&mut self) {
		if self.paused || self.in_flight {
			return;
		}
		let Some(package) = self.queue.first().cloned() else {
			return;
		};
		self.in_flight = true;
		let sending = sending_parameters(self.queue.len() - 1);
		info!(package = %package.suffix(), "Sending package");

		let transport = Arc::clone(&self.transport);
		let tx = self.tx.clone();
		tokio::spawn(async move {
			let response = match transport.send(&package, &sending).await {
				Ok(response) => response,
				Err(e) => {
					warn!(package = %package.suffix(), error = %e, "Transport error");
					let mut response = ResponseData::network_error(package.kind, e.to_string());
					response.will_retry = e.is_retryable();
					response
				}
			};
			let _ = tx.send(DeliveryCommand::HandleResponse(Box::new(response)));
		});
	}

	fn handle_response(&mut self, response: ResponseData) {
		if response.will_retry {
			let Some(head) = self.queue.first_mut() else {
				self.in_flight = false;
				return;
			};
			let retries = head.increment_retries();
			let unconfirmed_install =
				head.kind == ActivityKind::Session && !self.install_tracked;
			let strategy = if unconfirmed_install {
				&self.install_strategy
			} else {
				&self.default_strategy
			};
			let wait = response
				.retry_in
				.map(Duration::from_millis)
				.unwrap_or_else(|| wait_for(retries, strategy));
			let suffix = head.suffix();
			self.persist();
			info!(
				package = %suffix,
				retries,
				wait_ms = wait.as_millis() as u64,
				"Package failed, will retry"
			);
			// In-flight stays set until the wait elapses; SendFirst in the
			// meantime is a no-op.
			let tx = self.tx.clone();
			tokio::spawn(async move {
				tokio::time::sleep(wait).await;
				let _ = tx.send(DeliveryCommand::SendNext);
			});
		} else {
			self.in_flight = false;
			if !self.queue.is_empty() {
				let package = self.queue.remove(0);
				debug!(package = %package.suffix(), "Package finished");
			}
			self.persist();
			self.coordinator.response(response);
			self.try_send_head();
		}
	}

	/// Re-merges the now-current global parameters into queued packages.
	/// Only packages built during delayed start carry unflattened local
	/// maps to merge against.
	fn update_packages(&mut self, params: &SessionParameters) {
		for package in &mut self.queue {
			if let Some(local) = &package.callback_params {
				match encode_parameters(&merge_parameters(&params.callback, local, "callback")) {
					Some(encoded) => {
						package.parameters.insert("callback_params".to_string(), encoded)
					}
					None => package.parameters.remove("callback_params"),
				};
			}
			if let Some(local) = &package.partner_params {
				match encode_parameters(&merge_parameters(&params.partner, local, "partner")) {
					Some(encoded) => {
						package.parameters.insert("partner_params".to_string(), encoded)
					}
					None => package.parameters.remove("partner_params"),
				};
			}
		}
		debug!(count = self.queue.len(), "Re-merged session parameters into queue");
		self.persist();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SdkEnvironment;
	use crate::coordinator::{self, CoordinatorMsg};
	use async_trait::async_trait;
	use std::collections::VecDeque;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::sync::Mutex;
	use tokio::sync::Notify;

	struct ScriptedTransport {
		responses: Mutex<VecDeque<ResponseData>>,
		sent: std::sync::Mutex<Vec<Package>>,
		started: AtomicUsize,
		gate: Option<Notify>,
	}

	impl ScriptedTransport {
		fn new(responses: Vec<ResponseData>) -> Self {
			Self {
				responses: Mutex::new(responses.into()),
				sent: std::sync::Mutex::new(Vec::new()),
				started: AtomicUsize::new(0),
				gate: None,
			}
		}

		fn gated(responses: Vec<ResponseData>) -> Self {
			Self {
				gate: Some(Notify::new()),
				..Self::new(responses)
			}
		}

		fn sent_kinds(&self) -> Vec<ActivityKind> {
			self.sent.lock().unwrap().iter().map(|p| p.kind).collect()
		}
	}

	#[async_trait]
	impl Transport for ScriptedTransport {
		async fn send(
			&self,
			package: &Package,
			_sending: &BTreeMap<String, String>,
		) -> Result<ResponseData, beacon_common_http::TransportError> {
			self.started.fetch_add(1, Ordering::SeqCst);
			if let Some(gate) = &self.gate {
				gate.notified().await;
			}
			self.sent.lock().unwrap().push(package.clone());
			let response = self.responses.lock().await.pop_front().unwrap_or_else(|| {
				ResponseData::parse(package.kind, 200, "{}", false)
			});
			Ok(response)
		}
	}

	fn no_wait_config() -> SdkConfig {
		let mut config = SdkConfig::new("abc123def456", SdkEnvironment::Sandbox);
		config.delivery_strategy = BackoffStrategy::NO_WAIT;
		config.install_strategy = BackoffStrategy::NO_WAIT;
		config
	}

	fn spawn_queue(
		transport: Arc<ScriptedTransport>,
	) -> (
		tempfile::TempDir,
		FileStore,
		DeliveryHandle,
		mpsc::UnboundedReceiver<CoordinatorMsg>,
	) {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path()).unwrap();
		let (coordinator, rx) = coordinator::channel();
		let handle = DeliveryQueue::spawn(
			store.clone(),
			transport,
			coordinator,
			&no_wait_config(),
			true,
		);
		(dir, store, handle, rx)
	}

	async fn next_response(rx: &mut mpsc::UnboundedReceiver<CoordinatorMsg>) -> ResponseData {
		loop {
			let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
				.await
				.expect("timed out waiting for coordinator message")
				.expect("coordinator channel closed");
			if let CoordinatorMsg::Response(response) = msg {
				return *response;
			}
		}
	}

	fn package(kind: ActivityKind) -> Package {
		Package::new(kind, BTreeMap::new())
	}

	#[tokio::test]
	async fn test_add_has_no_send_side_effect() {
		let transport = Arc::new(ScriptedTransport::new(vec![]));
		let (_dir, store, handle, _rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert_eq!(transport.started.load(Ordering::SeqCst), 0);
		assert_eq!(store.load_queue(PACKAGE_QUEUE_FILE).len(), 1);
	}

	#[tokio::test]
	async fn test_fifo_order_and_chaining() {
		let transport = Arc::new(ScriptedTransport::new(vec![]));
		let (_dir, store, handle, mut rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		handle.add(package(ActivityKind::Event));
		handle.add(package(ActivityKind::Info));
		handle.resume();
		handle.send_first();

		// One send_first drains the whole queue, head first.
		for _ in 0..3 {
			next_response(&mut rx).await;
		}
		assert_eq!(
			transport.sent_kinds(),
			vec![ActivityKind::Session, ActivityKind::Event, ActivityKind::Info]
		);
		assert!(store.load_queue(PACKAGE_QUEUE_FILE).is_empty());
	}

	#[tokio::test]
	async fn test_single_flight() {
		let transport = Arc::new(ScriptedTransport::gated(vec![]));
		let (_dir, _store, handle, mut rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		handle.add(package(ActivityKind::Event));
		handle.resume();
		handle.send_first();
		handle.send_first();
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(100)).await;

		// Only the head exchange started despite repeated send requests.
		assert_eq!(transport.started.load(Ordering::SeqCst), 1);

		transport.gate.as_ref().unwrap().notify_one();
		next_response(&mut rx).await;
		transport.gate.as_ref().unwrap().notify_one();
		next_response(&mut rx).await;
		assert_eq!(transport.started.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_will_retry_keeps_head_and_increments_counter() {
		let retry = ResponseData::parse(ActivityKind::Session, 500, "{}", false);
		let transport = Arc::new(ScriptedTransport::new(vec![retry]));
		let (_dir, store, handle, mut rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		handle.resume();
		handle.send_first();

		// Retry happens (NO_WAIT strategy), then the default success pops.
		let response = next_response(&mut rx).await;
		assert!(response.success);
		assert_eq!(transport.started.load(Ordering::SeqCst), 2);

		// The retried package went out with its counter incremented.
		let sent = transport.sent.lock().unwrap().clone();
		assert_eq!(sent[0].retries, 0);
		assert_eq!(sent[1].retries, 1);
		assert!(store.load_queue(PACKAGE_QUEUE_FILE).is_empty());
	}

	#[tokio::test]
	async fn test_retry_counter_persisted() {
		let retry = ResponseData::parse(ActivityKind::Session, 503, "{}", false);
		let transport = Arc::new(ScriptedTransport::gated(vec![retry]));
		let (_dir, store, handle, _rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		handle.resume();
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(50)).await;
		transport.gate.as_ref().unwrap().notify_one();
		tokio::time::sleep(Duration::from_millis(100)).await;

		let persisted = store.load_queue(PACKAGE_QUEUE_FILE);
		assert_eq!(persisted.len(), 1);
		assert_eq!(persisted[0].retries, 1);
	}

	#[tokio::test]
	async fn test_pause_gates_sending() {
		let transport = Arc::new(ScriptedTransport::new(vec![]));
		let (_dir, _store, handle, mut rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		// Spawned paused; send_first must no-op.
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(transport.started.load(Ordering::SeqCst), 0);

		handle.resume();
		handle.send_first();
		next_response(&mut rx).await;
		assert_eq!(transport.started.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_flush_clears_queue() {
		let transport = Arc::new(ScriptedTransport::new(vec![]));
		let (_dir, store, handle, _rx) = spawn_queue(Arc::clone(&transport));

		handle.add(package(ActivityKind::Session));
		handle.add(package(ActivityKind::Event));
		handle.flush();
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert!(store.load_queue(PACKAGE_QUEUE_FILE).is_empty());
	}

	#[tokio::test]
	async fn test_update_packages_remerges_delayed_params() {
		let transport = Arc::new(ScriptedTransport::new(vec![]));
		let (_dir, store, handle, _rx) = spawn_queue(Arc::clone(&transport));

		// A package built during delayed start carries unflattened params.
		let mut delayed = package(ActivityKind::Event);
		let mut local = BTreeMap::new();
		local.insert("channel".to_string(), "paid".to_string());
		delayed.callback_params = Some(local);
		delayed.partner_params = Some(BTreeMap::new());
		handle.add(delayed);

		let mut params = SessionParameters::default();
		params.callback.insert("channel".to_string(), "organic".to_string());
		params.callback.insert("cohort".to_string(), "beta".to_string());
		params.partner.insert("pid".to_string(), "42".to_string());
		handle.update_packages(params);
		tokio::time::sleep(Duration::from_millis(50)).await;

		let persisted = store.load_queue(PACKAGE_QUEUE_FILE);
		assert_eq!(
			persisted[0].parameters.get("callback_params").unwrap(),
			r#"{"channel":"paid","cohort":"beta"}"#
		);
		assert_eq!(
			persisted[0].parameters.get("partner_params").unwrap(),
			r#"{"pid":"42"}"#
		);
	}
}
