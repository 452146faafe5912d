// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Click/referrer dispatcher: the delivery queue's sibling for click,
//! referrer and preinstall packages.
//!
//! Same discipline (ordered queue, one exchange at a time, retry with
//! backoff) with three differences: it is not gated by delayed start, a
//! referrer send is re-validated against the pending table right before it
//! goes out, and a delivered click triggers a side effect specific to its
//! origin. The transport call is awaited inline: it blocks this actor,
//! nobody else.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beacon_common_http::{RetryableError, Transport};
use beacon_sdk_core::{wait_for, BackoffStrategy, ClickSource, Package, ResponseData};

use crate::config::SdkConfig;
use crate::coordinator::CoordinatorHandle;
use crate::delivery::sending_parameters;
use crate::store::{ClickState, FileStore, CLICK_QUEUE_FILE, CLICK_STATE_FILE};

/// Preinstall source locations, one bit each in the read-bitmask.
const PREINSTALL_LOCATIONS: [&str; 5] = [
	"system_properties",
	"content_provider",
	"system_installer",
	"file_system",
	"default",
];

fn location_bit(location: &str) -> Option<u8> {
	PREINSTALL_LOCATIONS
		.iter()
		.position(|known| *known == location)
		.map(|index| 1u8 << index)
}

/// Commands handled by the click dispatcher actor.
pub enum ClickCommand {
	/// Append a deeplink or preinstall click.
	Enqueue(Package),
	/// Append a referrer click and register its content as pending.
	EnqueueReferrer(Package),
	SendFirst,
	/// Retry wait elapsed.
	SendNext,
	Pause,
	Resume,
	Teardown,
}

/// Handle submitting commands to the click dispatcher.
#[derive(Clone)]
pub struct ClickHandle {
	tx: mpsc::UnboundedSender<ClickCommand>,
}

impl ClickHandle {
	pub fn enqueue(&self, package: Package) {
		let _ = self.tx.send(ClickCommand::Enqueue(package));
	}

	pub fn enqueue_referrer(&self, package: Package) {
		let _ = self.tx.send(ClickCommand::EnqueueReferrer(package));
	}

	pub fn send_first(&self) {
		let _ = self.tx.send(ClickCommand::SendFirst);
	}

	pub fn pause(&self) {
		let _ = self.tx.send(ClickCommand::Pause);
	}

	pub fn resume(&self) {
		let _ = self.tx.send(ClickCommand::Resume);
	}

	pub fn teardown(&self) {
		let _ = self.tx.send(ClickCommand::Teardown);
	}
}

pub(crate) struct ClickDispatcher {
	store: FileStore,
	transport: Arc<dyn Transport>,
	coordinator: CoordinatorHandle,
	strategy: BackoffStrategy,
	queue: Vec<Package>,
	state: ClickState,
	paused: bool,
	/// Set while a retry wait is pending; send requests no-op meanwhile.
	retry_waiting: bool,
	tx: mpsc::UnboundedSender<ClickCommand>,
}

impl ClickDispatcher {
	/// Restores the persisted click queue and starts the actor, paused.
	pub fn spawn(
		store: FileStore,
		transport: Arc<dyn Transport>,
		coordinator: CoordinatorHandle,
		config: &SdkConfig,
	) -> ClickHandle {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let queue = store.load_queue(CLICK_QUEUE_FILE);
		if !queue.is_empty() {
			info!(count = queue.len(), "Restored click queue");
		}
		let state = store.load::<ClickState>(CLICK_STATE_FILE).unwrap_or_default();
		let mut actor = Self {
			store,
			transport,
			coordinator,
			strategy: config.click_strategy,
			queue,
			state,
			paused: true,
			retry_waiting: false,
			tx: tx.clone(),
		};
		tokio::spawn(async move {
			while let Some(command) = rx.recv().await {
				if actor.handle(command).await {
					break;
				}
			}
			debug!("Click dispatcher stopped");
		});
		ClickHandle { tx }
	}

	fn persist_queue(&self) {
		self.store.save_queue(CLICK_QUEUE_FILE, &self.queue);
	}

	fn persist_state(&self) {
		self.store.save(CLICK_STATE_FILE, &self.state);
	}

	/// Returns true on teardown.
	async fn handle(&mut self, command: ClickCommand) -> bool {
		match command {
			ClickCommand::Enqueue(package) => {
				debug!(size = self.queue.len() + 1, "Click queued");
				self.queue.push(package);
				self.persist_queue();
			}
			ClickCommand::EnqueueReferrer(package) => {
				if let (Some(ClickSource::Referrer(source)), Some(content)) =
					(&package.click_source, package.parameters.get("referrer"))
				{
					self.state.pending.insert(source.to_string(), content.clone());
					self.persist_state();
				}
				self.queue.push(package);
				self.persist_queue();
			}
			ClickCommand::SendFirst => self.drain().await,
			ClickCommand::SendNext => {
				self.retry_waiting = false;
				self.drain().await;
			}
			ClickCommand::Pause => self.paused = true,
			ClickCommand::Resume => self.paused = false,
			ClickCommand::Teardown => return true,
		}
		false
	}

	/// Sends queued clicks head-first until the queue runs dry, sending
	/// fails transiently, or the dispatcher is paused.
	async fn drain(&mut self) {
		if self.retry_waiting {
			return;
		}
		while !self.paused {
			let Some(package) = self.queue.first().cloned() else {
				break;
			};
			if !self.still_valid(&package) {
				debug!(package = %package.suffix(), "Skipping stale click");
				self.queue.remove(0);
				self.persist_queue();
				continue;
			}

			let sending = sending_parameters(self.queue.len() - 1);
			info!(package = %package.suffix(), "Sending click");
			let response = match self.transport.send(&package, &sending).await {
				Ok(response) => response,
				Err(e) => {
					warn!(error = %e, "Click transport error");
					let mut response = ResponseData::network_error(package.kind, e.to_string());
					response.will_retry = e.is_retryable();
					response
				}
			};

			if response.will_retry {
				if let Some(head) = self.queue.first_mut() {
					let retries = head.increment_retries();
					let wait = response
						.retry_in
						.map(Duration::from_millis)
						.unwrap_or_else(|| wait_for(retries, &self.strategy));
					self.persist_queue();
					info!(retries, wait_ms = wait.as_millis() as u64, "Click failed, will retry");
					self.retry_waiting = true;
					let tx = self.tx.clone();
					tokio::spawn(async move {
						tokio::time::sleep(wait).await;
						let _ = tx.send(ClickCommand::SendNext);
					});
				}
				break;
			}

			let package = self.queue.remove(0);
			self.persist_queue();
			if response.success {
				self.apply_side_effect(&package);
			}
			self.coordinator.response(response);
		}
	}

	/// A queued referrer may have been superseded, and a preinstall
	/// location consumed, while this package waited.
	fn still_valid(&self, package: &Package) -> bool {
		match &package.click_source {
			Some(ClickSource::Referrer(source)) => {
				let content = package.parameters.get("referrer");
				self.state.pending.get(&source.to_string()) == content
			}
			Some(ClickSource::Preinstall { location }) => match location_bit(location) {
				Some(bit) => self.state.preinstall_mask & bit == 0,
				None => {
					warn!(location = %location, "Unknown preinstall location");
					true
				}
			},
			_ => true,
		}
	}

	fn apply_side_effect(&mut self, package: &Package) {
		match &package.click_source {
			Some(ClickSource::Referrer(source)) => {
				self.state.pending.remove(&source.to_string());
				self.persist_state();
				self.coordinator
					.click_delivered(*source, package.click_time, package.install_begin);
			}
			Some(ClickSource::Preinstall { location }) => {
				if let Some(bit) = location_bit(location) {
					self.state.preinstall_mask |= bit;
					self.persist_state();
				}
			}
			_ => {}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SdkEnvironment;
	use crate::coordinator::{self, CoordinatorMsg};
	use async_trait::async_trait;
	use beacon_sdk_core::{ActivityKind, ReferrerSource};
	use std::collections::BTreeMap;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct RecordingTransport {
		sent: std::sync::Mutex<Vec<Package>>,
		started: AtomicUsize,
		status: u16,
	}

	impl RecordingTransport {
		fn new(status: u16) -> Self {
			Self {
				sent: std::sync::Mutex::new(Vec::new()),
				started: AtomicUsize::new(0),
				status,
			}
		}
	}

	#[async_trait]
	impl Transport for RecordingTransport {
		async fn send(
			&self,
			package: &Package,
			_sending: &BTreeMap<String, String>,
		) -> Result<ResponseData, beacon_common_http::TransportError> {
			self.started.fetch_add(1, Ordering::SeqCst);
			self.sent.lock().unwrap().push(package.clone());
			Ok(ResponseData::parse(package.kind, self.status, "{}", false))
		}
	}

	fn config() -> SdkConfig {
		let mut config = SdkConfig::new("abc123def456", SdkEnvironment::Sandbox);
		config.click_strategy = BackoffStrategy::NO_WAIT;
		config
	}

	fn spawn_dispatcher(
		transport: Arc<RecordingTransport>,
	) -> (
		tempfile::TempDir,
		FileStore,
		ClickHandle,
		mpsc::UnboundedReceiver<CoordinatorMsg>,
	) {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path()).unwrap();
		let (coordinator, rx) = coordinator::channel();
		let handle = ClickDispatcher::spawn(store.clone(), transport, coordinator, &config());
		(dir, store, handle, rx)
	}

	fn referrer_package(source: ReferrerSource, content: &str) -> Package {
		let mut parameters = BTreeMap::new();
		parameters.insert("referrer".to_string(), content.to_string());
		let mut package = Package::new(ActivityKind::Click, parameters);
		package.click_source = Some(ClickSource::Referrer(source));
		package
	}

	fn preinstall_package(location: &str) -> Package {
		let mut parameters = BTreeMap::new();
		parameters.insert("payload".to_string(), "tracker=preload".to_string());
		let mut package = Package::new(ActivityKind::Click, parameters);
		package.click_source = Some(ClickSource::Preinstall {
			location: location.to_string(),
		});
		package
	}

	#[tokio::test]
	async fn test_superseded_referrer_skipped() {
		let transport = Arc::new(RecordingTransport::new(200));
		let (_dir, _store, handle, _rx) = spawn_dispatcher(Arc::clone(&transport));

		// The second registration supersedes the first's pending content.
		handle.enqueue_referrer(referrer_package(ReferrerSource::GooglePlay, "first"));
		handle.enqueue_referrer(referrer_package(ReferrerSource::GooglePlay, "second"));
		handle.resume();
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(100)).await;

		let sent = transport.sent.lock().unwrap().clone();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].parameters.get("referrer").unwrap(), "second");
	}

	#[tokio::test]
	async fn test_delivered_referrer_removed_from_pending_and_reported() {
		let transport = Arc::new(RecordingTransport::new(200));
		let (_dir, store, handle, mut rx) = spawn_dispatcher(Arc::clone(&transport));

		handle.enqueue_referrer(referrer_package(ReferrerSource::HuaweiAds, "content"));
		handle.resume();
		handle.send_first();

		let mut saw_click_delivered = false;
		for _ in 0..2 {
			match tokio::time::timeout(Duration::from_secs(5), rx.recv())
				.await
				.unwrap()
				.unwrap()
			{
				CoordinatorMsg::ClickDelivered { source, .. } => {
					assert_eq!(source, ReferrerSource::HuaweiAds);
					saw_click_delivered = true;
				}
				CoordinatorMsg::Response(response) => assert!(response.success),
				_ => {}
			}
		}
		assert!(saw_click_delivered);

		let state: ClickState = store.load(CLICK_STATE_FILE).unwrap();
		assert!(state.pending.is_empty());
	}

	#[tokio::test]
	async fn test_preinstall_location_marked_read_once() {
		let transport = Arc::new(RecordingTransport::new(200));
		let (_dir, store, handle, _rx) = spawn_dispatcher(Arc::clone(&transport));

		handle.enqueue(preinstall_package("system_properties"));
		handle.resume();
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(100)).await;

		let state: ClickState = store.load(CLICK_STATE_FILE).unwrap();
		assert_ne!(state.preinstall_mask & 1, 0);

		// The same location queued again is skipped without a send.
		handle.enqueue(preinstall_package("system_properties"));
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(transport.started.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_retry_then_pause_independent_of_delivery() {
		let transport = Arc::new(RecordingTransport::new(503));
		let (_dir, store, handle, _rx) = spawn_dispatcher(Arc::clone(&transport));

		handle.enqueue_referrer(referrer_package(ReferrerSource::GooglePlay, "content"));
		handle.resume();
		handle.send_first();
		tokio::time::sleep(Duration::from_millis(100)).await;

		// Retries keep the package queued with a growing counter.
		let persisted = store.load_queue(CLICK_QUEUE_FILE);
		assert_eq!(persisted.len(), 1);
		assert!(persisted[0].retries >= 1);

		handle.pause();
		tokio::time::sleep(Duration::from_millis(50)).await;
		let paused_at = transport.started.load(Ordering::SeqCst);
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(transport.started.load(Ordering::SeqCst), paused_at);
	}
}
