// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end pipeline scenarios against a scripted transport.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beacon_common_http::{Transport, TransportError};
use beacon_sdk::store::{FileStore, PACKAGE_QUEUE_FILE};
use beacon_sdk::{
	Event, FailureData, SdkClient, SdkConfig, SdkEnvironment, SdkListener, SuccessData,
};
use beacon_sdk_core::{ActivityKind, BackoffStrategy, Package, ResponseData};

/// Transport that replays scripted (status, body) pairs, then succeeds.
struct ScriptedTransport {
	script: Mutex<VecDeque<(u16, String)>>,
	sent: Mutex<Vec<(Package, BTreeMap<String, String>)>>,
}

impl ScriptedTransport {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			script: Mutex::new(VecDeque::new()),
			sent: Mutex::new(Vec::new()),
		})
	}

	fn push_response(&self, status: u16, body: &str) {
		self.script
			.lock()
			.unwrap()
			.push_back((status, body.to_string()));
	}

	fn sent(&self) -> Vec<Package> {
		self.sent.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
	}

	fn sent_of_kind(&self, kind: ActivityKind) -> Vec<Package> {
		self.sent().into_iter().filter(|p| p.kind == kind).collect()
	}
}

#[async_trait]
impl Transport for ScriptedTransport {
	async fn send(
		&self,
		package: &Package,
		sending: &BTreeMap<String, String>,
	) -> Result<ResponseData, TransportError> {
		self.sent
			.lock()
			.unwrap()
			.push((package.clone(), sending.clone()));
		let (status, body) = self
			.script
			.lock()
			.unwrap()
			.pop_front()
			.unwrap_or((200, "{}".to_string()));
		Ok(ResponseData::parse(package.kind, status, &body, false))
	}
}

#[derive(Default)]
struct RecordingListener {
	session_successes: AtomicUsize,
	session_failures: AtomicUsize,
	event_successes: AtomicUsize,
	event_failures: AtomicUsize,
	attributions: Mutex<Vec<beacon_sdk::Attribution>>,
	deeplinks: Mutex<Vec<String>>,
}

impl SdkListener for RecordingListener {
	fn session_success(&self, _data: SuccessData) {
		self.session_successes.fetch_add(1, Ordering::SeqCst);
	}

	fn session_failure(&self, _data: FailureData) {
		self.session_failures.fetch_add(1, Ordering::SeqCst);
	}

	fn event_success(&self, _data: SuccessData) {
		self.event_successes.fetch_add(1, Ordering::SeqCst);
	}

	fn event_failure(&self, _data: FailureData) {
		self.event_failures.fetch_add(1, Ordering::SeqCst);
	}

	fn attribution_changed(&self, attribution: beacon_sdk::Attribution) {
		self.attributions.lock().unwrap().push(attribution);
	}

	fn deferred_deeplink(&self, url: String) {
		self.deeplinks.lock().unwrap().push(url);
	}
}

fn test_config() -> SdkConfig {
	let mut config = SdkConfig::new("abc123def456", SdkEnvironment::Sandbox);
	// Scaled intervals so boundary tests run in milliseconds.
	config.session_interval = Duration::from_millis(300);
	config.subsession_interval = Duration::from_millis(50);
	config.delivery_strategy = BackoffStrategy::NO_WAIT;
	config.install_strategy = BackoffStrategy::NO_WAIT;
	config.click_strategy = BackoffStrategy::NO_WAIT;
	config
}

struct Harness {
	_dir: tempfile::TempDir,
	store: FileStore,
	transport: Arc<ScriptedTransport>,
	listener: Arc<RecordingListener>,
	client: SdkClient,
}

fn harness_with(config: SdkConfig) -> Harness {
	let dir = tempfile::tempdir().unwrap();
	let store = FileStore::new(dir.path()).unwrap();
	let transport = ScriptedTransport::new();
	let listener = Arc::new(RecordingListener::default());
	let client = SdkClient::builder()
		.config(config)
		.storage_dir(dir.path())
		.transport(Arc::clone(&transport) as Arc<dyn Transport>)
		.listener(Arc::clone(&listener) as Arc<dyn SdkListener>)
		.build()
		.unwrap();
	Harness {
		_dir: dir,
		store,
		transport,
		listener,
		client,
	}
}

fn harness() -> Harness {
	harness_with(test_config())
}

/// Polls until `predicate` holds or the timeout elapses.
async fn wait_until(predicate: impl Fn() -> bool) {
	for _ in 0..500 {
		if predicate() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("condition not reached within timeout");
}

#[tokio::test]
async fn test_first_launch_tracks_one_session() {
	let h = harness();
	h.client.on_resume().unwrap();

	wait_until(|| h.transport.sent_of_kind(ActivityKind::Session).len() == 1).await;
	wait_until(|| h.listener.session_successes.load(Ordering::SeqCst) == 1).await;

	let sessions = h.transport.sent_of_kind(ActivityKind::Session);
	assert_eq!(sessions[0].parameters.get("session_count").unwrap(), "1");
	assert_eq!(sessions[0].path, "/sessions");

	let state = h.store.load_session_state().unwrap();
	assert_eq!(state.session_count, 1);
	assert!(state.install_tracked);
}

#[tokio::test]
async fn test_first_event_carries_token_and_count() {
	let h = harness();
	h.client.on_resume().unwrap();
	h.client.track_event(Event::new("tok1")).unwrap();

	wait_until(|| h.transport.sent_of_kind(ActivityKind::Event).len() == 1).await;

	let events = h.transport.sent_of_kind(ActivityKind::Event);
	assert_eq!(events[0].parameters.get("event_token").unwrap(), "tok1");
	assert_eq!(events[0].parameters.get("event_count").unwrap(), "1");

	let state = h.store.load_session_state().unwrap();
	assert_eq!(state.event_count, 1);
}

#[tokio::test]
async fn test_will_retry_increments_counter_and_redelivers() {
	let h = harness();
	// First session attempt fails transiently, retry succeeds.
	h.transport.push_response(500, "{}");
	h.client.on_resume().unwrap();

	wait_until(|| h.transport.sent_of_kind(ActivityKind::Session).len() == 2).await;
	wait_until(|| h.listener.session_successes.load(Ordering::SeqCst) == 1).await;

	let sessions = h.transport.sent_of_kind(ActivityKind::Session);
	assert_eq!(sessions[0].retries, 0);
	assert_eq!(sessions[1].retries, 1);
	// Retries stayed invisible: no failure callback fired.
	assert_eq!(h.listener.session_failures.load(Ordering::SeqCst), 0);

	let state = h.store.load_session_state().unwrap();
	assert!(state.install_tracked);
}

#[tokio::test]
async fn test_validation_failures_never_enqueue() {
	let h = harness();
	h.client.on_resume().unwrap();
	wait_until(|| h.transport.sent_of_kind(ActivityKind::Session).len() == 1).await;

	h.client.track_event(Event::new("")).unwrap();
	let mut no_currency = Event::new("tok1");
	no_currency.revenue = Some(1.0);
	h.client.track_event(no_currency).unwrap();

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(h.transport.sent_of_kind(ActivityKind::Event).is_empty());
	assert_eq!(h.listener.event_failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_order_id_dropped() {
	let h = harness();
	h.client.on_resume().unwrap();
	wait_until(|| h.transport.sent_of_kind(ActivityKind::Session).len() == 1).await;

	let order = Event::new("tok1").with_order_id("order-1");
	h.client.track_event(order.clone()).unwrap();
	h.client.track_event(order).unwrap();

	wait_until(|| h.transport.sent_of_kind(ActivityKind::Event).len() == 1).await;
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(h.transport.sent_of_kind(ActivityKind::Event).len(), 1);

	let state = h.store.load_session_state().unwrap();
	assert_eq!(state.event_count, 1);
}

#[tokio::test]
async fn test_session_and_subsession_boundaries() {
	let h = harness();
	h.client.on_resume().unwrap();
	wait_until(|| h.store.load_session_state().is_some_and(|s| s.session_count == 1)).await;

	// Past the session interval: a new session opens.
	h.client.on_pause().unwrap();
	tokio::time::sleep(Duration::from_millis(400)).await;
	h.client.on_resume().unwrap();
	wait_until(|| h.store.load_session_state().is_some_and(|s| s.session_count == 2)).await;
	let state = h.store.load_session_state().unwrap();
	assert_eq!(state.subsession_count, 1);
	assert!(state.last_interval_ms.unwrap_or(0) >= 300);

	// Past the subsession interval only: same session, new subsession.
	h.client.on_pause().unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	h.client.on_resume().unwrap();
	wait_until(|| {
		h.store
			.load_session_state()
			.is_some_and(|s| s.subsession_count == 2)
	})
	.await;
	assert_eq!(h.store.load_session_state().unwrap().session_count, 2);

	// Too soon for either: nothing moves.
	h.client.on_pause().unwrap();
	h.client.on_resume().unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	let state = h.store.load_session_state().unwrap();
	assert_eq!(state.session_count, 2);
	assert_eq!(state.subsession_count, 2);

	assert_eq!(h.transport.sent_of_kind(ActivityKind::Session).len(), 2);
}

#[tokio::test]
async fn test_gdpr_forget_is_idempotent() {
	let h = harness();
	h.client.on_resume().unwrap();
	wait_until(|| h.transport.sent_of_kind(ActivityKind::Session).len() == 1).await;

	h.client.gdpr_forget_me().unwrap();
	h.client.gdpr_forget_me().unwrap();

	wait_until(|| h.transport.sent_of_kind(ActivityKind::Gdpr).len() == 1).await;
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(h.transport.sent_of_kind(ActivityKind::Gdpr).len(), 1);

	let state = h.store.load_session_state().unwrap();
	assert!(state.gdpr_forgotten);
	assert!(!state.enabled);

	// Forgotten devices track nothing further.
	h.client.track_event(Event::new("tok1")).unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(h.transport.sent_of_kind(ActivityKind::Event).is_empty());
}

#[tokio::test]
async fn test_offline_mode_gates_delivery() {
	let h = harness();
	h.client.on_resume().unwrap();
	wait_until(|| h.transport.sent_of_kind(ActivityKind::Session).len() == 1).await;

	h.client.set_offline_mode(true).unwrap();
	h.client.track_event(Event::new("tok1")).unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(h.transport.sent_of_kind(ActivityKind::Event).is_empty());
	// Queued durably, not dropped.
	assert_eq!(h.store.load_queue(PACKAGE_QUEUE_FILE).len(), 1);

	h.client.set_offline_mode(false).unwrap();
	wait_until(|| h.transport.sent_of_kind(ActivityKind::Event).len() == 1).await;
}

#[tokio::test]
async fn test_opt_out_disables_and_flushes() {
	let h = harness();
	h.transport
		.push_response(200, r#"{"tracking_state":"opted_out"}"#);
	h.client.on_resume().unwrap();

	wait_until(|| {
		h.store
			.load_session_state()
			.is_some_and(|s| !s.enabled)
	})
	.await;
	assert!(h.store.load_queue(PACKAGE_QUEUE_FILE).is_empty());

	h.client.track_event(Event::new("tok1")).unwrap();
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert!(h.transport.sent_of_kind(ActivityKind::Event).is_empty());
}

#[tokio::test]
async fn test_delayed_start_holds_and_remerges_parameters() {
	let mut config = test_config();
	config.delay_start = Some(Duration::from_millis(300));
	let h = harness_with(config);

	h.client.on_resume().unwrap();
	h.client
		.add_session_callback_param("channel", "organic")
		.unwrap();
	h.client
		.track_event(Event::new("tok1").with_callback_param("channel", "paid"))
		.unwrap();

	// Nothing leaves the queue while the delay holds.
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(h.transport.sent().is_empty());

	// After expiry the queue drains with re-merged parameters.
	wait_until(|| h.transport.sent_of_kind(ActivityKind::Event).len() == 1).await;
	let events = h.transport.sent_of_kind(ActivityKind::Event);
	assert_eq!(
		events[0].parameters.get("callback_params").unwrap(),
		r#"{"channel":"paid"}"#
	);
	let sessions = h.transport.sent_of_kind(ActivityKind::Session);
	assert_eq!(
		sessions[0].parameters.get("callback_params").unwrap(),
		r#"{"channel":"organic"}"#
	);
}

#[tokio::test]
async fn test_attribution_ask_in_loop_and_deeplink() {
	let h = harness();
	// Session response asks the SDK to query attribution shortly.
	h.transport.push_response(200, r#"{"ask_in":50}"#);
	// The attribution response carries the final payload and a deeplink.
	h.transport.push_response(
		200,
		r#"{"attribution":{"tracker_token":"abc","network":"Network","deeplink":"app://landing"}}"#,
	);
	h.client.on_resume().unwrap();

	wait_until(|| h.transport.sent_of_kind(ActivityKind::Attribution).len() == 1).await;
	let attributions = h.transport.sent_of_kind(ActivityKind::Attribution);
	assert_eq!(
		attributions[0].parameters.get("initiated_by").unwrap(),
		"backend"
	);

	wait_until(|| !h.listener.attributions.lock().unwrap().is_empty()).await;
	let seen = h.listener.attributions.lock().unwrap();
	assert_eq!(seen[0].tracker_token.as_deref(), Some("abc"));
	drop(seen);

	wait_until(|| !h.listener.deeplinks.lock().unwrap().is_empty()).await;
	assert_eq!(
		h.listener.deeplinks.lock().unwrap()[0],
		"app://landing"
	);

	// Attribution settled: the asking flag is lowered.
	wait_until(|| {
		h.store
			.load_session_state()
			.is_some_and(|s| !s.asking_attribution)
	})
	.await;
}

#[tokio::test]
async fn test_queue_survives_restart() {
	let dir = tempfile::tempdir().unwrap();
	let store = FileStore::new(dir.path()).unwrap();

	{
		// First run: the session package fails and schedules a long retry.
		let mut config = test_config();
		config.delivery_strategy = BackoffStrategy::LONG_WAIT;
		config.install_strategy = BackoffStrategy::LONG_WAIT;
		let transport = ScriptedTransport::new();
		transport.push_response(500, "{}");
		let client = SdkClient::builder()
			.config(config)
			.storage_dir(dir.path())
			.transport(Arc::clone(&transport) as Arc<dyn Transport>)
			.build()
			.unwrap();
		client.on_resume().unwrap();
		wait_until(|| {
			store
				.load_queue(PACKAGE_QUEUE_FILE)
				.first()
				.is_some_and(|p| p.retries == 1)
		})
		.await;
		client.shutdown().unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;
	}

	// Second run: the restored package goes out with its counter intact.
	let transport = ScriptedTransport::new();
	let client = SdkClient::builder()
		.config(test_config())
		.storage_dir(dir.path())
		.transport(Arc::clone(&transport) as Arc<dyn Transport>)
		.build()
		.unwrap();
	client.on_resume().unwrap();

	wait_until(|| !transport.sent_of_kind(ActivityKind::Session).is_empty()).await;
	let sessions = transport.sent_of_kind(ActivityKind::Session);
	assert_eq!(sessions[0].retries, 1);
	assert_eq!(sessions[0].parameters.get("session_count").unwrap(), "1");
	wait_until(|| store.load_queue(PACKAGE_QUEUE_FILE).is_empty()).await;
}

#[tokio::test]
async fn test_sending_parameters_include_sent_at_and_queue_size() {
	let h = harness();
	h.client.on_resume().unwrap();
	h.client.track_event(Event::new("tok1")).unwrap();
	h.client.track_event(Event::new("tok2")).unwrap();

	wait_until(|| h.transport.sent().len() >= 3).await;
	let sent = h.transport.sent.lock().unwrap().clone();
	for (_, sending) in &sent {
		assert!(sending.contains_key("sent_at"));
	}
	// At least one send went out with packages still waiting behind it.
	assert!(sent
		.iter()
		.any(|(_, sending)| sending.contains_key("queue_size")));
}
