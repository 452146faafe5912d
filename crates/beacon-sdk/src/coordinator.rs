// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The session coordinator: owner of the session state machine.
//!
//! One actor owns the persisted [`SessionState`], the transient gating
//! flags, the session/subsession timing algorithm, and the routing of every
//! server response back into listeners, referrer bookkeeping and the
//! attribution resolver. The queue actors talk back to it exclusively
//! through [`CoordinatorHandle`] messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beacon_common_http::Transport;
use beacon_sdk_core::{
	ActivityKind, Attribution, ClickSource, Event, Package, ReferrerSource, ReferrerTimestamps,
	ResponseData, SessionParameters, SessionState, Subscription, TrackingState,
};

use crate::attribution_handler::{AttributionHandle, AttributionResolver};
use crate::builder::{PackageBuilder, Snapshot};
use crate::click::{ClickDispatcher, ClickHandle};
use crate::config::{SdkConfig, ThirdPartySharingOptions};
use crate::delivery::{DeliveryHandle, DeliveryQueue};
use crate::device::{DeviceIds, PreinstallReader, ReferrerProbe};
use crate::listener::{FailureData, SdkListener, SuccessData};
use crate::store::{FileStore, SdkPrefs, PREFS_FILE, SESSION_PARAMS_FILE};
use crate::timer::{CycleTimer, OneShotTimer};

/// Delay-start ceiling; longer configured delays are clamped.
const MAX_DELAY_START: Duration = Duration::from_secs(10);

/// Messages handled by the coordinator actor.
pub enum CoordinatorMsg {
	/// The app came to the foreground.
	Resume,
	/// The app went to the background.
	Pause,
	TrackEvent(Box<Event>),
	SetEnabled(bool),
	SetOfflineMode(bool),
	GdprForgetMe,
	DisableThirdPartySharing,
	TrackThirdPartySharing(Box<ThirdPartySharingOptions>),
	TrackMeasurementConsent(bool),
	TrackAdRevenue { source: String, payload: Value },
	TrackSubscription(Box<Subscription>),
	SetPushToken(String),
	AddSessionCallbackParam { key: String, value: String },
	RemoveSessionCallbackParam(String),
	AddSessionPartnerParam { key: String, value: String },
	RemoveSessionPartnerParam(String),
	/// A referrer payload surfaced by a platform provider.
	SendReferrer {
		source: ReferrerSource,
		content: String,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
	},
	/// The host app was opened through a deeplink.
	LaunchDeeplink { url: String },
	ForegroundTimerFired,
	BackgroundTimerFired,
	DelayStartFinished,
	/// The attribution resolver wants a package built and handed back.
	AttributionRequested { initiated_by: &'static str },
	/// Terminal response for a delivered package.
	Response(Box<ResponseData>),
	/// A referrer click was accepted by the backend.
	ClickDelivered {
		source: ReferrerSource,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
	},
	Teardown,
}

/// Handle submitting messages to the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
	tx: mpsc::UnboundedSender<CoordinatorMsg>,
}

/// Creates the coordinator mailbox.
pub(crate) fn channel() -> (CoordinatorHandle, mpsc::UnboundedReceiver<CoordinatorMsg>) {
	let (tx, rx) = mpsc::unbounded_channel();
	(CoordinatorHandle { tx }, rx)
}

impl CoordinatorHandle {
	fn send(&self, msg: CoordinatorMsg) -> bool {
		self.tx.send(msg).is_ok()
	}

	pub fn on_resume(&self) -> bool {
		self.send(CoordinatorMsg::Resume)
	}

	pub fn on_pause(&self) -> bool {
		self.send(CoordinatorMsg::Pause)
	}

	pub fn track_event(&self, event: Event) -> bool {
		self.send(CoordinatorMsg::TrackEvent(Box::new(event)))
	}

	pub fn set_enabled(&self, enabled: bool) -> bool {
		self.send(CoordinatorMsg::SetEnabled(enabled))
	}

	pub fn set_offline_mode(&self, offline: bool) -> bool {
		self.send(CoordinatorMsg::SetOfflineMode(offline))
	}

	pub fn gdpr_forget_me(&self) -> bool {
		self.send(CoordinatorMsg::GdprForgetMe)
	}

	pub fn disable_third_party_sharing(&self) -> bool {
		self.send(CoordinatorMsg::DisableThirdPartySharing)
	}

	pub fn track_third_party_sharing(&self, options: ThirdPartySharingOptions) -> bool {
		self.send(CoordinatorMsg::TrackThirdPartySharing(Box::new(options)))
	}

	pub fn track_measurement_consent(&self, consent: bool) -> bool {
		self.send(CoordinatorMsg::TrackMeasurementConsent(consent))
	}

	pub fn track_ad_revenue(&self, source: impl Into<String>, payload: Value) -> bool {
		self.send(CoordinatorMsg::TrackAdRevenue {
			source: source.into(),
			payload,
		})
	}

	pub fn track_subscription(&self, subscription: Subscription) -> bool {
		self.send(CoordinatorMsg::TrackSubscription(Box::new(subscription)))
	}

	pub fn set_push_token(&self, token: impl Into<String>) -> bool {
		self.send(CoordinatorMsg::SetPushToken(token.into()))
	}

	pub fn add_session_callback_param(
		&self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> bool {
		self.send(CoordinatorMsg::AddSessionCallbackParam {
			key: key.into(),
			value: value.into(),
		})
	}

	pub fn remove_session_callback_param(&self, key: impl Into<String>) -> bool {
		self.send(CoordinatorMsg::RemoveSessionCallbackParam(key.into()))
	}

	pub fn add_session_partner_param(
		&self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> bool {
		self.send(CoordinatorMsg::AddSessionPartnerParam {
			key: key.into(),
			value: value.into(),
		})
	}

	pub fn remove_session_partner_param(&self, key: impl Into<String>) -> bool {
		self.send(CoordinatorMsg::RemoveSessionPartnerParam(key.into()))
	}

	pub fn send_referrer(
		&self,
		source: ReferrerSource,
		content: impl Into<String>,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
	) -> bool {
		self.send(CoordinatorMsg::SendReferrer {
			source,
			content: content.into(),
			click_time,
			install_begin,
		})
	}

	pub fn launch_deeplink(&self, url: impl Into<String>) -> bool {
		self.send(CoordinatorMsg::LaunchDeeplink { url: url.into() })
	}

	pub fn teardown(&self) -> bool {
		self.send(CoordinatorMsg::Teardown)
	}

	pub(crate) fn foreground_timer_fired(&self) {
		self.send(CoordinatorMsg::ForegroundTimerFired);
	}

	pub(crate) fn background_timer_fired(&self) {
		self.send(CoordinatorMsg::BackgroundTimerFired);
	}

	pub(crate) fn delay_start_finished(&self) {
		self.send(CoordinatorMsg::DelayStartFinished);
	}

	pub(crate) fn attribution_requested(&self, initiated_by: &'static str) {
		self.send(CoordinatorMsg::AttributionRequested { initiated_by });
	}

	pub(crate) fn response(&self, response: ResponseData) {
		self.send(CoordinatorMsg::Response(Box::new(response)));
	}

	pub(crate) fn click_delivered(
		&self,
		source: ReferrerSource,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
	) {
		self.send(CoordinatorMsg::ClickDelivered {
			source,
			click_time,
			install_begin,
		});
	}
}

/// Transient gating flags, rebuilt on every start.
#[derive(Debug, Clone)]
struct InternalState {
	enabled: bool,
	offline: bool,
	in_background: bool,
	in_delayed_start: bool,
	needs_package_update: bool,
	is_first_launch: bool,
	session_response_processed: bool,
	first_sdk_start_occurred: bool,
	preinstall_read: bool,
}

pub(crate) struct Coordinator {
	config: SdkConfig,
	store: FileStore,
	listener: Arc<dyn SdkListener>,
	device: DeviceIds,
	referrer_probe: Option<Arc<dyn ReferrerProbe>>,
	preinstall_reader: Option<Arc<dyn PreinstallReader>>,
	delivery: DeliveryHandle,
	click: ClickHandle,
	attribution: AttributionHandle,
	/// `None` until the first-ever session opens.
	state: Option<SessionState>,
	internal: InternalState,
	session_params: SessionParameters,
	prefs: SdkPrefs,
	foreground_timer: CycleTimer,
	background_timer: OneShotTimer,
	delay_timer: OneShotTimer,
	handle: CoordinatorHandle,
}

impl Coordinator {
	/// Restores persisted state, wires the queue actors and starts the
	/// coordinator. Must run inside a Tokio runtime.
	#[allow(clippy::too_many_arguments)]
	pub fn spawn(
		config: SdkConfig,
		store: FileStore,
		transport: Arc<dyn Transport>,
		listener: Arc<dyn SdkListener>,
		device: DeviceIds,
		referrer_probe: Option<Arc<dyn ReferrerProbe>>,
		preinstall_reader: Option<Arc<dyn PreinstallReader>>,
	) -> CoordinatorHandle {
		let (handle, mut rx) = channel();

		let state = store.load_session_state();
		let install_tracked = state.as_ref().is_some_and(|s| s.install_tracked);
		let delivery = DeliveryQueue::spawn(
			store.clone(),
			Arc::clone(&transport),
			handle.clone(),
			&config,
			install_tracked,
		);
		let click = ClickDispatcher::spawn(
			store.clone(),
			Arc::clone(&transport),
			handle.clone(),
			&config,
		);
		let attribution = AttributionResolver::spawn(transport, handle.clone());

		let session_params = store.load(SESSION_PARAMS_FILE).unwrap_or_default();
		let prefs = store.load(PREFS_FILE).unwrap_or_default();
		let internal = InternalState {
			enabled: state.as_ref().map_or(true, |s| s.enabled),
			offline: state.as_ref().is_some_and(|s| s.offline),
			in_background: true,
			in_delayed_start: false,
			needs_package_update: false,
			is_first_launch: state.is_none(),
			session_response_processed: false,
			first_sdk_start_occurred: state.is_some(),
			preinstall_read: false,
		};

		let mut actor = Self {
			config,
			store,
			listener,
			device,
			referrer_probe,
			preinstall_reader,
			delivery,
			click,
			attribution,
			state,
			internal,
			session_params,
			prefs,
			foreground_timer: CycleTimer::new("foreground"),
			background_timer: OneShotTimer::new("background"),
			delay_timer: OneShotTimer::new("delay_start"),
			handle: handle.clone(),
		};
		tokio::spawn(async move {
			actor.init();
			while let Some(msg) = rx.recv().await {
				if actor.handle_msg(msg) {
					break;
				}
			}
			debug!("Coordinator stopped");
		});
		handle
	}

	fn init(&mut self) {
		debug!(
			first_start = !self.internal.first_sdk_start_occurred,
			"Coordinator initialized"
		);
		if let Some(delay) = self.config.delay_start {
			let delay = if delay > MAX_DELAY_START {
				warn!(
					requested_ms = delay.as_millis() as u64,
					max_ms = MAX_DELAY_START.as_millis() as u64,
					"Delay start clamped"
				);
				MAX_DELAY_START
			} else {
				delay
			};
			info!(delay_ms = delay.as_millis() as u64, "Delaying package sending");
			self.internal.in_delayed_start = true;
			self.internal.needs_package_update = true;
			let handle = self.handle.clone();
			self.delay_timer.start_in(delay, move || {
				handle.delay_start_finished();
			});
		}
	}

	fn persist_state(&self) {
		if let Some(state) = &self.state {
			self.store.save_session_state(state);
		}
	}

	fn persist_session_params(&self) {
		self.store.save(SESSION_PARAMS_FILE, &self.session_params);
	}

	fn persist_prefs(&self) {
		self.store.save(PREFS_FILE, &self.prefs);
	}

	fn snapshot_builder(&self, now: DateTime<Utc>) -> Option<PackageBuilder<'_>> {
		let state = self.state.as_ref()?;
		Some(PackageBuilder::new(
			&self.config,
			&self.device,
			&self.session_params,
			Snapshot::of(state, now),
			self.internal.in_delayed_start,
		))
	}

	fn enqueue(&self, package: Package) {
		self.delivery.add(package);
		self.delivery.send_first();
	}

	/// Delivery is gated by offline mode, delayed start, and the enabled
	/// flag, except that a forgotten device may still drain its GDPR
	/// farewell package.
	fn delivery_paused(&self) -> bool {
		if self.internal.offline || self.internal.in_delayed_start {
			return true;
		}
		if self.internal.enabled {
			return false;
		}
		!self.state.as_ref().is_some_and(|s| s.gdpr_forgotten)
	}

	/// Clicks and attribution ignore delayed start.
	fn clicks_paused(&self) -> bool {
		self.internal.offline || !self.internal.enabled
	}

	fn update_handler_status(&mut self) {
		if self.clicks_paused() {
			self.click.pause();
			self.attribution.pause();
		} else {
			self.click.resume();
			self.attribution.resume();
			self.click.send_first();
		}
		if self.delivery_paused() {
			self.delivery.pause();
		} else {
			self.delivery.resume();
			self.delivery.send_first();
		}
	}

	/// Returns true on teardown.
	fn handle_msg(&mut self, msg: CoordinatorMsg) -> bool {
		let now = Utc::now();
		match msg {
			CoordinatorMsg::Resume => self.on_resume(now),
			CoordinatorMsg::Pause => self.on_pause(now),
			CoordinatorMsg::TrackEvent(event) => self.track_event(*event, now),
			CoordinatorMsg::SetEnabled(enabled) => self.set_enabled(enabled, now),
			CoordinatorMsg::SetOfflineMode(offline) => self.set_offline_mode(offline),
			CoordinatorMsg::GdprForgetMe => self.gdpr_forget_me(now),
			CoordinatorMsg::DisableThirdPartySharing => self.disable_third_party_sharing(now),
			CoordinatorMsg::TrackThirdPartySharing(options) => {
				self.track_third_party_sharing(&options, now)
			}
			CoordinatorMsg::TrackMeasurementConsent(consent) => {
				self.track_measurement_consent(consent, now)
			}
			CoordinatorMsg::TrackAdRevenue { source, payload } => {
				self.track_ad_revenue(&source, &payload, now)
			}
			CoordinatorMsg::TrackSubscription(subscription) => {
				self.track_subscription(&subscription, now)
			}
			CoordinatorMsg::SetPushToken(token) => self.set_push_token(token, now),
			CoordinatorMsg::AddSessionCallbackParam { key, value } => {
				self.session_params.callback.insert(key, value);
				self.session_params_changed();
			}
			CoordinatorMsg::RemoveSessionCallbackParam(key) => {
				self.session_params.callback.remove(&key);
				self.session_params_changed();
			}
			CoordinatorMsg::AddSessionPartnerParam { key, value } => {
				self.session_params.partner.insert(key, value);
				self.session_params_changed();
			}
			CoordinatorMsg::RemoveSessionPartnerParam(key) => {
				self.session_params.partner.remove(&key);
				self.session_params_changed();
			}
			CoordinatorMsg::SendReferrer {
				source,
				content,
				click_time,
				install_begin,
			} => self.send_referrer(source, &content, click_time, install_begin, now),
			CoordinatorMsg::LaunchDeeplink { url } => self.launch_deeplink(&url, now),
			CoordinatorMsg::ForegroundTimerFired => self.foreground_timer_fired(now),
			CoordinatorMsg::BackgroundTimerFired => self.delivery.send_first(),
			CoordinatorMsg::DelayStartFinished => self.finish_delay_start(),
			CoordinatorMsg::AttributionRequested { initiated_by } => {
				self.attribution_requested(initiated_by, now)
			}
			CoordinatorMsg::Response(response) => self.route_response(*response),
			CoordinatorMsg::ClickDelivered {
				source,
				click_time,
				install_begin,
			} => self.click_delivered(source, click_time, install_begin),
			CoordinatorMsg::Teardown => {
				self.foreground_timer.suspend();
				self.background_timer.cancel();
				self.delay_timer.cancel();
				self.delivery.teardown();
				self.click.teardown();
				self.attribution.teardown();
				return true;
			}
		}
		false
	}

	fn on_resume(&mut self, now: DateTime<Utc>) {
		self.internal.in_background = false;
		self.background_timer.cancel();
		// The delay may have expired while no message could deliver it.
		if self.internal.in_delayed_start && !self.delay_timer.is_pending() {
			self.finish_delay_start();
		}
		let handle = self.handle.clone();
		self.foreground_timer.start(
			self.config.foreground_timer_start,
			self.config.foreground_timer_interval,
			move || handle.foreground_timer_fired(),
		);
		self.process_session(now);
		if self.internal.session_response_processed
			&& self.state.as_ref().is_some_and(|s| s.asking_attribution)
		{
			self.attribution.request_now();
		}
		self.update_handler_status();
	}

	fn on_pause(&mut self, now: DateTime<Utc>) {
		self.internal.in_background = true;
		self.foreground_timer.suspend();
		self.accumulate_time(now);
		if self.config.send_in_background && !self.delivery_paused() {
			let handle = self.handle.clone();
			self.background_timer
				.start_in(self.config.background_timer_interval, move || {
					handle.background_timer_fired();
				});
		}
	}

	/// Session algorithm: decide between a new session, a new subsession,
	/// or nothing, based on the gap since the last recorded activity.
	fn process_session(&mut self, now: DateTime<Utc>) {
		if !self.internal.enabled {
			return;
		}
		if self.state.is_none() {
			self.start_first_session(now);
			return;
		}
		let session_interval_ms = self.config.session_interval.as_millis() as i64;
		let subsession_interval_ms = self.config.subsession_interval.as_millis() as i64;

		enum Decision {
			NewSession,
			NewSubsession(u64),
			None,
		}
		let decision = if let Some(state) = self.state.as_mut() {
			let last = state.last_activity_at.unwrap_or(now);
			let gap = (now - last).num_milliseconds();
			if gap < 0 {
				warn!("Activity timestamp from the future, staying in subsession");
				state.last_activity_at = Some(now);
				Decision::None
			} else if gap > session_interval_ms {
				state.session_count += 1;
				state.last_interval_ms = Some(gap);
				state.reset_session_attributes(now);
				Decision::NewSession
			} else if gap > subsession_interval_ms {
				state.subsession_count += 1;
				state.session_length_ms += gap;
				state.last_activity_at = Some(now);
				Decision::NewSubsession(state.subsession_count)
			} else {
				Decision::None
			}
		} else {
			Decision::None
		};
		self.persist_state();

		match decision {
			Decision::NewSession => {
				let session_count = self.state.as_ref().map_or(0, |s| s.session_count);
				info!(session_count, "Starting new session");
				if let Some(builder) = self.snapshot_builder(now) {
					let package = builder.session_package();
					self.enqueue(package);
				}
				self.probe_referrers();
			}
			Decision::NewSubsession(subsession_count) => {
				info!(subsession_count, "Started subsession");
				self.probe_referrers();
			}
			Decision::None => debug!("Resume within the current subsession"),
		}
	}

	fn start_first_session(&mut self, now: DateTime<Utc>) {
		let state = SessionState::new();
		info!(uuid = %state.uuid, "First SDK start");
		self.state = Some(state);
		self.internal.is_first_launch = true;
		self.internal.first_sdk_start_occurred = true;

		// Pre-launch actions go out ahead of the first session package.
		let actions = self.config.pre_launch.clone();
		if actions.gdpr_forget_me {
			self.gdpr_forget_me(now);
			return;
		}
		if actions.disable_third_party_sharing {
			self.disable_third_party_sharing(now);
		}
		if let Some(consent) = actions.measurement_consent {
			self.track_measurement_consent(consent, now);
		}
		for options in &actions.third_party_sharing {
			self.track_third_party_sharing(options, now);
		}

		if let Some(state) = self.state.as_mut() {
			state.session_count = 1;
			state.reset_session_attributes(now);
		}
		self.persist_state();
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.session_package();
			self.enqueue(package);
		}
		self.probe_referrers();
		self.read_preinstall(now);
	}

	/// Time-spent accounting between session boundaries.
	fn accumulate_time(&mut self, now: DateTime<Utc>) {
		let session_interval_ms = self.config.session_interval.as_millis() as i64;
		let Some(state) = self.state.as_mut() else {
			return;
		};
		match state.last_activity_at {
			None => state.last_activity_at = Some(now),
			Some(last) => {
				let gap = (now - last).num_milliseconds();
				if gap < 0 {
					warn!("Activity timestamp from the future, skipping accounting");
				} else if gap < session_interval_ms {
					state.session_length_ms += gap;
					state.time_spent_ms += gap;
				}
				state.last_activity_at = Some(now);
			}
		}
		self.persist_state();
	}

	fn track_event(&mut self, event: Event, now: DateTime<Utc>) {
		if !self.internal.enabled {
			debug!("SDK disabled, dropping event");
			return;
		}
		{
			let Some(state) = self.state.as_mut() else {
				warn!("Event tracked before the first session, dropping");
				return;
			};
			if state.gdpr_forgotten {
				return;
			}
			if let Err(e) = event.validate() {
				warn!(error = %e, "Dropping invalid event");
				return;
			}
			if let Some(order_id) = &event.order_id {
				if !state.push_order_id(order_id) {
					info!(order_id = %order_id, "Skipping duplicate order ID");
					return;
				}
			}
			state.event_count += 1;
		}
		self.accumulate_time(now);
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.event_package(&event);
			self.enqueue(package);
		}
	}

	fn set_enabled(&mut self, enabled: bool, now: DateTime<Utc>) {
		let Some(state) = self.state.as_mut() else {
			self.internal.enabled = enabled;
			return;
		};
		if state.enabled == enabled {
			debug!(enabled, "Enabled state unchanged");
			return;
		}
		if enabled && state.gdpr_forgotten {
			warn!("Device was forgotten, cannot re-enable");
			return;
		}
		state.enabled = enabled;
		self.internal.enabled = enabled;
		self.persist_state();
		info!(enabled, "Enabled state changed");
		if enabled && !self.internal.in_background {
			self.process_session(now);
		}
		self.update_handler_status();
	}

	fn set_offline_mode(&mut self, offline: bool) {
		if self.internal.offline == offline {
			debug!(offline, "Offline mode unchanged");
			return;
		}
		self.internal.offline = offline;
		if let Some(state) = self.state.as_mut() {
			state.offline = offline;
		}
		self.persist_state();
		info!(offline, "Offline mode changed");
		self.update_handler_status();
	}

	/// Idempotent terminal transition: one GDPR package, SDK disabled.
	fn gdpr_forget_me(&mut self, now: DateTime<Utc>) {
		{
			let Some(state) = self.state.as_mut() else {
				warn!("GDPR forget before the first session, dropping");
				return;
			};
			if state.gdpr_forgotten {
				info!("Device already forgotten");
				return;
			}
			state.gdpr_forgotten = true;
			state.enabled = false;
		}
		self.internal.enabled = false;
		self.persist_state();
		info!("Forgetting device");
		self.delivery.flush();
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.gdpr_package();
			self.enqueue(package);
		}
		self.update_handler_status();
	}

	fn disable_third_party_sharing(&mut self, now: DateTime<Utc>) {
		{
			let Some(state) = self.state.as_mut() else {
				return;
			};
			if state.third_party_sharing_disabled {
				debug!("Third-party sharing already disabled");
				return;
			}
			state.third_party_sharing_disabled = true;
		}
		self.persist_state();
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.disable_third_party_sharing_package();
			self.enqueue(package);
		}
	}

	fn track_third_party_sharing(&mut self, options: &ThirdPartySharingOptions, now: DateTime<Utc>) {
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.third_party_sharing_package(options);
			self.enqueue(package);
		}
	}

	fn track_measurement_consent(&mut self, consent: bool, now: DateTime<Utc>) {
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.measurement_consent_package(consent);
			self.enqueue(package);
		}
	}

	fn track_ad_revenue(&mut self, source: &str, payload: &Value, now: DateTime<Utc>) {
		if !self.internal.enabled {
			return;
		}
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.ad_revenue_package(source, payload);
			self.enqueue(package);
		}
	}

	fn track_subscription(&mut self, subscription: &Subscription, now: DateTime<Utc>) {
		if !self.internal.enabled {
			return;
		}
		if let Err(e) = subscription.validate() {
			warn!(error = %e, "Dropping invalid subscription");
			return;
		}
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.subscription_package(subscription);
			self.enqueue(package);
		}
	}

	fn set_push_token(&mut self, token: String, now: DateTime<Utc>) {
		{
			let Some(state) = self.state.as_mut() else {
				return;
			};
			if state.push_token.as_deref() == Some(token.as_str()) {
				return;
			}
			state.push_token = Some(token);
		}
		self.persist_state();
		if !self.internal.enabled {
			return;
		}
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.info_package("push");
			self.enqueue(package);
		}
	}

	fn session_params_changed(&mut self) {
		self.persist_session_params();
		if self.internal.in_delayed_start {
			self.internal.needs_package_update = true;
		}
	}

	fn send_referrer(
		&mut self,
		source: ReferrerSource,
		content: &str,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
		now: DateTime<Utc>,
	) {
		if !self.internal.enabled {
			return;
		}
		let Some(state) = self.state.as_ref() else {
			return;
		};
		let incoming = ReferrerTimestamps {
			click_time,
			install_begin,
		};
		if incoming != ReferrerTimestamps::default() && state.referrer(source) == incoming {
			debug!(source = %source, "Referrer already tracked");
			return;
		}
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.click_package(
				&ClickSource::Referrer(source),
				content,
				click_time,
				install_begin,
			);
			self.click.enqueue_referrer(package);
			self.click.send_first();
		}
	}

	fn launch_deeplink(&mut self, url: &str, now: DateTime<Utc>) {
		if !self.internal.enabled || url.is_empty() {
			return;
		}
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.click_package(&ClickSource::Deeplink, url, Some(now), None);
			self.click.enqueue(package);
			self.click.send_first();
		}
	}

	fn probe_referrers(&self) {
		if let Some(probe) = &self.referrer_probe {
			probe.request_referrers(self.handle.clone());
		}
	}

	fn read_preinstall(&mut self, now: DateTime<Utc>) {
		if self.internal.preinstall_read {
			return;
		}
		let Some(reader) = self.preinstall_reader.clone() else {
			return;
		};
		let payloads = reader.read();
		self.internal.preinstall_read = true;
		if payloads.is_empty() {
			return;
		}
		info!(count = payloads.len(), "Read preinstall payloads");
		for payload in payloads {
			if let Some(builder) = self.snapshot_builder(now) {
				let package = builder.click_package(
					&ClickSource::Preinstall {
						location: payload.location.clone(),
					},
					&payload.content,
					None,
					None,
				);
				self.click.enqueue(package);
			}
		}
		self.click.send_first();
	}

	fn foreground_timer_fired(&mut self, now: DateTime<Utc>) {
		if !self.internal.enabled {
			return;
		}
		self.accumulate_time(now);
		self.delivery.send_first();
	}

	fn finish_delay_start(&mut self) {
		if !self.internal.in_delayed_start {
			return;
		}
		info!("Delay start expired");
		self.delay_timer.cancel();
		self.internal.in_delayed_start = false;
		if self.internal.needs_package_update {
			self.internal.needs_package_update = false;
			self.delivery.update_packages(self.session_params.clone());
		}
		self.update_handler_status();
	}

	fn attribution_requested(&mut self, initiated_by: &'static str, now: DateTime<Utc>) {
		if self.state.as_ref().is_some_and(|s| s.gdpr_forgotten) {
			return;
		}
		{
			let Some(state) = self.state.as_mut() else {
				return;
			};
			if !state.asking_attribution {
				state.asking_attribution = true;
			}
		}
		self.persist_state();
		if let Some(builder) = self.snapshot_builder(now) {
			let package = builder.attribution_package(initiated_by);
			self.attribution.send_package(package);
		}
	}

	fn route_response(&mut self, response: ResponseData) {
		if response.tracking_state == Some(TrackingState::OptedOut) {
			self.opt_out();
			return;
		}
		if let Some(continue_in) = response.continue_in {
			debug!(continue_in, "Server pacing hint received");
		}
		match response.kind {
			ActivityKind::Session => self.process_session_response(response),
			ActivityKind::Event => {
				if response.success {
					self.listener.event_success(SuccessData::from_response(&response));
				} else {
					self.listener.event_failure(FailureData::from_response(&response));
				}
			}
			ActivityKind::Click => {
				self.check_attribution_hints(&response);
				debug!(success = response.success, "Click response routed");
			}
			ActivityKind::Attribution => self.process_attribution_response(response),
			kind => debug!(kind = %kind, success = response.success, "Response handled"),
		}
	}

	fn process_session_response(&mut self, response: ResponseData) {
		if response.success {
			let newly_tracked = {
				let state = self.state.as_mut();
				match state {
					Some(state) if !state.install_tracked => {
						state.install_tracked = true;
						true
					}
					_ => false,
				}
			};
			if newly_tracked {
				info!("Install confirmed by backend");
				self.persist_state();
				self.delivery.install_tracked();
			}
			self.internal.session_response_processed = true;
			debug!(
				first_launch = self.internal.is_first_launch,
				"Session response processed"
			);
		}
		self.check_attribution_hints(&response);
		if response.success {
			self.listener.session_success(SuccessData::from_response(&response));
		} else {
			self.listener.session_failure(FailureData::from_response(&response));
		}
	}

	fn check_attribution_hints(&mut self, response: &ResponseData) {
		if let Some(attribution) = response.attribution.clone() {
			self.update_attribution(attribution);
		}
		if let Some(ask_in) = response.ask_in {
			{
				if let Some(state) = self.state.as_mut() {
					state.asking_attribution = true;
				}
			}
			self.persist_state();
			self.attribution.request_after(ask_in, true);
		}
	}

	fn process_attribution_response(&mut self, response: ResponseData) {
		if let Some(attribution) = response.attribution.clone() {
			if let Some(deeplink) = attribution.deeplink.clone() {
				self.prefs.deferred_deeplink = Some(deeplink.clone());
				self.persist_prefs();
				self.listener.deferred_deeplink(deeplink);
			}
			self.update_attribution(attribution);
		}
		match response.ask_in {
			Some(ask_in) => {
				if let Some(state) = self.state.as_mut() {
					state.asking_attribution = true;
				}
				self.persist_state();
				self.attribution.request_after(ask_in, true);
			}
			None => {
				let mut settled = false;
				if let Some(state) = self.state.as_mut() {
					if state.asking_attribution {
						state.asking_attribution = false;
						settled = true;
					}
				}
				if settled {
					self.persist_state();
					debug!("Attribution settled");
				}
			}
		}
	}

	fn update_attribution(&mut self, attribution: Attribution) {
		let changed = match &self.prefs.attribution {
			Some(current) => !current.same_attribution(&attribution),
			None => true,
		};
		if !changed {
			return;
		}
		self.prefs.attribution = Some(attribution.clone());
		self.persist_prefs();
		info!("Attribution changed");
		self.listener.attribution_changed(attribution);
	}

	fn click_delivered(
		&mut self,
		source: ReferrerSource,
		click_time: Option<DateTime<Utc>>,
		install_begin: Option<DateTime<Utc>>,
	) {
		if let Some(state) = self.state.as_mut() {
			state.set_referrer(
				source,
				ReferrerTimestamps {
					click_time,
					install_begin,
				},
			);
		}
		self.persist_state();
		debug!(source = %source, "Referrer recorded");
	}

	/// Server-side opt-out: flush everything, stop tracking, not retried.
	fn opt_out(&mut self) {
		info!("Server ordered opt-out, disabling");
		if let Some(state) = self.state.as_mut() {
			state.enabled = false;
		}
		self.internal.enabled = false;
		self.persist_state();
		self.delivery.flush();
		self.update_handler_status();
	}
}
