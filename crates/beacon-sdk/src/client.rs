// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client facade wiring the pipeline together.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use beacon_common_http::{HttpTransport, Transport};
use beacon_sdk_core::{Event, ReferrerSource, Subscription};

use crate::config::{SdkConfig, ThirdPartySharingOptions};
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::device::{DeviceIdProvider, PreinstallReader, ReferrerProbe};
use crate::error::{Result, SdkError};
use crate::listener::{NoopListener, SdkListener};
use crate::store::FileStore;

/// Builder for constructing an [`SdkClient`].
pub struct SdkClientBuilder {
	config: Option<SdkConfig>,
	transport: Option<Arc<dyn Transport>>,
	base_url: Option<String>,
	storage_dir: Option<PathBuf>,
	listener: Arc<dyn SdkListener>,
	device_provider: Option<Arc<dyn DeviceIdProvider>>,
	referrer_probe: Option<Arc<dyn ReferrerProbe>>,
	preinstall_reader: Option<Arc<dyn PreinstallReader>>,
}

impl SdkClientBuilder {
	#[must_use]
	pub fn new() -> Self {
		Self {
			config: None,
			transport: None,
			base_url: None,
			storage_dir: None,
			listener: Arc::new(NoopListener),
			device_provider: None,
			referrer_probe: None,
			preinstall_reader: None,
		}
	}

	#[must_use]
	pub fn config(mut self, config: SdkConfig) -> Self {
		self.config = Some(config);
		self
	}

	/// Sets the backend base URL; the default HTTP transport is built from
	/// it unless [`transport`](Self::transport) is provided.
	#[must_use]
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Injects a custom transport (tests, signing wrappers).
	#[must_use]
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Directory the pipeline persists its state and queues into.
	#[must_use]
	pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.storage_dir = Some(dir.into());
		self
	}

	#[must_use]
	pub fn listener(mut self, listener: Arc<dyn SdkListener>) -> Self {
		self.listener = listener;
		self
	}

	#[must_use]
	pub fn device_id_provider(mut self, provider: Arc<dyn DeviceIdProvider>) -> Self {
		self.device_provider = Some(provider);
		self
	}

	#[must_use]
	pub fn referrer_probe(mut self, probe: Arc<dyn ReferrerProbe>) -> Self {
		self.referrer_probe = Some(probe);
		self
	}

	#[must_use]
	pub fn preinstall_reader(mut self, reader: Arc<dyn PreinstallReader>) -> Self {
		self.preinstall_reader = Some(reader);
		self
	}

	/// Builds the client and starts the pipeline actors.
	///
	/// Must be called within a Tokio runtime.
	pub fn build(self) -> Result<SdkClient> {
		let config = self
			.config
			.ok_or_else(|| SdkError::InvalidConfig("missing configuration".to_string()))?;
		config.validate()?;

		let transport: Arc<dyn Transport> = match (self.transport, self.base_url) {
			(Some(transport), _) => transport,
			(None, Some(url)) => {
				Arc::new(HttpTransport::new(url)?.with_cost_data(config.needs_cost))
			}
			(None, None) => {
				return Err(SdkError::InvalidConfig(
					"missing transport or base URL".to_string(),
				))
			}
		};
		let storage_dir = self
			.storage_dir
			.ok_or_else(|| SdkError::InvalidConfig("missing storage directory".to_string()))?;
		let store = FileStore::new(storage_dir)?;
		let device = self
			.device_provider
			.map(|provider| provider.device_ids())
			.unwrap_or_default();

		let environment = config.environment;
		let coordinator = Coordinator::spawn(
			config,
			store,
			transport,
			self.listener,
			device,
			self.referrer_probe,
			self.preinstall_reader,
		);
		info!(environment = environment.as_str(), "SDK client initialized");
		Ok(SdkClient { coordinator })
	}
}

impl Default for SdkClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// The Beacon SDK client.
///
/// Cheap to clone; all methods submit a message to the coordinator actor
/// and return immediately.
#[derive(Clone)]
pub struct SdkClient {
	coordinator: CoordinatorHandle,
}

impl SdkClient {
	#[must_use]
	pub fn builder() -> SdkClientBuilder {
		SdkClientBuilder::new()
	}

	fn submit(&self, accepted: bool) -> Result<()> {
		if accepted {
			Ok(())
		} else {
			Err(SdkError::ClientShutdown)
		}
	}

	/// The app came to the foreground; runs the session algorithm.
	pub fn on_resume(&self) -> Result<()> {
		self.submit(self.coordinator.on_resume())
	}

	/// The app went to the background.
	pub fn on_pause(&self) -> Result<()> {
		self.submit(self.coordinator.on_pause())
	}

	pub fn track_event(&self, event: Event) -> Result<()> {
		self.submit(self.coordinator.track_event(event))
	}

	pub fn set_enabled(&self, enabled: bool) -> Result<()> {
		self.submit(self.coordinator.set_enabled(enabled))
	}

	pub fn set_offline_mode(&self, offline: bool) -> Result<()> {
		self.submit(self.coordinator.set_offline_mode(offline))
	}

	/// Irreversibly forgets this device per a GDPR request.
	pub fn gdpr_forget_me(&self) -> Result<()> {
		self.submit(self.coordinator.gdpr_forget_me())
	}

	pub fn disable_third_party_sharing(&self) -> Result<()> {
		self.submit(self.coordinator.disable_third_party_sharing())
	}

	pub fn track_third_party_sharing(&self, options: ThirdPartySharingOptions) -> Result<()> {
		self.submit(self.coordinator.track_third_party_sharing(options))
	}

	pub fn track_measurement_consent(&self, consent: bool) -> Result<()> {
		self.submit(self.coordinator.track_measurement_consent(consent))
	}

	pub fn track_ad_revenue(&self, source: impl Into<String>, payload: Value) -> Result<()> {
		self.submit(self.coordinator.track_ad_revenue(source, payload))
	}

	pub fn track_subscription(&self, subscription: Subscription) -> Result<()> {
		self.submit(self.coordinator.track_subscription(subscription))
	}

	pub fn set_push_token(&self, token: impl Into<String>) -> Result<()> {
		self.submit(self.coordinator.set_push_token(token))
	}

	pub fn add_session_callback_param(
		&self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> Result<()> {
		self.submit(self.coordinator.add_session_callback_param(key, value))
	}

	pub fn remove_session_callback_param(&self, key: impl Into<String>) -> Result<()> {
		self.submit(self.coordinator.remove_session_callback_param(key))
	}

	pub fn add_session_partner_param(
		&self,
		key: impl Into<String>,
		value: impl Into<String>,
	) -> Result<()> {
		self.submit(self.coordinator.add_session_partner_param(key, value))
	}

	pub fn remove_session_partner_param(&self, key: impl Into<String>) -> Result<()> {
		self.submit(self.coordinator.remove_session_partner_param(key))
	}

	/// Reports an install-referrer payload surfaced by a platform provider.
	pub fn send_referrer(
		&self,
		source: ReferrerSource,
		content: impl Into<String>,
		click_time: Option<chrono::DateTime<chrono::Utc>>,
		install_begin: Option<chrono::DateTime<chrono::Utc>>,
	) -> Result<()> {
		self.submit(
			self.coordinator
				.send_referrer(source, content, click_time, install_begin),
		)
	}

	/// The app was opened through a deeplink.
	pub fn launch_deeplink(&self, url: impl Into<String>) -> Result<()> {
		self.submit(self.coordinator.launch_deeplink(url))
	}

	/// Stops every actor and cancels all timers.
	pub fn shutdown(&self) -> Result<()> {
		self.submit(self.coordinator.teardown())
	}

	/// Handle for collaborators that report back asynchronously.
	#[must_use]
	pub fn handle(&self) -> CoordinatorHandle {
		self.coordinator.clone()
	}
}
