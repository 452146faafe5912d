// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Minimal host wiring: track a session and one event against a sandbox
//! backend.
//!
//! ```sh
//! BEACON_BASE_URL=https://app.beacon.example cargo run --example track
//! ```

use std::time::Duration;

use beacon_sdk::{Event, SdkClient, SdkConfig, SdkEnvironment};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "beacon_sdk=debug,beacon_common_http=debug".into()),
		)
		.init();

	let base_url = std::env::var("BEACON_BASE_URL")
		.unwrap_or_else(|_| "http://localhost:8080".to_string());
	let storage = std::env::temp_dir().join("beacon-example");

	let client = SdkClient::builder()
		.config(SdkConfig::new("abc123def456", SdkEnvironment::Sandbox))
		.base_url(base_url)
		.storage_dir(storage)
		.build()?;

	client.on_resume()?;
	client.track_event(Event::new("tok1").with_revenue(0.99, "EUR"))?;

	// Give the pipeline a moment to deliver before shutting down.
	tokio::time::sleep(Duration::from_secs(2)).await;
	client.on_pause()?;
	client.shutdown()?;
	Ok(())
}
