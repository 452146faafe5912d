// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beacon attribution SDK: the event-delivery and session coordination
//! pipeline.
//!
//! Lifecycle events flow one way: the session coordinator snapshots state
//! into packages, the delivery queue and click dispatcher send them durably
//! with retry/backoff, and server responses route back through the
//! coordinator into listeners and the attribution resolver. Each component
//! is an actor draining a serial mailbox; see the module docs for details.
//!
//! # Example
//!
//! ```ignore
//! use beacon_sdk::{SdkClient, SdkConfig, SdkEnvironment};
//!
//! let client = SdkClient::builder()
//!     .config(SdkConfig::new("abc123def456", SdkEnvironment::Production))
//!     .base_url("https://app.beacon.example")
//!     .storage_dir("/data/beacon")
//!     .build()?;
//! client.on_resume()?;
//! client.track_event(beacon_sdk::Event::new("tok1"))?;
//! ```

pub mod attribution_handler;
pub mod builder;
pub mod click;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod device;
pub mod error;
pub mod listener;
pub mod store;
pub mod timer;

pub use client::{SdkClient, SdkClientBuilder};
pub use config::{PreLaunchActions, SdkConfig, SdkEnvironment, ThirdPartySharingOptions};
pub use coordinator::CoordinatorHandle;
pub use device::{DeviceIdProvider, DeviceIds, PreinstallReader, ReferrerProbe, StaticDeviceIdProvider};
pub use error::{Result, SdkError};
pub use listener::{FailureData, NoopListener, SdkListener, SuccessData};

// Re-exported core types that appear in the public API.
pub use beacon_sdk_core::{Attribution, Event, ReferrerSource, Subscription};
