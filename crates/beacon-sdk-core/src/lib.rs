// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Beacon attribution SDK.
//!
//! This crate holds the pure data model shared by the SDK pipeline:
//! activity kinds and their backend paths, packages, backoff strategies,
//! parsed responses, attribution payloads and the persisted session state.
//! It performs no I/O.

pub mod activity_kind;
pub mod attribution;
pub mod backoff;
pub mod error;
pub mod event;
pub mod package;
pub mod response;
pub mod session_params;
pub mod session_state;
pub mod subscription;

pub use activity_kind::ActivityKind;
pub use attribution::Attribution;
pub use backoff::{wait_for, BackoffStrategy};
pub use error::{CoreError, Result};
pub use event::Event;
pub use package::{ClickSource, Package, ReferrerSource};
pub use response::{ResponseData, TrackingState};
pub use session_params::{encode_parameters, merge_parameters, SessionParameters};
pub use session_state::{ReferrerTimestamps, SessionState, MAX_ORDER_IDS, SCHEMA_VERSION};
pub use subscription::Subscription;
