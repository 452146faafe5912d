// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the SDK pipeline.

use thiserror::Error;

use beacon_common_http::TransportError;
use beacon_sdk_core::CoreError;

/// SDK errors.
#[derive(Debug, Error)]
pub enum SdkError {
	/// Configuration rejected at build time.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,

	/// Durable storage could not be initialized.
	#[error("storage error: {0}")]
	Storage(#[from] std::io::Error),

	/// Core validation or serialization error.
	#[error(transparent)]
	Core(#[from] CoreError),

	/// Transport construction error.
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
