// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the core data model.

use thiserror::Error;

/// Core SDK errors.
#[derive(Debug, Error)]
pub enum CoreError {
	/// Event validation failed.
	#[error("event validation failed: {0}")]
	InvalidEvent(String),

	/// Serialization error.
	#[error("serialization error: {0}")]
	Serialization(String),

	/// Persisted document carries a schema version this SDK does not know.
	#[error("unsupported schema version {0}")]
	UnsupportedSchemaVersion(u32),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
