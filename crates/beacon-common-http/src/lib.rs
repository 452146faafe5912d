// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for the Beacon SDK.
//!
//! This crate provides:
//! - A pre-configured HTTP client with consistent User-Agent header
//! - Transient-failure classification for retry decisions
//! - The backend transport boundary the delivery pipeline sends through

mod client;
mod retry;
mod transport;

pub use client::{builder, new_client, new_client_with_timeout, user_agent};
pub use retry::RetryableError;
pub use transport::{HttpTransport, Signer, Transport, TransportError};
