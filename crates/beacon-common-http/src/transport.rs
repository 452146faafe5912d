// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The backend transport boundary the delivery pipeline sends through.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use beacon_sdk_core::{ActivityKind, Package, ResponseData};

use crate::retry::RetryableError;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
	/// Base URL is missing or malformed.
	#[error("invalid base URL: {0}")]
	InvalidBaseUrl(String),

	/// HTTP request failed before a response was read.
	#[error("HTTP request failed: {0}")]
	Request(#[from] reqwest::Error),
}

impl RetryableError for TransportError {
	fn is_retryable(&self) -> bool {
		match self {
			TransportError::InvalidBaseUrl(_) => false,
			TransportError::Request(e) => e.is_retryable(),
		}
	}
}

/// Optional request-signing capability, injected at construction time.
pub trait Signer: Send + Sync {
	/// Adds signature parameters to an outgoing parameter map.
	fn sign(&self, kind: ActivityKind, parameters: &mut BTreeMap<String, String>);
}

/// Delivers one package to the backend and parses the reply.
///
/// `sending` always carries `sent_at` and, when more packages wait behind
/// this one, `queue_size`.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(
		&self,
		package: &Package,
		sending: &BTreeMap<String, String>,
	) -> Result<ResponseData, TransportError>;
}

/// The production transport: posts package parameters as a form body.
pub struct HttpTransport {
	client: Client,
	base_url: String,
	signer: Option<Arc<dyn Signer>>,
	with_cost: bool,
}

impl HttpTransport {
	/// Creates a transport for `base_url` using the shared client defaults.
	pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
		Self::with_client(crate::client::new_client(), base_url)
	}

	/// Creates a transport with a caller-provided client.
	pub fn with_client(
		client: Client,
		base_url: impl Into<String>,
	) -> Result<Self, TransportError> {
		let base_url = base_url.into();
		let trimmed = base_url.trim_end_matches('/');
		if trimmed.is_empty() {
			return Err(TransportError::InvalidBaseUrl(base_url));
		}
		Ok(Self {
			client,
			base_url: trimmed.to_string(),
			signer: None,
			with_cost: false,
		})
	}

	/// Attaches a request signer.
	#[must_use]
	pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
		self.signer = Some(signer);
		self
	}

	/// Opts responses into cost-data decoding.
	#[must_use]
	pub fn with_cost_data(mut self, with_cost: bool) -> Self {
		self.with_cost = with_cost;
		self
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn send(
		&self,
		package: &Package,
		sending: &BTreeMap<String, String>,
	) -> Result<ResponseData, TransportError> {
		let mut form = package.parameters.clone();
		for (key, value) in sending {
			form.insert(key.clone(), value.clone());
		}
		if let Some(signer) = &self.signer {
			signer.sign(package.kind, &mut form);
		}

		let url = format!("{}{}", self.base_url, package.path);
		let response = self.client.post(&url).form(&form).send().await?;
		let status = response.status().as_u16();
		let body = response.text().await.unwrap_or_default();
		debug!(kind = %package.kind, status, "Package delivered");

		Ok(ResponseData::parse(package.kind, status, &body, self.with_cost))
	}
}
