// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capability-typed platform collaborators, injected at construction time.

use crate::coordinator::CoordinatorHandle;

/// Device identifiers snapshotted into every package.
#[derive(Debug, Clone, Default)]
pub struct DeviceIds {
	/// Platform advertising identifier, when the host can provide one.
	pub advertising_id: Option<String>,
	/// Stable platform device identifier.
	pub device_id: Option<String>,
}

/// Supplies device identifiers. Resolved once at construction; hosts
/// without a platform layer use [`StaticDeviceIdProvider`].
pub trait DeviceIdProvider: Send + Sync {
	fn device_ids(&self) -> DeviceIds;
}

/// Fixed identifiers handed in by the host.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceIdProvider {
	ids: DeviceIds,
}

impl StaticDeviceIdProvider {
	#[must_use]
	pub fn new(ids: DeviceIds) -> Self {
		Self { ids }
	}
}

impl DeviceIdProvider for StaticDeviceIdProvider {
	fn device_ids(&self) -> DeviceIds {
		self.ids.clone()
	}
}

/// Asynchronous install-referrer source. The coordinator invokes this on
/// first start and on each new subsession; the implementation reports any
/// payloads it finds back through the handle.
pub trait ReferrerProbe: Send + Sync {
	fn request_referrers(&self, coordinator: CoordinatorHandle);
}

/// A preinstall payload baked into a system location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreinstallPayload {
	pub location: String,
	pub content: String,
}

/// Reads preinstall payloads from the system image. Locations already
/// marked read are filtered out by the click dispatcher, not the reader.
pub trait PreinstallReader: Send + Sync {
	fn read(&self) -> Vec<PreinstallPayload>;
}
