// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! File-backed durable storage for the pipeline's persisted documents.
//!
//! Every document carries a schema version; unknown versions and corrupt
//! files log a warning and fall back to defaults. Persistence problems are
//! never fatal to the pipeline.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use beacon_sdk_core::{Attribution, Package, SessionState, SCHEMA_VERSION};

/// Session state document, owned by the coordinator.
pub const ACTIVITY_STATE_FILE: &str = "activity_state.json";
/// Ordinary package queue, owned by the delivery queue.
pub const PACKAGE_QUEUE_FILE: &str = "package_queue.json";
/// Click queue, owned by the click dispatcher.
pub const CLICK_QUEUE_FILE: &str = "click_queue.json";
/// Pending referrers + preinstall bitmask, owned by the click dispatcher.
pub const CLICK_STATE_FILE: &str = "click_state.json";
/// Global callback/partner parameters, owned by the coordinator.
pub const SESSION_PARAMS_FILE: &str = "session_params.json";
/// Attribution + cached deeplink, owned by the coordinator.
pub const PREFS_FILE: &str = "sdk_prefs.json";

const QUEUE_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct QueueDocument {
	version: u32,
	packages: Vec<Package>,
}

/// Small coordinator-owned preferences document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkPrefs {
	#[serde(default)]
	pub attribution: Option<Attribution>,
	#[serde(default)]
	pub deferred_deeplink: Option<String>,
}

/// Pending referrer table and preinstall read-bitmask, owned by the click
/// dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickState {
	/// Pending referrer content keyed by source name. A send is only valid
	/// while its content is still registered here.
	#[serde(default)]
	pub pending: std::collections::BTreeMap<String, String>,
	/// One bit per preinstall source location already consumed.
	#[serde(default)]
	pub preinstall_mask: u8,
}

/// JSON-file store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
	dir: PathBuf,
}

impl FileStore {
	/// Opens (creating if needed) the storage directory.
	pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
		let dir = dir.into();
		fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	#[must_use]
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path(&self, name: &str) -> PathBuf {
		self.dir.join(name)
	}

	/// Persists a document. Write failures are logged, not returned; the
	/// in-memory state stays authoritative for this process.
	pub fn save<T: Serialize>(&self, name: &str, value: &T) {
		let path = self.path(name);
		let bytes = match serde_json::to_vec(value) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!(file = name, error = %e, "Failed to serialize document");
				return;
			}
		};
		let tmp = self.path(&format!("{name}.tmp"));
		let result = fs::write(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &path));
		match result {
			Ok(()) => debug!(file = name, "Document persisted"),
			Err(e) => warn!(file = name, error = %e, "Failed to persist document"),
		}
	}

	/// Loads a document, or `None` when absent, corrupt or unreadable.
	pub fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
		let path = self.path(name);
		let bytes = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
			Err(e) => {
				warn!(file = name, error = %e, "Failed to read document");
				return None;
			}
		};
		match serde_json::from_slice(&bytes) {
			Ok(value) => Some(value),
			Err(e) => {
				warn!(file = name, error = %e, "Corrupt document, substituting default");
				None
			}
		}
	}

	pub fn remove(&self, name: &str) {
		let path = self.path(name);
		if let Err(e) = fs::remove_file(&path) {
			if e.kind() != io::ErrorKind::NotFound {
				warn!(file = name, error = %e, "Failed to remove document");
			}
		}
	}

	/// Loads the persisted session state, running schema migration once.
	///
	/// Returns `None` (first start) when the file is absent, corrupt or
	/// carries a version this SDK does not know.
	pub fn load_session_state(&self) -> Option<SessionState> {
		let raw: Value = self.load(ACTIVITY_STATE_FILE)?;
		let version = raw.get("version").and_then(Value::as_u64).unwrap_or(0) as u32;
		if version > SCHEMA_VERSION {
			warn!(version, "Session state from a newer SDK, substituting default");
			return None;
		}
		// Single schema version so far; migrations for older versions slot
		// in here before the final decode.
		match serde_json::from_value(raw) {
			Ok(state) => Some(state),
			Err(e) => {
				warn!(error = %e, "Corrupt session state, substituting default");
				None
			}
		}
	}

	pub fn save_session_state(&self, state: &SessionState) {
		self.save(ACTIVITY_STATE_FILE, state);
	}

	/// Loads a package queue; absent or unreadable queues come back empty.
	pub fn load_queue(&self, name: &str) -> Vec<Package> {
		let Some(document) = self.load::<QueueDocument>(name) else {
			return Vec::new();
		};
		if document.version > QUEUE_SCHEMA_VERSION {
			warn!(file = name, version = document.version, "Queue from a newer SDK, dropping");
			return Vec::new();
		}
		document.packages
	}

	pub fn save_queue(&self, name: &str, packages: &[Package]) {
		self.save(
			name,
			&QueueDocument {
				version: QUEUE_SCHEMA_VERSION,
				packages: packages.to_vec(),
			},
		);
	}
}
