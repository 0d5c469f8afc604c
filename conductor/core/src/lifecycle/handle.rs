//! Backend handles and leases
//!
//! A [`BackendHandle`] is a point-in-time view of one cache slot. A
//! [`BackendLease`] is what callers actually hold while generating: it keeps
//! the slot pinned and unpins it on drop, whatever path the caller exits by.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::manager::Shared;
use super::quantization::QuantizationLevel;
use crate::backend::GenerationBackend;

/// Lifecycle state of a cache slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Not resident
    Unloaded,
    /// Load in flight
    Loading,
    /// Resident and serving
    Ready,
    /// Being unloaded
    Evicting,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::Evicting => write!(f, "evicting"),
        }
    }
}

/// Snapshot of a cache slot
#[derive(Clone, Debug)]
pub struct BackendHandle {
    /// Backend identifier
    pub backend_id: String,
    /// Chosen level, once selected
    pub quantization_level: Option<QuantizationLevel>,
    /// Bytes reserved for this slot
    pub memory_footprint_bytes: u64,
    /// When the load completed
    pub loaded_at: Option<Instant>,
    /// Last acquire or release
    pub last_used_at: Option<Instant>,
    /// In-flight users
    pub ref_count: usize,
    /// Current state
    pub state: HandleState,
}

/// Pinned access to a ready backend
///
/// Dropping the lease decrements the slot's reference count and refreshes its
/// LRU timestamp.
pub struct BackendLease {
    shared: Arc<Shared>,
    backend_id: String,
    generation: u64,
    level: QuantizationLevel,
    backend: Arc<dyn GenerationBackend>,
}

impl BackendLease {
    pub(crate) fn new(
        shared: Arc<Shared>,
        backend_id: impl Into<String>,
        generation: u64,
        level: QuantizationLevel,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            shared,
            backend_id: backend_id.into(),
            generation,
            level,
            backend,
        }
    }

    /// Backend identifier
    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Level the backend was loaded at
    #[must_use]
    pub fn quantization_level(&self) -> QuantizationLevel {
        self.level
    }

    /// The loaded backend
    #[must_use]
    pub fn backend(&self) -> &dyn GenerationBackend {
        self.backend.as_ref()
    }
}

impl fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLease")
            .field("backend_id", &self.backend_id)
            .field("generation", &self.generation)
            .field("level", &self.level)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.shared.release(&self.backend_id, self.generation);
    }
}
