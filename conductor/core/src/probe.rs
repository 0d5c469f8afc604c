//! Resource Probing
//!
//! The lifecycle manager asks a [`ResourceProbe`] how much memory is free and
//! which compute class is present before it picks a quantization level.
//!
//! Two implementations ship with the core:
//! - [`SystemProbe`]: reads system memory through `sysinfo` on a blocking thread
//! - [`StaticProbe`]: fixed, adjustable numbers for tests and embedded hosts

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Default headroom kept free for the OS and other processes (2 GiB)
pub const DEFAULT_SAFETY_MARGIN_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Kind of compute available to inference backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeClass {
    /// General purpose CPU only
    Cpu,
    /// GPU or other accelerator present
    Accelerator,
}

impl ComputeClass {
    /// Best-effort detection from the environment
    #[must_use]
    pub fn detect() -> Self {
        let cuda_visible = std::env::var("CUDA_VISIBLE_DEVICES")
            .map(|v| {
                let v = v.trim();
                !v.is_empty() && v != "-1"
            })
            .unwrap_or(false);

        if cuda_visible || Path::new("/dev/nvidia0").exists() {
            Self::Accelerator
        } else {
            Self::Cpu
        }
    }
}

impl fmt::Display for ComputeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator => write!(f, "accelerator"),
        }
    }
}

/// Reports available memory and compute class
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Memory currently available for new backends, in bytes
    async fn available_memory_bytes(&self) -> u64;

    /// Compute class of the host
    fn compute_class(&self) -> ComputeClass;
}

// ============================================================================
// Static Probe
// ============================================================================

/// Probe returning configured values
#[derive(Debug)]
pub struct StaticProbe {
    available: AtomicU64,
    class: ComputeClass,
}

impl StaticProbe {
    /// Create a probe reporting `available` bytes
    #[must_use]
    pub fn new(available: u64, class: ComputeClass) -> Self {
        Self {
            available: AtomicU64::new(available),
            class,
        }
    }

    /// Probe that never constrains the configured budget
    #[must_use]
    pub fn unlimited(class: ComputeClass) -> Self {
        Self::new(u64::MAX, class)
    }

    /// Change the reported available memory
    pub fn set_available(&self, bytes: u64) {
        self.available.store(bytes, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResourceProbe for StaticProbe {
    async fn available_memory_bytes(&self) -> u64 {
        self.available.load(Ordering::Relaxed)
    }

    fn compute_class(&self) -> ComputeClass {
        self.class
    }
}

// ============================================================================
// System Probe
// ============================================================================

/// Probe backed by live system memory readings
#[derive(Debug)]
pub struct SystemProbe {
    safety_margin_bytes: u64,
    class: ComputeClass,
}

impl SystemProbe {
    /// Create a probe with an explicit safety margin and compute class
    #[must_use]
    pub fn new(safety_margin_bytes: u64, class: ComputeClass) -> Self {
        Self {
            safety_margin_bytes,
            class,
        }
    }

    /// Create a probe with the default margin and a detected compute class
    #[must_use]
    pub fn detect() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN_BYTES, ComputeClass::detect())
    }

    /// Configured safety margin in bytes
    #[must_use]
    pub fn safety_margin(&self) -> u64 {
        self.safety_margin_bytes
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::detect()
    }
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    async fn available_memory_bytes(&self) -> u64 {
        // sysinfo reads /proc/meminfo and friends, which blocks
        let available = tokio::task::spawn_blocking(|| {
            let mut sys = System::new_with_specifics(
                RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
            );
            sys.refresh_memory();
            sys.available_memory()
        })
        .await;

        match available {
            Ok(bytes) => bytes.saturating_sub(self.safety_margin_bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Memory probe task failed, reporting zero headroom");
                0
            }
        }
    }

    fn compute_class(&self) -> ComputeClass {
        self.class
    }
}
