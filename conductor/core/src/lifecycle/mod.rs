//! Model Lifecycle
//!
//! Keeps inference backends resident within a memory budget.
//!
//! ```text
//! ┌──────────────────────────── ModelLifecycleManager ───────────────────────────┐
//! │                                                                              │
//! │  acquire(id) ──► slot map (parking_lot::Mutex) ──► Ready? pin + lease        │
//! │                      │                                                       │
//! │                      ├─ Loading? ──► wait on watch channel (single-flight)   │
//! │                      │                                                       │
//! │                      └─ absent ──► ResourceProbe ──► QuantizationPolicy      │
//! │                                      ──► LRU eviction ──► BackendLoader      │
//! │                                                                              │
//! │  BackendLease::drop ──► ref_count -= 1, last_used_at = now                   │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```

mod handle;
mod manager;
mod quantization;

pub use handle::{BackendHandle, BackendLease, HandleState};
pub use manager::{LifecycleError, LifecycleStats, ModelLifecycleManager};
pub use quantization::{QuantizationLevel, QuantizationPolicy};
