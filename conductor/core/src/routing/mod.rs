//! Intent Routing
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        IntentRouter                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐  │
//! │  │  similarity  │──►│   keywords   │──►│ RoutingDecision │  │
//! │  │ (classifier) │   │  (fallback)  │   │  (or escalate)  │  │
//! │  └──────────────┘   └──────────────┘   └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod decision;
pub mod keywords;
pub mod router;
pub mod similarity;

pub use decision::{RoutingDecision, RoutingMethod};
pub use router::IntentRouter;
pub use similarity::cosine_similarity;
