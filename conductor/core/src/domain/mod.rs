//! Domains
//!
//! A domain pairs a topic (keywords plus a description embedding) with the
//! prompt, backend and sampling settings used to answer it.

mod descriptor;
mod registry;

pub use descriptor::{DomainConfig, DomainDescriptor};
pub use registry::{DomainRegistry, DomainRegistryBuilder, RegistryError};
