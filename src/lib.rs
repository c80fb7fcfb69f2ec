//! OPC Provider
//!
//! Manages Oracle Cloud (OPC) compute security rules through the
//! infrastructure-as-code resource lifecycle: plan, create, read, update,
//! delete and import.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Client factory**: [`Config::client`] turns the provider configuration
//!   into an [`OpcClient`] for the compute API (and optionally storage)
//! - **Resource reconciler**: [`resources::SecurityRuleResource`] maps the
//!   `opc_compute_security_rule` lifecycle onto compute API calls
//! - **ProviderService trait**: the host-facing contract, implemented by
//!   [`OpcProvider`]
//! - **Schema types**: Types for describing the provider and resource schemas
//! - **Error types**: [`ProviderError`] for the host and [`ApiError`] for the API
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use opc_provider::{OpcProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     opc_provider::init_logging();
//!
//!     let provider = OpcProvider::new();
//!     provider
//!         .configure(json!({
//!             "user": "user@example.com",
//!             "password": "secret",
//!             "identity_domain": "mydomain",
//!             "endpoint": "https://api-z27.compute.us6.oraclecloud.com/"
//!         }))
//!         .await?;
//!
//!     let state = provider
//!         .create(
//!             "opc_compute_security_rule",
//!             json!({"name": "web-to-db", "flow_direction": "ingress"}),
//!         )
//!         .await?;
//!     println!("{}", state["uri"]);
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! Logs go to stderr. Set `RUST_LOG=info,opc_api=debug` to see every compute
//! API request and response.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod service;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use client::OpcClient;
pub use config::Config;
pub use error::{ApiError, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::OpcProvider;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
