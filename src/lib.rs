//! Hemmer provider for MongoDB
//!
//! Manages MongoDB database users, custom roles, collections and indexes as
//! declarative resources. The host spawns the provider binary, reads the
//! handshake from stdout and drives it over gRPC.
//!
//! # Resources
//!
//! | Type | Identifier segments |
//! |------|---------------------|
//! | `mongodb_db_user` | `{database}.{username}` |
//! | `mongodb_db_role` | `{database}.{role}` |
//! | `mongodb_db_collection` | `{database}.{collection}` |
//! | `mongodb_db_index` | `{database}.{collection}.{index}` |
//!
//! Identifiers are the standard base64 encoding of the segments joined by
//! `.`; see [`id`].
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_mongodb::{init_logging, serve, MongoProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(MongoProvider::new()).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! On startup the provider prints one line to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`
//!
//! # Provider Configuration
//!
//! Every connection setting may come from the configuration block or from the
//! environment (`MONGO_HOST`, `MONGO_PORT`, `MONGO_USR`, `MONGO_PWD`,
//! `MONGODB_CERT`); see [`config`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod id;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod testing;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{AdminClient, Connector, MongoAdminClient, MongoConnector};
pub use config::{parse_proxy_url, ClientConfig, MissingPolicy, ProviderConfig, ProviderSettings, ProxyAddress};
pub use error::ProviderError;
pub use id::ResourceId;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use plan::{AttributeChange, PlanResult};
pub use provider::{MongoProvider, ResourceKind};
pub use resources::Reconciler;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ImportedResource,
    ProviderMetadata, ProviderService, ServeOptions, ServerCapabilities, HANDSHAKE_PREFIX,
    PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};

pub use async_trait::async_trait;
