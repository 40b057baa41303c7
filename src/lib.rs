//! OAI-PMH Proxy Library
//!
//! A reverse proxy in front of an OAI-PMH 2.0 repository that extends the
//! protocol without touching the backend.
//!
//! # Features
//!
//! - **Set intersection**: `set=A*B` returns records in both `A` and `B`
//! - **Format pipelines**: serve additional metadata prefixes by converting
//!   native records through XSLT steps
//! - **Catalog extension**: advertised formats and intersection sets are
//!   added to `ListMetadataFormats` and `ListSets`
//! - **Resumption**: follow-up pages keep the original query's rewrites

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod continuation;
pub mod error;
pub mod gateway;
pub mod query;
pub mod response;
pub mod transform;
pub mod xml;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
