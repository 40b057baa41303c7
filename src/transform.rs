//! Metadata transformation pipelines.
//!
//! A pipeline converts a record's native metadata into a target format by
//! running it through an ordered chain of transforms, configured per target
//! metadata prefix:
//!
//! ```text
//! formats:
//!   dc:
//!     pipeline: [easydb, easydb2lido.xsl, lido2dc.xsl]
//!               ───┬──  ───────────────┬────────────
//!       native prefix        transform steps, in order
//! ```
//!
//! A step producing a document without a root element marks the record as
//! not representable in the target format; that is the
//! [`PipelineOutcome::Unavailable`] signal, not an error.

mod pipeline;
mod xslt;

pub use pipeline::{PipelineRegistry, TransformPipeline};
pub use xslt::{DEFAULT_PROCESSOR, XsltStylesheet};

use async_trait::async_trait;

use crate::Result;

/// One step of a pipeline: XML text in, XML text out.
///
/// Steps are stateless per call; a pipeline applies the same steps to many
/// records concurrently.
#[async_trait]
pub trait MetadataTransform: Send + Sync {
    /// Identifier used in logs (e.g. the stylesheet path)
    fn name(&self) -> &str;

    /// Transform one standalone XML fragment
    async fn apply(&self, input: &str) -> Result<String>;
}

/// Result of running a pipeline over one fragment
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The converted fragment, a well-formed document with a root element
    Transformed(String),
    /// The record has no representation in the target format
    Unavailable,
}

impl PipelineOutcome {
    /// Whether the record was suppressed
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
