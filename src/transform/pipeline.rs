//! Pipeline execution and the prefix → pipeline registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{MetadataTransform, PipelineOutcome, XsltStylesheet};
use crate::config::Config;
use crate::xml::{XmlDocument, has_root_element};
use crate::{Error, Result};

// ============================================================================
// Compiled pipeline
// ============================================================================

/// Fixed chain of transforms producing one target format.
pub struct TransformPipeline {
    source_prefix: String,
    steps: Vec<Arc<dyn MetadataTransform>>,
}

impl TransformPipeline {
    /// Pipeline reading records in `source_prefix` and applying `steps` in order
    #[must_use]
    pub fn new(source_prefix: impl Into<String>, steps: Vec<Arc<dyn MetadataTransform>>) -> Self {
        Self {
            source_prefix: source_prefix.into(),
            steps,
        }
    }

    /// Native metadata prefix requested from the backend
    #[must_use]
    pub fn source_prefix(&self) -> &str {
        &self.source_prefix
    }

    /// Number of transform steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline is the identity
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step over `fragment`.
    ///
    /// Stops at the first step whose output has no root element and reports
    /// [`PipelineOutcome::Unavailable`]. Output that is not well-formed XML
    /// is a [`Error::Transform`].
    pub async fn run(&self, fragment: &str) -> Result<PipelineOutcome> {
        if !has_root_element(fragment) {
            return Ok(PipelineOutcome::Unavailable);
        }

        let mut text = fragment.to_string();
        for step in &self.steps {
            text = step.apply(&text).await?;
            if !has_root_element(&text) {
                debug!(step = %step.name(), "Transform produced no root element");
                return Ok(PipelineOutcome::Unavailable);
            }
            XmlDocument::parse(&text).map_err(|e| {
                Error::Transform(format!("{} produced malformed XML: {e}", step.name()))
            })?;
        }

        Ok(PipelineOutcome::Transformed(text))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Pipelines by target metadata prefix, resolved once at startup.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<TransformPipeline>>,
}

impl PipelineRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline for every format with a non-empty `pipeline`.
    ///
    /// Stylesheet paths resolve against the configuration directory and
    /// must exist.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for (target, format) in &config.formats {
            let Some((source, stylesheets)) = format.pipeline.split_first() else {
                continue;
            };
            let mut steps: Vec<Arc<dyn MetadataTransform>> = Vec::with_capacity(stylesheets.len());
            for stylesheet in stylesheets {
                let path = config.resolve_path(stylesheet);
                if !path.is_file() {
                    return Err(Error::Config(format!(
                        "Stylesheet for format {target} not found: {}",
                        path.display()
                    )));
                }
                steps.push(Arc::new(XsltStylesheet::new(
                    config.transform.processor.clone(),
                    path,
                    config.transform.timeout,
                )));
            }
            debug!(format = %target, source = %source, steps = steps.len(), "Registered pipeline");
            registry.insert(target.clone(), TransformPipeline::new(source.clone(), steps));
        }
        Ok(registry)
    }

    /// Register the pipeline serving `target_prefix`
    pub fn insert(&mut self, target_prefix: impl Into<String>, pipeline: TransformPipeline) {
        self.pipelines
            .insert(target_prefix.into(), Arc::new(pipeline));
    }

    /// Pipeline serving `target_prefix`
    #[must_use]
    pub fn get(&self, target_prefix: &str) -> Option<Arc<TransformPipeline>> {
        self.pipelines.get(target_prefix).cloned()
    }

    /// Number of registered pipelines
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
