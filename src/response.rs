//! Rewriting of backend responses.
//!
//! Everything the proxy adds to OAI-PMH happens here, on the parsed backend
//! document: multi-set filtering, per-record format conversion, catalog
//! extension for `ListMetadataFormats` and `ListSets`, processing
//! instructions, and the `request` element.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::config::{Config, FormatConfig};
use crate::query::{OaiQuery, SET_SEPARATOR, Verb};
use crate::transform::{PipelineOutcome, PipelineRegistry};
use crate::xml::{NodeId, OAI_NS, XmlDocument};
use crate::{Error, Result};

/// Advertise `base*other` for every set `other` matching `pattern`
#[derive(Debug, Clone)]
pub struct IntersectionRule {
    base: String,
    pattern: Regex,
}

impl IntersectionRule {
    /// Compile a rule; an invalid pattern is a configuration error
    pub fn new(base: impl Into<String>, pattern: &str) -> Result<Self> {
        let base = base.into();
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid intersection pattern for {base}: {e}")))?;
        Ok(Self { base, pattern })
    }

    /// Base set specifier
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }
}

/// Applies the proxy's extensions to backend documents
pub struct ResponseTransformer {
    base_url: String,
    instructions: Vec<(String, String)>,
    formats: BTreeMap<String, FormatConfig>,
    intersections: Vec<IntersectionRule>,
    pipelines: Arc<PipelineRegistry>,
    pretty: bool,
}

impl ResponseTransformer {
    /// Transformer writing `base_url` into `request` elements, with no
    /// other extension configured
    #[must_use]
    pub fn new(base_url: impl Into<String>, pipelines: Arc<PipelineRegistry>) -> Self {
        Self {
            base_url: base_url.into(),
            instructions: Vec::new(),
            formats: BTreeMap::new(),
            intersections: Vec::new(),
            pipelines,
            pretty: false,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &Config, pipelines: Arc<PipelineRegistry>) -> Result<Self> {
        let intersections = config
            .intersect_sets
            .iter()
            .map(|(base, pattern)| IntersectionRule::new(base.clone(), pattern))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            instructions: config.processing_instructions(),
            formats: config.formats.clone(),
            intersections,
            pipelines,
            pretty: config.pretty,
        })
    }

    /// Add a processing instruction, injected after those already added
    #[must_use]
    pub fn with_instruction(mut self, target: impl Into<String>, content: impl Into<String>) -> Self {
        self.instructions.push((target.into(), content.into()));
        self
    }

    /// Add a metadata format descriptor
    #[must_use]
    pub fn with_format(mut self, prefix: impl Into<String>, format: FormatConfig) -> Self {
        self.formats.insert(prefix.into(), format);
        self
    }

    /// Add a set intersection rule
    #[must_use]
    pub fn with_intersection(mut self, rule: IntersectionRule) -> Self {
        self.intersections.push(rule);
        self
    }

    /// Enable or disable indentation
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Rewrite one backend response for the client
    pub async fn transform(&self, body: &str, query: &OaiQuery) -> Result<XmlDocument> {
        let mut doc = XmlDocument::parse(body)
            .map_err(|e| Error::BackendProtocol(format!("Unparsable backend response: {e}")))?;
        if doc.root().is_none() {
            return Err(Error::BackendProtocol(
                "Backend response has no root element".to_string(),
            ));
        }

        let target = query.target_prefix.as_deref();
        match query.verb() {
            Some(verb @ (Verb::ListIdentifiers | Verb::ListRecords)) => {
                if query.sets.len() > 1 {
                    let removed = filter_records(&mut doc, verb, &query.sets)?;
                    debug!(verb = %verb, sets = ?query.sets, removed, "Filtered by set intersection");
                }
                if verb == Verb::ListRecords
                    && let Some(prefix) = target
                {
                    self.rewrite_records(&mut doc, prefix).await?;
                }
            }
            Some(Verb::GetRecord) => {
                if let Some(prefix) = target {
                    self.rewrite_records(&mut doc, prefix).await?;
                }
            }
            Some(Verb::ListMetadataFormats) if !self.formats.is_empty() => {
                self.extend_formats(&mut doc)?;
            }
            Some(Verb::ListSets) if !self.intersections.is_empty() => {
                self.extend_sets(&mut doc)?;
            }
            _ => {}
        }

        for (name, content) in &self.instructions {
            let instruction = doc.create_processing_instruction(name, content);
            doc.insert_before_root(instruction)?;
        }
        self.rewrite_request(&mut doc, query)?;

        if self.pretty {
            doc.indent()?;
        }
        Ok(doc)
    }

    /// Convert each record's metadata through the pipeline for `prefix`.
    /// Records the pipeline cannot represent are replaced by a comment.
    async fn rewrite_records(&self, doc: &mut XmlDocument, prefix: &str) -> Result<()> {
        let Some(pipeline) = self.pipelines.get(prefix) else {
            return Ok(());
        };

        let payloads: Vec<(NodeId, NodeId)> = doc
            .descendants_named(OAI_NS, "record")
            .into_iter()
            .filter_map(|record| {
                let metadata = doc.first_child_named(record, OAI_NS, "metadata")?;
                let payload = doc.child_elements(metadata).next()?;
                Some((record, payload))
            })
            .collect();

        let mut skipped = 0usize;
        for (record, payload) in payloads {
            let fragment = doc.fragment_xml(payload)?;
            match pipeline.run(&fragment).await? {
                PipelineOutcome::Transformed(result) => {
                    doc.graft(payload, &result)?;
                }
                PipelineOutcome::Unavailable => {
                    let marker =
                        doc.create_comment(&format!("skipped record not available in {prefix} format"));
                    doc.replace(record, marker)?;
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            debug!(prefix, skipped, "Suppressed records unavailable in target format");
        }
        Ok(())
    }

    /// Overlay configured descriptors onto the advertised formats and
    /// append the ones the backend does not know
    fn extend_formats(&self, doc: &mut XmlDocument) -> Result<()> {
        let mut pending: Vec<&str> = self.formats.keys().map(String::as_str).collect();

        for entry in doc.descendants_named(OAI_NS, "metadataFormat") {
            let Some(prefix_node) = doc.first_child_named(entry, OAI_NS, "metadataPrefix") else {
                continue;
            };
            let prefix = doc.text(prefix_node).trim().to_string();
            if let Some(format) = self.formats.get(&prefix) {
                overlay_format(doc, entry, format)?;
                pending.retain(|name| *name != prefix);
            }
        }

        let Some(&list) = doc.descendants_named(OAI_NS, "ListMetadataFormats").first() else {
            return Ok(());
        };
        for prefix in pending {
            let entry = doc.create_element(OAI_NS, "metadataFormat");
            doc.append_child(list, entry)?;
            doc.append_text_element(entry, OAI_NS, "metadataPrefix", prefix)?;
            overlay_format(doc, entry, &self.formats[prefix])?;
        }
        Ok(())
    }

    /// Append the intersections the rules advertise
    fn extend_sets(&self, doc: &mut XmlDocument) -> Result<()> {
        let Some(&list) = doc.descendants_named(OAI_NS, "ListSets").first() else {
            return Ok(());
        };

        let advertised: Vec<(String, String)> = doc
            .children_named(list, OAI_NS, "set")
            .into_iter()
            .filter_map(|set| {
                let spec = doc.first_child_named(set, OAI_NS, "setSpec")?;
                let name = doc
                    .first_child_named(set, OAI_NS, "setName")
                    .map(|node| doc.text(node).trim().to_string())
                    .unwrap_or_default();
                Some((doc.text(spec).trim().to_string(), name))
            })
            .collect();

        let mut added = 0usize;
        for rule in &self.intersections {
            let Some((_, base_name)) = advertised.iter().find(|(spec, _)| spec == rule.base()) else {
                continue;
            };
            for (spec, name) in &advertised {
                if spec == rule.base() || !rule.pattern.is_match(spec) {
                    continue;
                }
                let set = doc.create_element(OAI_NS, "set");
                doc.append_child(list, set)?;
                let combined = format!("{}{SET_SEPARATOR}{spec}", rule.base());
                doc.append_text_element(set, OAI_NS, "setSpec", &combined)?;
                doc.append_text_element(set, OAI_NS, "setName", &format!("{base_name} {name}"))?;
                added += 1;
            }
        }

        debug!(added, "Synthesized intersection sets");
        Ok(())
    }

    fn rewrite_request(&self, doc: &mut XmlDocument, query: &OaiQuery) -> Result<()> {
        let joined = query.joined_sets();
        for request in doc.descendants_named(OAI_NS, "request") {
            doc.set_text(request, &self.base_url)?;
            if let Some(target) = &query.target_prefix
                && doc.attribute(request, "metadataPrefix").is_some()
            {
                doc.set_attribute(request, "metadataPrefix", target);
            }
            if let Some(sets) = &joined {
                doc.set_attribute(request, "set", sets);
            }
        }
        Ok(())
    }
}

/// Text of the first `resumptionToken` element, when non-empty
#[must_use]
pub fn resumption_token(doc: &XmlDocument) -> Option<String> {
    doc.descendants_named(OAI_NS, "resumptionToken")
        .first()
        .map(|&node| doc.text(node).trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Metadata payload of a `GetRecord` response
#[must_use]
pub fn record_payload(doc: &XmlDocument) -> Option<NodeId> {
    let &get_record = doc.descendants_named(OAI_NS, "GetRecord").first()?;
    doc.find_path(get_record, OAI_NS, &["record", "metadata"])
        .into_iter()
        .find_map(|metadata| doc.child_elements(metadata).next())
}

/// Keep only candidates belonging to every set in `sets`
fn filter_records(doc: &mut XmlDocument, verb: Verb, sets: &[String]) -> Result<usize> {
    const HEADER_SETS: &[&str] = &["setSpec"];
    const RECORD_SETS: &[&str] = &["header", "setSpec"];

    let (candidates, memberships) = match verb {
        Verb::ListIdentifiers => (doc.descendants_named(OAI_NS, "header"), HEADER_SETS),
        _ => (doc.descendants_named(OAI_NS, "record"), RECORD_SETS),
    };

    let mut removed = 0;
    for node in candidates {
        let specs: Vec<String> = doc
            .find_path(node, OAI_NS, memberships)
            .into_iter()
            .map(|spec| doc.text(spec).trim().to_string())
            .collect();
        if !sets.iter().all(|set| specs.contains(set)) {
            doc.remove(node)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn overlay_format(doc: &mut XmlDocument, entry: NodeId, format: &FormatConfig) -> Result<()> {
    if let Some(schema) = &format.schema {
        set_child_text(doc, entry, "schema", schema, &["metadataPrefix"])?;
    }
    if let Some(namespace) = &format.namespace {
        set_child_text(doc, entry, "metadataNamespace", namespace, &["metadataPrefix", "schema"])?;
    }
    Ok(())
}

/// Overwrite the text of `parent`'s `local` child, creating it after the
/// last existing element among `after` when missing
fn set_child_text(
    doc: &mut XmlDocument,
    parent: NodeId,
    local: &str,
    text: &str,
    after: &[&str],
) -> Result<()> {
    if let Some(existing) = doc.first_child_named(parent, OAI_NS, local) {
        return doc.set_text(existing, text);
    }

    let anchor = after
        .iter()
        .rev()
        .find_map(|step| doc.first_child_named(parent, OAI_NS, step));
    let child = doc.create_element(OAI_NS, local);
    match anchor {
        Some(anchor) => doc.insert_after(anchor, child)?,
        None => doc.append_child(parent, child)?,
    }
    doc.set_text(child, text)
}
