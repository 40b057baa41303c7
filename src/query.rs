//! OAI-PMH queries and the query transformer.
//!
//! A client query is rewritten into the query actually sent to the backend
//! plus the residual policy the response transformer applies:
//!
//! - `set=B*A` becomes `set=A` upstream, with `sets = [A, B]` kept for
//!   intersection filtering;
//! - a `metadataPrefix` backed by a transformation pipeline becomes the
//!   pipeline's native prefix upstream, with the requested prefix kept as
//!   `target_prefix`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::transform::PipelineRegistry;

/// Parameters forwarded to the backend; everything else stays local.
pub const OAI_ARGUMENTS: [&str; 7] = [
    "verb",
    "identifier",
    "metadataPrefix",
    "from",
    "until",
    "set",
    "resumptionToken",
];

/// Separator of intersected set specifiers in the `set` parameter
pub const SET_SEPARATOR: char = '*';

/// OAI-PMH request verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// `Identify`
    Identify,
    /// `ListMetadataFormats`
    ListMetadataFormats,
    /// `ListSets`
    ListSets,
    /// `ListIdentifiers`
    ListIdentifiers,
    /// `ListRecords`
    ListRecords,
    /// `GetRecord`
    GetRecord,
}

impl Verb {
    /// Parse a verb as it appears in the `verb` parameter
    #[must_use]
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "Identify" => Some(Self::Identify),
            "ListMetadataFormats" => Some(Self::ListMetadataFormats),
            "ListSets" => Some(Self::ListSets),
            "ListIdentifiers" => Some(Self::ListIdentifiers),
            "ListRecords" => Some(Self::ListRecords),
            "GetRecord" => Some(Self::GetRecord),
            _ => None,
        }
    }

    /// Protocol name of the verb
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "Identify",
            Self::ListMetadataFormats => "ListMetadataFormats",
            Self::ListSets => "ListSets",
            Self::ListIdentifiers => "ListIdentifiers",
            Self::ListRecords => "ListRecords",
            Self::GetRecord => "GetRecord",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client query after transformation.
///
/// `params` holds every parameter the client sent (with `set` and
/// `metadataPrefix` rewritten for the backend). The query is what the
/// continuation store persists, so it serializes losslessly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaiQuery {
    /// Query parameters, outgoing values
    pub params: BTreeMap<String, String>,
    /// Intersected set specifiers, ascending
    #[serde(default)]
    pub sets: Vec<String>,
    /// Metadata prefix the client asked for, when served through a pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_prefix: Option<String>,
}

impl OaiQuery {
    /// Build an untransformed query from parameter pairs; later pairs win
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// Parameter value
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Set a parameter value
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        self.params.insert(name.to_string(), value.into());
    }

    /// Parsed `verb`, `None` for absent or unknown verbs
    #[must_use]
    pub fn verb(&self) -> Option<Verb> {
        self.get("verb").and_then(Verb::from_param)
    }

    /// `resumptionToken` parameter
    #[must_use]
    pub fn resumption_token(&self) -> Option<&str> {
        self.get("resumptionToken")
    }

    /// The `set` attribute value clients expect back: all sets joined by `*`
    #[must_use]
    pub fn joined_sets(&self) -> Option<String> {
        (!self.sets.is_empty()).then(|| self.sets.join(&SET_SEPARATOR.to_string()))
    }

    /// Parameters sent to the backend, restricted to [`OAI_ARGUMENTS`]
    #[must_use]
    pub fn backend_args(&self) -> Vec<(String, String)> {
        OAI_ARGUMENTS
            .iter()
            .filter_map(|&name| self.get(name).map(|v| (name.to_string(), v.to_string())))
            .collect()
    }
}

/// Rewrites client queries for the backend.
pub struct QueryTransformer {
    pipelines: Arc<PipelineRegistry>,
}

impl QueryTransformer {
    /// Create a transformer resolving prefixes against `pipelines`
    #[must_use]
    pub fn new(pipelines: Arc<PipelineRegistry>) -> Self {
        Self { pipelines }
    }

    /// Transform a raw client query. Never fails: malformed verbs and
    /// prefixes are left for the backend to reject.
    #[must_use]
    pub fn transform(&self, raw: &BTreeMap<String, String>) -> OaiQuery {
        let mut query = OaiQuery {
            params: raw.clone(),
            sets: Vec::new(),
            target_prefix: None,
        };

        if let Some(set) = raw.get("set") {
            let mut sets: Vec<String> = set.split(SET_SEPARATOR).map(str::to_string).collect();
            // byte order: every permutation yields the same outgoing set
            sets.sort();
            if sets.len() > 1 {
                query.set_param("set", sets[0].clone());
            }
            query.sets = sets;
        }

        if let Some(prefix) = raw.get("metadataPrefix")
            && let Some(pipeline) = self.pipelines.get(prefix)
        {
            query.set_param("metadataPrefix", pipeline.source_prefix());
            query.target_prefix = Some(prefix.clone());
        }

        query
    }
}
