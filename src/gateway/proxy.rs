//! Per-request orchestration

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};

use crate::backend::{BackendRequest, HttpBackend, OaiBackend};
use crate::config::Config;
use crate::continuation::{ContinuationStore, FileContinuationStore, MemoryContinuationStore};
use crate::query::{OaiQuery, QueryTransformer};
use crate::response::{ResponseTransformer, record_payload, resumption_token};
use crate::transform::PipelineRegistry;
use crate::xml::XmlDocument;
use crate::Result;

/// Inbound proxy request
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method
    pub method: Method,
    /// Inbound headers
    pub headers: HeaderMap,
    /// Query (and form) parameters in arrival order
    pub params: Vec<(String, String)>,
}

impl ProxyRequest {
    /// GET request without headers
    #[must_use]
    pub fn get<K: Into<String>, V: Into<String>>(params: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Transformed response
#[derive(Debug)]
pub struct ProxyResponse {
    /// Backend status, passed through
    pub status: StatusCode,
    /// Rewritten document
    pub document: XmlDocument,
    /// Query the backend was called with
    pub query: OaiQuery,
}

impl ProxyResponse {
    /// Serialized body
    pub fn body(&self) -> Result<String> {
        self.document.to_xml()
    }
}

/// How an inbound query is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestState {
    /// A new query, transformed for the backend
    Fresh,
    /// A follow-up page identified by a resumption token
    Continued(String),
}

impl RequestState {
    /// Classify raw parameters
    #[must_use]
    pub fn of(raw: &BTreeMap<String, String>) -> Self {
        match raw.get("resumptionToken") {
            Some(token) => Self::Continued(token.clone()),
            None => Self::Fresh,
        }
    }
}

/// The proxy core: query rewriting, backend call, response rewriting and
/// resumption token bookkeeping
pub struct OaiProxy {
    backend: Arc<dyn OaiBackend>,
    queries: QueryTransformer,
    responses: ResponseTransformer,
    store: Arc<dyn ContinuationStore>,
}

impl OaiProxy {
    /// Assemble a proxy from its parts
    #[must_use]
    pub fn new(
        backend: Arc<dyn OaiBackend>,
        queries: QueryTransformer,
        responses: ResponseTransformer,
        store: Arc<dyn ContinuationStore>,
    ) -> Self {
        Self {
            backend,
            queries,
            responses,
            store,
        }
    }

    /// Build the proxy described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let pipelines = Arc::new(PipelineRegistry::from_config(config)?);
        info!(pipelines = pipelines.len(), "Metadata pipelines ready");

        let store: Arc<dyn ContinuationStore> = match &config.continuation.path {
            Some(path) => {
                let store = FileContinuationStore::open(config.resolve_path(path))?;
                info!(path = %store.path().display(), "Continuation journal opened");
                Arc::new(store)
            }
            None => {
                info!("Continuation tokens kept in memory");
                Arc::new(MemoryContinuationStore::new())
            }
        };

        let backend = HttpBackend::new(&config.backend)?;
        info!(url = %backend.url(), "Backend client ready");

        Ok(Self::new(
            Arc::new(backend),
            QueryTransformer::new(Arc::clone(&pipelines)),
            ResponseTransformer::from_config(config, pipelines)?,
            store,
        ))
    }

    /// Query to send for `raw`: the stored query for a known resumption
    /// token, otherwise the transformed raw query
    #[must_use]
    pub fn resolve(&self, raw: &BTreeMap<String, String>) -> OaiQuery {
        match RequestState::of(raw) {
            RequestState::Continued(token) => {
                if let Some(mut stored) = self.store.get(&token) {
                    debug!(token = %token, sets = ?stored.sets, "Continuing stored query");
                    stored.set_param("resumptionToken", token);
                    return stored;
                }
                debug!(token = %token, "Unknown resumption token, passing through");
                self.queries.transform(raw)
            }
            RequestState::Fresh => self.queries.transform(raw),
        }
    }

    /// Serve one OAI-PMH request
    pub async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse> {
        let raw: BTreeMap<String, String> = request.params.into_iter().collect();
        let query = self.resolve(&raw);

        let response = self
            .backend
            .fetch(BackendRequest {
                method: request.method,
                headers: request.headers,
                args: query.backend_args(),
            })
            .await?;

        let document = self.responses.transform(&response.body, &query).await?;

        if let Some(token) = resumption_token(&document) {
            match self.store.put(&token, &query) {
                Ok(()) => debug!(token = %token, "Stored resumption token"),
                Err(e) => warn!(token = %token, error = %e, "Failed to store resumption token"),
            }
        }

        Ok(ProxyResponse {
            status: response.status,
            document,
            query,
        })
    }

    /// Metadata of one record in `format`, serialized as a standalone
    /// fragment; `None` when the backend returns no record
    pub async fn get_record(&self, format: &str, identifier: &str) -> Result<Option<String>> {
        let raw = BTreeMap::from([
            ("verb".to_string(), "GetRecord".to_string()),
            ("metadataPrefix".to_string(), format.to_string()),
            ("identifier".to_string(), identifier.to_string()),
        ]);
        let query = self.queries.transform(&raw);

        let response = self
            .backend
            .fetch(BackendRequest::get(query.backend_args()))
            .await?;
        let mut document = self.responses.transform(&response.body, &query).await?;

        match record_payload(&document) {
            Some(payload) => document.fragment_xml(payload).map(Some),
            None => Ok(None),
        }
    }
}
