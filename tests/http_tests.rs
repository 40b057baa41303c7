//! HTTP surface tests: router served on an ephemeral port

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oai_proxy::backend::{BackendRequest, BackendResponse, OaiBackend};
use oai_proxy::continuation::MemoryContinuationStore;
use oai_proxy::gateway::{AppState, OaiProxy, create_router};
use oai_proxy::query::QueryTransformer;
use oai_proxy::response::ResponseTransformer;
use oai_proxy::transform::PipelineRegistry;
use oai_proxy::{Error, Result};
use parking_lot::Mutex;
use reqwest::{StatusCode, header};
use tokio::net::TcpListener;

const IDENTIFY: &str = r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <request verb="Identify">http://backend.internal/oai</request>
  <Identify><repositoryName>Test</repositoryName></Identify>
</OAI-PMH>"#;

/// Answers every call with one body, or hangs when `delay` is set
struct EchoBackend {
    body: String,
    delay: Option<Duration>,
    calls: Mutex<Vec<BackendRequest>>,
}

#[async_trait]
impl OaiBackend for EchoBackend {
    async fn fetch(&self, request: BackendRequest) -> Result<BackendResponse> {
        self.calls.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.body.is_empty() {
            return Err(Error::BackendUnavailable("connection refused".to_string()));
        }
        Ok(BackendResponse {
            status: StatusCode::OK,
            body: self.body.clone(),
        })
    }
}

async fn serve(backend: Arc<EchoBackend>, request_timeout: Duration) -> String {
    let pipelines = Arc::new(PipelineRegistry::new());
    let proxy = OaiProxy::new(
        backend,
        QueryTransformer::new(Arc::clone(&pipelines)),
        ResponseTransformer::new("https://proxy.example/oai", pipelines)
            .with_instruction("xml-stylesheet", "type=\"text/xsl\" href=\"/oai.xsl\"")
            .with_pretty(true),
        Arc::new(MemoryContinuationStore::new()),
    );
    let app = create_router(Arc::new(AppState {
        proxy: Arc::new(proxy),
        request_timeout,
    }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn backend(body: &str, delay: Option<Duration>) -> Arc<EchoBackend> {
    Arc::new(EchoBackend {
        body: body.to_string(),
        delay,
        calls: Mutex::new(Vec::new()),
    })
}

#[tokio::test]
async fn test_health() {
    let base = serve(backend(IDENTIFY, None), Duration::from_secs(5)).await;
    let text = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_oai_get_is_rewritten() {
    let echo = backend(IDENTIFY, None);
    let base = serve(Arc::clone(&echo), Duration::from_secs(5)).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/oai?verb=Identify&x-debug=1"))
        .header(header::COOKIE, "session=abc")
        .header("X-Harvester", "test")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/xml; charset=utf-8"
    );
    let body = response.text().await.unwrap();

    assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
    let stylesheet = body
        .find("<?xml-stylesheet type=\"text/xsl\" href=\"/oai.xsl\"?>")
        .unwrap();
    assert!(stylesheet < body.find("<OAI-PMH").unwrap());
    assert!(body.contains(">https://proxy.example/oai</request>"));
    let name = body
        .lines()
        .find(|line| line.trim() == "<repositoryName>Test</repositoryName>")
        .unwrap();
    assert!(name.starts_with(' '));

    let calls = echo.calls.lock();
    assert_eq!(calls[0].args, vec![("verb".to_string(), "Identify".to_string())]);
    assert_eq!(calls[0].headers["x-harvester"], "test");
}

#[tokio::test]
async fn test_oai_post_form() {
    let echo = backend(IDENTIFY, None);
    let base = serve(Arc::clone(&echo), Duration::from_secs(5)).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/oai"))
        .form(&[("verb", "Identify"), ("ignored", "1")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = echo.calls.lock();
    assert_eq!(calls[0].method, reqwest::Method::POST);
    assert_eq!(calls[0].args, vec![("verb".to_string(), "Identify".to_string())]);
}

#[tokio::test]
async fn test_backend_failure_is_bad_gateway() {
    let base = serve(backend("", None), Duration::from_secs(5)).await;
    let response = reqwest::get(format!("{base}/oai?verb=Identify")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response.text().await.unwrap();
    assert!(body.contains("<error code=\"backendUnavailable\">"));
}

#[tokio::test]
async fn test_request_timeout_is_gateway_timeout() {
    let base = serve(
        backend(IDENTIFY, Some(Duration::from_secs(10))),
        Duration::from_millis(100),
    )
    .await;
    let response = reqwest::get(format!("{base}/oai?verb=Identify")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_record_not_found() {
    let missing = r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <request verb="GetRecord">x</request>
  <error code="idDoesNotExist">no such record</error>
</OAI-PMH>"#;
    let echo = backend(missing, None);
    let base = serve(Arc::clone(&echo), Duration::from_secs(5)).await;

    let response = reqwest::get(format!("{base}/record/easydb/oai:example.org:42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let calls = echo.calls.lock();
    assert_eq!(
        calls[0].args,
        vec![
            ("verb".to_string(), "GetRecord".to_string()),
            ("identifier".to_string(), "oai:example.org:42".to_string()),
            ("metadataPrefix".to_string(), "easydb".to_string()),
        ]
    );
}
