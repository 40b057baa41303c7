//! Building the proxy from a configuration file

use std::fs;

use oai_proxy::Error;
use oai_proxy::config::Config;
use oai_proxy::gateway::OaiProxy;
use oai_proxy::transform::PipelineRegistry;
use pretty_assertions::assert_eq;

const CONFIG: &str = r#"
backend:
  url: http://127.0.0.1:1/oai
  timeout: 2s
base_url: https://proxy.example/oai
pretty: false
formats:
  oai_dc:
    pipeline: [easydb, xslt/easydb2dc.xsl]
    schema: http://www.openarchives.org/OAI/2.0/oai_dc.xsd
    namespace: http://www.openarchives.org/OAI/2.0/oai_dc/
intersect_sets:
  "tagfilter:lza": "^pool:"
continuation:
  path: state/tokens.jsonl
transform:
  processor: xsltproc
  timeout: 500ms
"#;

#[test]
fn test_proxy_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("xslt")).unwrap();
    fs::write(dir.path().join("xslt/easydb2dc.xsl"), "<xsl:stylesheet/>").unwrap();
    let path = dir.path().join("proxy.yaml");
    fs::write(&path, CONFIG).unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    assert!(!config.pretty);
    assert_eq!(config.transform.timeout.as_millis(), 500);

    let registry = PipelineRegistry::from_config(&config).unwrap();
    assert_eq!(registry.get("oai_dc").unwrap().source_prefix(), "easydb");

    OaiProxy::from_config(&config).unwrap();
    assert!(dir.path().join("state/tokens.jsonl").exists());
}

#[test]
fn test_missing_stylesheet_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.yaml");
    fs::write(&path, CONFIG).unwrap();

    let config = Config::load(Some(path.as_path())).unwrap();
    let err = OaiProxy::from_config(&config).err().unwrap();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn test_invalid_backend_url_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.yaml");
    fs::write(
        &path,
        "backend:\n  url: not a url\nbase_url: https://proxy.example/oai\n",
    )
    .unwrap();

    let err = Config::load(Some(path.as_path())).unwrap_err();
    assert!(err.to_string().contains("backend.url"));
}
