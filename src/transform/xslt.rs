//! XSLT steps executed by an external processor.
//!
//! The processor is invoked as `<processor> --nonet <stylesheet> -`, the
//! calling convention of `xsltproc`: the fragment goes to stdin and the
//! result document comes back on stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::MetadataTransform;
use crate::{Error, Result};

/// Default processor executable
pub const DEFAULT_PROCESSOR: &str = "xsltproc";

/// A stylesheet applied through an external XSLT processor
pub struct XsltStylesheet {
    processor: String,
    stylesheet: PathBuf,
    name: String,
    timeout: Duration,
}

impl XsltStylesheet {
    /// Stylesheet at `stylesheet`, run by `processor` with a per-call deadline
    #[must_use]
    pub fn new(processor: impl Into<String>, stylesheet: impl Into<PathBuf>, timeout: Duration) -> Self {
        let stylesheet = stylesheet.into();
        Self {
            processor: processor.into(),
            name: stylesheet.display().to_string(),
            stylesheet,
            timeout,
        }
    }
}

#[async_trait]
impl MetadataTransform for XsltStylesheet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, input: &str) -> Result<String> {
        let mut child = Command::new(&self.processor)
            .arg("--nonet")
            .arg(&self.stylesheet)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transform(format!("Failed to spawn {}: {e}", self.processor)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transform("Failed to get processor stdin".to_string()))?;
        let payload = input.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            let written = stdin.write_all(&payload).await;
            drop(stdin);
            written
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::BackendTimeout(format!("{} timed out after {:?}", self.name, self.timeout))
            })?
            .map_err(|e| Error::Transform(format!("{}: {e}", self.name)))?;

        // A processor may exit before consuming all input; its exit status decides.
        if let Ok(Err(e)) = writer.await {
            debug!(stylesheet = %self.name, error = %e, "Processor closed stdin early");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transform(format!(
                "{} failed ({}): {}",
                self.name,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| Error::Transform(format!("{} returned invalid UTF-8: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_processor_is_transform_error() {
        let step = XsltStylesheet::new(
            "/nonexistent/xslt-processor",
            "identity.xsl",
            Duration::from_secs(5),
        );
        let err = step.apply("<m/>").await.unwrap_err();
        assert!(matches!(err, Error::Transform(_)));
        assert_eq!(step.name(), "identity.xsl");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_processor_reports_status() {
        // `false` ignores its arguments and exits 1
        let step = XsltStylesheet::new("false", "any.xsl", Duration::from_secs(5));
        let err = step.apply("<m/>").await.unwrap_err();
        assert!(err.to_string().contains("any.xsl failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_processor_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let processor = dir.path().join("slow-xslt");
        std::fs::write(&processor, "#!/bin/sh\nexec sleep 10\n").unwrap();
        std::fs::set_permissions(&processor, std::fs::Permissions::from_mode(0o755)).unwrap();

        let step = XsltStylesheet::new(
            processor.display().to_string(),
            "any.xsl",
            Duration::from_millis(200),
        );
        let err = step.apply("<m/>").await.unwrap_err();
        assert!(matches!(err, Error::BackendTimeout(_)), "{err}");
        assert_eq!(err.status_code(), reqwest::StatusCode::GATEWAY_TIMEOUT);
    }
}
