//! Configuration management

use std::{
    collections::{BTreeMap, HashMap},
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::transform::DEFAULT_PROCESSOR;
use crate::{Error, Result};

/// `${VAR}` or `${VAR:-default}`
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid placeholder pattern")
});

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before `${VAR}` expansion.
    /// Paths support ~ expansion; later files override earlier ones.
    pub env_files: Vec<String>,
    /// Listener configuration
    pub server: ServerConfig,
    /// OAI-PMH backend
    pub backend: BackendConfig,
    /// Public base URL written into every `request` element
    pub base_url: String,
    /// Processing instructions injected before the root element, in order
    pub instructions: Vec<InstructionConfig>,
    /// Shorthand for an `xml-stylesheet` instruction referencing this URL
    pub xslt: Option<String>,
    /// Metadata format descriptors by prefix
    pub formats: BTreeMap<String, FormatConfig>,
    /// Indent responses
    pub pretty: bool,
    /// Advertised set intersections: base set spec → pattern of partner specs
    pub intersect_sets: BTreeMap<String, String>,
    /// Resumption token persistence
    pub continuation: ContinuationConfig,
    /// Transform step execution
    pub transform: TransformConfig,
    /// Directory of the loaded configuration file; relative stylesheet
    /// paths resolve against it
    #[serde(skip)]
    pub config_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            base_url: String::new(),
            instructions: Vec::new(),
            xslt: None,
            formats: BTreeMap::new(),
            pretty: true,
            intersect_sets: BTreeMap::new(),
            continuation: ContinuationConfig::default(),
            transform: TransformConfig::default(),
            config_dir: None,
        }
    }
}

/// One processing instruction, `<?target content?>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionConfig {
    /// Instruction target, e.g. `xml-stylesheet`
    pub target: String,
    /// Instruction content
    #[serde(default)]
    pub content: String,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Deadline for one proxied request, backend call and transforms included
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// OAI-PMH backend and HTTP client options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend endpoint URL
    pub url: String,
    /// Total timeout of one backend request
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Connection establishment timeout
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Extra headers sent with every backend request
    pub headers: HashMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// Metadata format descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Native backend prefix followed by stylesheet paths
    pub pipeline: Vec<String>,
    /// Schema URL advertised in `ListMetadataFormats`
    pub schema: Option<String>,
    /// Namespace URI advertised in `ListMetadataFormats`
    pub namespace: Option<String>,
}

/// Continuation store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Journal file; tokens are kept in memory only when unset
    pub path: Option<PathBuf>,
}

/// Transform step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// XSLT processor executable
    pub processor: String,
    /// Deadline for one stylesheet run
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            processor: DEFAULT_PROCESSOR.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `OAI_PROXY_` prefix with `__` as
    /// nesting separator (`OAI_PROXY_BACKEND__URL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("OAI_PROXY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.config_dir = path
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Check required settings
    pub fn validate(&self) -> Result<()> {
        if self.backend.url.is_empty() {
            return Err(Error::Config("backend.url is required".to_string()));
        }
        url::Url::parse(&self.backend.url)
            .map_err(|e| Error::Config(format!("Invalid backend.url {}: {e}", self.backend.url)))?;
        if self.base_url.is_empty() {
            return Err(Error::Config("base_url is required".to_string()));
        }
        for (base, pattern) in &self.intersect_sets {
            Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid intersect_sets pattern for {base}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Processing instructions in injection order. `xslt` replaces the
    /// content of a configured `xml-stylesheet` in place, or is appended.
    #[must_use]
    pub fn processing_instructions(&self) -> Vec<(String, String)> {
        let mut instructions: Vec<(String, String)> = self
            .instructions
            .iter()
            .map(|pi| (pi.target.clone(), pi.content.clone()))
            .collect();
        if let Some(href) = &self.xslt {
            let content = format!("type=\"text/xsl\" href=\"{href}\"");
            match instructions
                .iter_mut()
                .find(|(target, _)| target == "xml-stylesheet")
            {
                Some((_, existing)) => *existing = content,
                None => instructions.push(("xml-stylesheet".to_string(), content)),
            }
        }
        instructions
    }

    /// Resolve a path from the configuration file against its directory
    #[must_use]
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match &self.config_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = match (path_str.strip_prefix('~'), dirs::home_dir()) {
                (Some(rest), Some(home)) => format!("{}{rest}", home.display()),
                _ => path_str.clone(),
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in URLs and backend headers
    fn expand_env_vars(&mut self) {
        self.backend.url = expand_string(&self.backend.url);
        self.base_url = expand_string(&self.base_url);
        for value in self.backend.headers.values_mut() {
            *value = expand_string(value);
        }
    }
}

fn expand_string(value: &str) -> String {
    PLACEHOLDER
        .replace_all(value, |caps: &regex::Captures| {
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(&caps[1]).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

/// Human-readable durations: `"500ms"`, `"30s"`, `"5m"`, `"1h"`, or bare seconds
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as whole seconds (`"30s"`) or milliseconds (`"500ms"`)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a duration string or integer seconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    /// Parse `"500ms"`, `"30s"`, `"5m"`, `"1h"` or `"30"`
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let number = |digits: &str| {
            digits
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration {text:?}: {e}"))
        };

        if let Some(ms) = text.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = text.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = text.strip_suffix('m') {
            number(mins).map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = text.strip_suffix('h') {
            number(hours).map(|h| Duration::from_secs(h * 3600))
        } else {
            number(text).map(Duration::from_secs)
        }
    }
}
