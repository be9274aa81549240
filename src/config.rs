//! Configuration for the incident bot.
//!
//! Model settings come from a YAML document whose path is chosen by the
//! deployment environment:
//!
//! ```yaml
//! OCI:
//!   COMPARTMENT_OCID: ocid1.compartment.oc1..example
//!   AI:
//!     INFERENCE_MODEL: cohere.command-r-plus
//!     SERVICE_ENDPOINT: https://inference.generativeai.us-chicago-1.oci.oraclecloud.com
//!     TEMPERATURE: 0.7
//!     MAX_TOKENS: 400
//! ```
//!
//! Front-end settings (which file to read, colors, history-aware prompting)
//! come from the command line via `arrrg`.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use arrrg_derive::CommandLine;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Environment variable naming the deployment environment.
pub const DEPLOYMENT_ENV_VAR: &str = "IB_DEPLOYMENT_ENV";

/// Deployment environment used when [`DEPLOYMENT_ENV_VAR`] is unset.
pub const DEFAULT_DEPLOYMENT_ENV: &str = "dev";

/// Environment variable holding a bearer token for the model endpoint.
pub const AUTH_TOKEN_VAR: &str = "IB_GENAI_AUTH_TOKEN";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default maximum tokens per response.
pub const DEFAULT_MAX_TOKENS: u32 = 400;

/////////////////////////////////////////// ModelConfig ////////////////////////////////////////////

/// Settings for the remote chat model, fixed for the life of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Identifier of the hosted inference model.
    pub inference_model_id: String,
    /// Base URL of the inference service.
    pub service_endpoint: String,
    /// Compartment the requests are billed against.
    pub compartment_id: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl ModelConfig {
    /// Creates a config with default generation parameters.
    pub fn new(
        inference_model_id: impl Into<String>,
        service_endpoint: impl Into<String>,
        compartment_id: impl Into<String>,
    ) -> Self {
        Self {
            inference_model_id: inference_model_id.into(),
            service_endpoint: service_endpoint.into(),
            compartment_id: compartment_id.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Parses the `OCI` section of a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(yaml)?;
        let oci = file.oci.ok_or_else(|| missing("OCI"))?;
        let ai = oci.ai.ok_or_else(|| missing("OCI.AI"))?;
        let config = Self {
            inference_model_id: ai
                .inference_model
                .ok_or_else(|| missing("OCI.AI.INFERENCE_MODEL"))?,
            service_endpoint: ai
                .service_endpoint
                .ok_or_else(|| missing("OCI.AI.SERVICE_ENDPOINT"))?,
            compartment_id: oci
                .compartment_ocid
                .ok_or_else(|| missing("OCI.COMPARTMENT_OCID"))?,
            temperature: ai.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: ai.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML configuration file.
    ///
    /// # Errors
    ///
    /// A missing, unreadable, or malformed file is a configuration error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|err| {
            let reason = if err.kind() == io::ErrorKind::NotFound {
                "configuration file not found".to_string()
            } else {
                format!("cannot read configuration file: {err}")
            };
            Error::configuration(
                format!("{reason}: {}", path.display()),
                Some(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&content).map_err(|err| match err {
            Error::Configuration { message, param } => Error::configuration(
                format!("{}: {message}", path.display()),
                param,
            ),
            other => other,
        })
    }

    /// Checks that every field holds a usable value.
    pub fn validate(&self) -> Result<()> {
        require_non_empty(&self.inference_model_id, "OCI.AI.INFERENCE_MODEL")?;
        require_non_empty(&self.service_endpoint, "OCI.AI.SERVICE_ENDPOINT")?;
        require_non_empty(&self.compartment_id, "OCI.COMPARTMENT_OCID")?;
        self.endpoint_url()?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::configuration(
                format!("temperature {} is outside [0, 2]", self.temperature),
                Some("OCI.AI.TEMPERATURE".to_string()),
            ));
        }
        if self.max_tokens == 0 {
            return Err(Error::configuration(
                "max tokens must be positive",
                Some("OCI.AI.MAX_TOKENS".to_string()),
            ));
        }
        Ok(())
    }

    /// Parses the service endpoint as an absolute http(s) URL.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(self.service_endpoint.trim())?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(Error::configuration(
                format!("service endpoint scheme {scheme:?} is not http or https"),
                Some("OCI.AI.SERVICE_ENDPOINT".to_string()),
            )),
        }
    }
}

fn missing(key: &str) -> Error {
    Error::configuration("required key is missing", Some(key.to_string()))
}

fn require_non_empty(value: &str, key: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::configuration("value is empty", Some(key.to_string())))
    } else {
        Ok(())
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "OCI", default)]
    oci: Option<OciSection>,
}

#[derive(Deserialize)]
struct OciSection {
    #[serde(rename = "COMPARTMENT_OCID", default)]
    compartment_ocid: Option<String>,
    #[serde(rename = "AI", default)]
    ai: Option<AiSection>,
}

#[derive(Deserialize)]
struct AiSection {
    #[serde(rename = "INFERENCE_MODEL", default)]
    inference_model: Option<String>,
    #[serde(rename = "SERVICE_ENDPOINT", default)]
    service_endpoint: Option<String>,
    #[serde(rename = "TEMPERATURE", default)]
    temperature: Option<f32>,
    #[serde(rename = "MAX_TOKENS", default)]
    max_tokens: Option<u32>,
}

/////////////////////////////////////////// ConfigSource ///////////////////////////////////////////

/// Where the model configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    path: PathBuf,
}

impl ConfigSource {
    /// Selects `config/app_config.<env>.yml` using [`DEPLOYMENT_ENV_VAR`].
    pub fn from_env() -> Self {
        let deployment_env = env::var(DEPLOYMENT_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEPLOYMENT_ENV.to_string());
        Self::for_deployment(&deployment_env)
    }

    /// Selects `config/app_config.<env>.yml` for an explicit environment.
    pub fn for_deployment(deployment_env: &str) -> Self {
        Self {
            path: Path::new("config").join(format!("app_config.{deployment_env}.yml")),
        }
    }

    /// Reads an explicit file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolves a relative path against `base`.
    pub fn with_base_dir(self, base: impl AsRef<Path>) -> Self {
        if self.path.is_absolute() {
            self
        } else {
            Self {
                path: base.as_ref().join(self.path),
            }
        }
    }

    /// The path that will be read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and validates the model configuration.
    pub fn load(&self) -> Result<ModelConfig> {
        ModelConfig::from_file(&self.path)
    }
}

/// Returns the bearer token for the model endpoint, if one is configured.
pub fn auth_token_from_env() -> Option<String> {
    env::var(AUTH_TOKEN_VAR)
        .ok()
        .filter(|token| !token.trim().is_empty())
}

///////////////////////////////////////////// ChatArgs /////////////////////////////////////////////

/// Command-line arguments for the incibot tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Explicit configuration file.
    #[arrrg(optional, "Configuration file (default: config/app_config.<env>.yml)", "PATH")]
    pub config: Option<String>,

    /// Deployment environment.
    #[arrrg(optional, "Deployment environment (default: $IB_DEPLOYMENT_ENV or dev)", "ENV")]
    pub env: Option<String>,

    /// Send prior turns to the model along with the question.
    #[arrrg(flag, "Include conversation history in each request")]
    pub with_history: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved front-end settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Where to read model settings from.
    pub source: ConfigSource,
    /// Whether prior turns are sent with each question.
    pub with_history: bool,
    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let source = match (args.config, args.env) {
            (Some(path), _) => ConfigSource::file(path),
            (None, Some(deployment_env)) => ConfigSource::for_deployment(&deployment_env),
            (None, None) => ConfigSource::from_env(),
        };
        ChatConfig {
            source,
            with_history: args.with_history,
            use_color: !args.no_color,
        }
    }
}
