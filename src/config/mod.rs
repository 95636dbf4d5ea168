//! Configuration for the authorization engine.
//!
//! Configuration is a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [authorization.driver]
//! type = "external"
//! endpoint = "https://pdp.internal:8443"
//! api_token = "${PDP_TOKEN}"
//!
//! [projects.demo.features]
//! networks = true
//! profiles = false
//! ```

mod authorization;
mod observability;
mod projects;

use std::{collections::HashMap, path::Path};

pub use authorization::*;
use once_cell::sync::Lazy;
pub use observability::*;
pub use projects::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Root configuration.
///
/// All sections are optional; an empty file configures the open driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Driver selection and decision auditing.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Per-project feature flags, keyed by project name.
    /// Projects not listed here use the defaults of a new project.
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Catch feature-gated driver types before serde turns them into
        // an "unknown variant" error.
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: Config = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.projects.keys().any(String::is_empty) {
            return Err(ConfigError::Validation(
                "Project names cannot be empty".into(),
            ));
        }
        self.authorization.validate()
    }

    /// Feature flags for `project`.
    ///
    /// The default project owns every collection by definition.
    pub fn project_features(&self, project: &str) -> ProjectFeatures {
        if project == crate::entity::DEFAULT_PROJECT {
            return ProjectFeatures::all_enabled();
        }
        self.projects
            .get(project)
            .map(|p| p.features)
            .unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let driver_type = raw
        .get("authorization")
        .and_then(|v| v.get("driver"))
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str());

    match driver_type {
        #[cfg(not(feature = "external-driver"))]
        Some("external") => Err(ConfigError::Validation(
            "authorization.driver.type 'external' requires the 'external-driver' feature.\n\
             Rebuild with: cargo build --features external-driver"
                .into(),
        )),
        _ => Ok(()),
    }
}

/// Byte offset of the `#` that starts a comment on `line`, if any.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' => return Some(i),
            None => {}
        }
    }
    None
}

static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables inside a comment are left alone. A `#` inside a single-line
/// string does not start a comment; multi-line strings are not tracked.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = comment_start(line);
        let mut last_end = 0;

        for cap in ENV_VAR_RE.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
