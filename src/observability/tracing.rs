//! Tracing subscriber setup and header masking.
//!
//! ```rust,ignore
//! use tablebridge::observability::{TracingConfig, OutputFormat, init_tracing};
//!
//! init_tracing(&TracingConfig::builder()
//!     .level(tracing::Level::DEBUG)
//!     .output_format(OutputFormat::Json)
//!     .build())?;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::TableError;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: tracing::Level,
    pub output_format: OutputFormat,
    /// Include the event target (`tablebridge::http`, `tablebridge::executor`, ..).
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            with_target: true,
        }
    }
}

impl TracingConfig {
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    pub fn debug() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct TracingConfigBuilder {
    level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    with_target: Option<bool>,
}

impl TracingConfigBuilder {
    pub fn level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Set the level from its name (`trace` .. `error`).
    pub fn level_str(mut self, level: &str) -> Result<Self, TableError> {
        let level = level.parse::<tracing::Level>().map_err(|_| {
            TableError::Configuration(format!(
                "invalid log level '{level}', expected one of trace, debug, info, warn, error"
            ))
        })?;
        self.level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = Some(with_target);
        self
    }

    pub fn build(self) -> TracingConfig {
        let defaults = TracingConfig::default();
        TracingConfig {
            level: self.level.unwrap_or(defaults.level),
            output_format: self.output_format.unwrap_or(defaults.output_format),
            with_target: self.with_target.unwrap_or(defaults.with_target),
        }
    }
}

/// Install a global `fmt` subscriber filtered to this crate.
///
/// `RUST_LOG` overrides the configured level. Calling it again once a
/// subscriber is installed is a no-op.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TableError> {
    let level = config.level.to_string().to_lowercase();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("tablebridge={level}")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);
    let result = match config.output_format {
        OutputFormat::Text => builder.try_init(),
        OutputFormat::Json => builder.json().try_init(),
        OutputFormat::JsonCompact => builder.json().flatten_event(true).try_init(),
    };
    if let Err(err) = result {
        // Another subscriber is already installed.
        tracing::debug!(target: "tablebridge::observability", err=%err, "tracing already initialised");
    }
    Ok(())
}

static MASK_SENSITIVE_VALUES: AtomicBool = AtomicBool::new(true);

pub fn set_mask_sensitive_values(mask: bool) {
    MASK_SENSITIVE_VALUES.store(mask, Ordering::Relaxed);
}

pub fn mask_sensitive_values() -> bool {
    MASK_SENSITIVE_VALUES.load(Ordering::Relaxed)
}

/// Shorten a secret so it is recognisable but not usable.
///
/// `SharedKey acct:signature` keeps the scheme and account.
pub fn mask_sensitive_value(value: &str) -> String {
    if !mask_sensitive_values() {
        return value.to_string();
    }
    if let Some((scheme, rest)) = value.split_once(' ')
        && let Some((account, _signature)) = rest.split_once(':')
    {
        return format!("{scheme} {account}:***");
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 16 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "***".to_string()
    }
}

fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("authorization") || name.contains("key") || name.contains("token")
}

/// Render headers as a JSON object with credentials masked.
pub fn format_headers_for_logging(headers: &reqwest::header::HeaderMap) -> String {
    let map: BTreeMap<&str, String> = headers
        .iter()
        .map(|(k, v)| {
            let value = v.to_str().unwrap_or("<invalid>");
            let shown = if is_sensitive_header(k.as_str()) {
                mask_sensitive_value(value)
            } else {
                value.to_string()
            };
            (k.as_str(), shown)
        })
        .collect();
    serde_json::to_string(&map).unwrap_or_else(|_| format!("{map:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

    #[test]
    fn authorization_is_masked() {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("SharedKey acct:c2lnbmF0dXJlc2lnbmF0dXJl"),
        );
        headers.insert("x-ms-version", HeaderValue::from_static("2017-04-17"));
        let text = format_headers_for_logging(&headers);
        assert!(text.contains("SharedKey acct:***"));
        assert!(!text.contains("c2lnbmF0dXJl"));
        assert!(text.contains("2017-04-17"));
    }

    #[test]
    fn short_secrets_are_hidden_entirely() {
        assert_eq!(mask_sensitive_value("abc"), "***");
        assert_eq!(mask_sensitive_value("0123456789abcdefXYZ"), "0123...fXYZ");
    }

    #[test]
    fn builder_parses_levels() {
        let config = TracingConfig::builder().level_str("debug").unwrap().build();
        assert_eq!(config.level, tracing::Level::DEBUG);
        assert!(TracingConfig::builder().level_str("loud").is_err());
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }
}
