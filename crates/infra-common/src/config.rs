//! Configuration file loading.
//!
//! Config structs in the stack are plain serde types with `Default`; this
//! module only turns a file into one of them.

use crate::errors::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick a format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            other => Err(Error::Config(format!(
                "Unsupported config file extension: {:?}",
                other
            ))),
        }
    }
}

/// Load a configuration struct from a TOML or JSON file
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path)?;
    tracing::debug!("Loading {:?} configuration from {}", format, path.display());
    load_config_str(&contents, format)
}

/// Parse a configuration struct from a string
pub fn load_config_str<T: DeserializeOwned>(contents: &str, format: ConfigFormat) -> Result<T> {
    match format {
        ConfigFormat::Toml => Ok(toml::from_str(contents)?),
        ConfigFormat::Json => Ok(serde_json::from_str(contents)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        port: u16,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self { name: "none".into(), port: 4000 }
        }
    }

    #[test]
    fn test_toml_with_defaults() {
        let sample: Sample = load_config_str("name = \"alice\"", ConfigFormat::Toml).unwrap();
        assert_eq!(sample, Sample { name: "alice".into(), port: 4000 });
    }

    #[test]
    fn test_json() {
        let sample: Sample = load_config_str(r#"{"port": 5004}"#, ConfigFormat::Json).unwrap();
        assert_eq!(sample.port, 5004);
        assert_eq!(sample.name, "none");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("ua.TOML")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("ua.yaml")).is_err());
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let res: Result<Sample> = load_config_str("port = \"x\"", ConfigFormat::Toml);
        assert!(matches!(res, Err(Error::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let res: Result<Sample> = load_config("/nonexistent/sippin.toml");
        assert!(matches!(res, Err(Error::Io(_))));
    }
}
