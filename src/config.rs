use crate::error::FolioError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings for the processor, the page and the error handlers.
///
/// Loaded from an optional TOML file, then overlaid with `FOLIO__*`
/// environment variables (`FOLIO__XML__ALLOW_DTD=false`). Every field has
/// a default, so an empty configuration is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub processor: ProcessorConfig,
    pub xml: XmlConfig,
    pub transform: TransformConfig,
    pub handlers: HandlersConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Implementation {
    #[default]
    Native,
    Unavailable,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub implementation: Implementation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XmlConfig {
    pub allow_dtd: bool,
    pub nodes_limit: u32,
}

impl Default for XmlConfig {
    fn default() -> Self {
        XmlConfig {
            allow_dtd: true,
            nodes_limit: 4_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub max_depth: usize,
    pub stack_size: usize,
    /// Root directory for `xsl:import` and `xsl:include`.
    pub base_dir: Option<PathBuf>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            max_depth: 3000,
            stack_size: 64 * 1024 * 1024,
            base_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HandlersConfig {
    /// Include the JSON record dump in error pages.
    pub debug: bool,
}

impl Config {
    /// Loads `path` if given, otherwise `folio.toml` in the working
    /// directory when present, then applies the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, FolioError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("folio").required(false),
        };
        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("FOLIO").separator("__"))
            .build()?
            .try_deserialize()?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Parses TOML text, without the environment overlay.
    pub fn from_toml(source: &str) -> Result<Self, FolioError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_configuration_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.processor.implementation, Implementation::Native);
        assert!(config.xml.allow_dtd);
        assert_eq!(config.xml.nodes_limit, 4_000_000);
        assert_eq!(config.transform.max_depth, 3000);
        assert!(config.transform.base_dir.is_none());
        assert!(!config.handlers.debug);
    }

    #[test]
    fn sections_override_single_fields() {
        let config = Config::from_toml(
            r#"
[processor]
implementation = "unavailable"

[transform]
max_depth = 50
base_dir = "templates"

[handlers]
debug = true
"#,
        )
        .unwrap();
        assert_eq!(config.processor.implementation, Implementation::Unavailable);
        assert_eq!(config.transform.max_depth, 50);
        assert_eq!(config.transform.stack_size, 64 * 1024 * 1024);
        assert_eq!(config.transform.base_dir, Some(PathBuf::from("templates")));
        assert!(config.handlers.debug);
    }

    #[test]
    fn unknown_implementation_is_an_error() {
        assert!(Config::from_toml("[processor]\nimplementation = \"remote\"").is_err());
    }
}
