//! `amlq.toml` loading.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [compile]
//! permission_mode = "legacy_predicate"
//! identity_list = "A1B2,C3D4"
//! user_id = "A1B2"
//! output_mode = "full"
//!
//! [metadata.Part.cost]
//! data_type = "decimal"
//!
//! [metadata.Part.item_number]
//! data_type = "text"
//! order_by = 1
//! ```

use aml_query::{CompileSettings, StaticMetadata};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "AMLQ_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "amlq.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when no flag is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmlqConfig {
    pub logging: LoggingConfig,
    pub compile: CompileSettings,
    /// Declared property types and default order, per item type
    pub metadata: StaticMetadata,
}

impl AmlqConfig {
    /// Load from `config_file`, `$AMLQ_CONFIG` or `./amlq.toml`, in that
    /// order; defaults when none of them exists.
    ///
    /// An explicitly named file must exist.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_file {
            return Self::from_file(&path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) {
            return Self::from_file(&path);
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            Self::from_file(&local)
        } else {
            debug!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Display the configuration as TOML
    pub fn display_as_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config as TOML")
    }

    /// Display the configuration as JSON
    pub fn display_as_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config as JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aml_query::{MetadataProvider, OutputMode, PermissionMode, PropertyType};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[logging]
level = "trace"

[compile]
permission_mode = "legacy_predicate"
identity_list = "A1,B2"
user_id = "A1"
output_mode = "count_query"

[metadata.Part.cost]
data_type = "decimal"

[metadata.Part.item_number]
data_type = "text"
order_by = 1
descending = true
"#;

    #[test]
    fn test_parse_sample() {
        let config = AmlqConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.logging.level.as_deref(), Some("trace"));
        assert_eq!(config.compile.permission_mode, PermissionMode::LegacyPredicate);
        assert_eq!(config.compile.identity_list, "A1,B2");
        assert_eq!(config.compile.output_mode, OutputMode::CountQuery);

        let part = config.metadata.get_properties("Part");
        assert_eq!(part["cost"].data_type, PropertyType::Decimal);
        assert_eq!(part["item_number"].order_by, Some(1));
        assert!(part["item_number"].descending);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(AmlqConfig::from_toml("").unwrap(), AmlqConfig::default());
    }

    #[test]
    fn test_bad_output_mode_is_rejected() {
        let err = AmlqConfig::from_toml("[compile]\noutput_mode = \"sideways\"\n").unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }

    #[test]
    fn test_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AmlqConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.compile.user_id, "A1");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = AmlqConfig::load(Some(PathBuf::from("/nonexistent/amlq.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AmlqConfig::from_toml(SAMPLE).unwrap();
        let rendered = config.display_as_toml().unwrap();
        assert_eq!(AmlqConfig::from_toml(&rendered).unwrap(), config);
    }
}
