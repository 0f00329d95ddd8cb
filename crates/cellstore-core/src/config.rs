use crate::error::{CellstoreError, Result};
use crate::models::CoverOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Configuration source for tracking where values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    Default,
    /// Loaded from config file
    File,
    /// Loaded from environment variable
    Environment,
    /// Provided via CLI argument
    Cli,
}

impl ConfigSource {
    /// Returns the precedence level (higher = higher priority)
    pub fn precedence(&self) -> u8 {
        match self {
            ConfigSource::Default => 0,
            ConfigSource::File => 1,
            ConfigSource::Environment => 2,
            ConfigSource::Cli => 3,
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    /// Update the value if the new source has higher precedence
    pub fn update(&mut self, value: T, source: ConfigSource) {
        if source.precedence() > self.source.precedence() {
            self.value = value;
            self.source = source;
        }
    }
}

/// Fully resolved settings consumed by the feature store
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Encoded payloads at or below this size are stored inline
    pub inline_threshold_bytes: usize,
    /// Features whose bbox diagonal exceeds this are indexed coarse
    pub coarse_threshold_meters: f64,
    /// In-flight row writes per mutating operation
    pub write_concurrency: usize,
    /// In-flight range reads and resolutions per query
    pub read_concurrency: usize,
    /// Attempts for bulk writes before surfacing a throttling error
    pub write_retry_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Property naming a feature's secondary identifier
    pub secondary_id_property: String,
    /// Prefix for blob keys
    pub blob_prefix: String,
    /// Copy inline geometries into cell rows
    pub denormalize_cells: bool,
    pub cover: CoverOptions,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: 10 * 1024,
            coarse_threshold_meters: 10_000.0,
            write_concurrency: 4,
            read_concurrency: 100,
            write_retry_attempts: 5,
            retry_base_delay_ms: 20,
            secondary_id_property: "id".to_string(),
            blob_prefix: "features".to_string(),
            denormalize_cells: true,
            cover: CoverOptions::default(),
        }
    }
}

impl StoreSettings {
    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.blob_prefix.trim().is_empty() {
            return Err(CellstoreError::validation("blob_prefix", "must not be empty"));
        }
        if self.secondary_id_property.trim().is_empty() {
            return Err(CellstoreError::validation("secondary_id_property", "must not be empty"));
        }
        if self.write_concurrency == 0 || self.read_concurrency == 0 {
            return Err(CellstoreError::validation("concurrency", "caps must be at least 1"));
        }
        if !(self.coarse_threshold_meters.is_finite() && self.coarse_threshold_meters > 0.0) {
            return Err(CellstoreError::validation(
                "coarse_threshold_meters",
                "must be a positive distance",
            ));
        }
        for params in [&self.cover.coarse, &self.cover.fine] {
            for level in [params.index, params.query] {
                if level.min_level == 0 || level.min_level > level.max_level || level.max_level > 30 {
                    return Err(CellstoreError::validation(
                        "cover",
                        format!(
                            "levels must satisfy 1 <= min ({}) <= max ({}) <= 30",
                            level.min_level, level.max_level
                        ),
                    ));
                }
                if level.max_cells == 0 {
                    return Err(CellstoreError::validation("cover", "max_cells must be at least 1"));
                }
            }
        }
        Ok(())
    }
}

/// Layered configuration for cellstore
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    pub inline_threshold_bytes: ConfigValue<usize>,
    pub coarse_threshold_meters: ConfigValue<f64>,
    pub write_concurrency: ConfigValue<usize>,
    pub read_concurrency: ConfigValue<usize>,
    pub write_retry_attempts: ConfigValue<usize>,
    pub retry_base_delay_ms: ConfigValue<u64>,
    pub secondary_id_property: ConfigValue<String>,
    pub blob_prefix: ConfigValue<String>,
    pub denormalize_cells: ConfigValue<bool>,
    pub cover: ConfigValue<CoverOptions>,
}

impl LayeredConfig {
    /// Create a new configuration with default values
    pub fn with_defaults() -> Self {
        let d = StoreSettings::default();
        Self {
            inline_threshold_bytes: ConfigValue::new(d.inline_threshold_bytes, ConfigSource::Default),
            coarse_threshold_meters: ConfigValue::new(
                d.coarse_threshold_meters,
                ConfigSource::Default,
            ),
            write_concurrency: ConfigValue::new(d.write_concurrency, ConfigSource::Default),
            read_concurrency: ConfigValue::new(d.read_concurrency, ConfigSource::Default),
            write_retry_attempts: ConfigValue::new(d.write_retry_attempts, ConfigSource::Default),
            retry_base_delay_ms: ConfigValue::new(d.retry_base_delay_ms, ConfigSource::Default),
            secondary_id_property: ConfigValue::new(d.secondary_id_property, ConfigSource::Default),
            blob_prefix: ConfigValue::new(d.blob_prefix, ConfigSource::Default),
            denormalize_cells: ConfigValue::new(d.denormalize_cells, ConfigSource::Default),
            cover: ConfigValue::new(d.cover, ConfigSource::Default),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| CellstoreError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to read config file: {}", e),
            })?;

        let file_config: FileConfig =
            toml::from_str(&content).map_err(|e| CellstoreError::ConfigInvalid {
                key: "file".to_string(),
                reason: format!("Failed to parse TOML: {}", e),
            })?;

        if let Some(v) = file_config.inline_threshold_bytes {
            self.inline_threshold_bytes.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.coarse_threshold_meters {
            self.coarse_threshold_meters.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.write_concurrency {
            self.write_concurrency.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.read_concurrency {
            self.read_concurrency.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.write_retry_attempts {
            self.write_retry_attempts.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.retry_base_delay_ms {
            self.retry_base_delay_ms.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.secondary_id_property {
            self.secondary_id_property.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.blob_prefix {
            self.blob_prefix.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.denormalize_cells {
            self.denormalize_cells.update(v, ConfigSource::File);
        }
        if let Some(v) = file_config.cover {
            self.cover.update(v, ConfigSource::File);
        }

        Ok(self)
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        env_override(&mut self.inline_threshold_bytes, "CELLSTORE_INLINE_THRESHOLD");
        env_override(&mut self.coarse_threshold_meters, "CELLSTORE_COARSE_THRESHOLD_METERS");
        env_override(&mut self.write_concurrency, "CELLSTORE_WRITE_CONCURRENCY");
        env_override(&mut self.read_concurrency, "CELLSTORE_READ_CONCURRENCY");
        env_override(&mut self.write_retry_attempts, "CELLSTORE_WRITE_RETRY_ATTEMPTS");
        env_override(&mut self.retry_base_delay_ms, "CELLSTORE_RETRY_BASE_DELAY_MS");
        env_override(&mut self.denormalize_cells, "CELLSTORE_DENORMALIZE_CELLS");

        if let Ok(property) = env::var("CELLSTORE_SECONDARY_ID_PROPERTY") {
            self.secondary_id_property.update(property, ConfigSource::Environment);
        }

        if let Ok(prefix) = env::var("CELLSTORE_BLOB_PREFIX") {
            self.blob_prefix.update(prefix, ConfigSource::Environment);
        }

        self
    }

    /// Update configuration from CLI arguments
    pub fn update_from_cli(&mut self, overrides: CliConfigOverrides) {
        if let Some(v) = overrides.inline_threshold_bytes {
            self.inline_threshold_bytes.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.read_concurrency {
            self.read_concurrency.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.write_concurrency {
            self.write_concurrency.update(v, ConfigSource::Cli);
        }
        if let Some(v) = overrides.blob_prefix {
            self.blob_prefix.update(v, ConfigSource::Cli);
        }
    }

    /// Collapse the layers into validated settings
    pub fn resolve(&self) -> Result<StoreSettings> {
        let settings = StoreSettings {
            inline_threshold_bytes: self.inline_threshold_bytes.value,
            coarse_threshold_meters: self.coarse_threshold_meters.value,
            write_concurrency: self.write_concurrency.value,
            read_concurrency: self.read_concurrency.value,
            write_retry_attempts: self.write_retry_attempts.value.max(1),
            retry_base_delay_ms: self.retry_base_delay_ms.value,
            secondary_id_property: self.secondary_id_property.value.clone(),
            blob_prefix: self.blob_prefix.value.clone(),
            denormalize_cells: self.denormalize_cells.value,
            cover: self.cover.value,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Get all configuration values as a map for inspection
    pub fn to_inspection_map(&self) -> HashMap<String, (String, ConfigSource)> {
        let mut map = HashMap::new();

        map.insert(
            "inline_threshold_bytes".to_string(),
            (self.inline_threshold_bytes.value.to_string(), self.inline_threshold_bytes.source),
        );
        map.insert(
            "coarse_threshold_meters".to_string(),
            (self.coarse_threshold_meters.value.to_string(), self.coarse_threshold_meters.source),
        );
        map.insert(
            "write_concurrency".to_string(),
            (self.write_concurrency.value.to_string(), self.write_concurrency.source),
        );
        map.insert(
            "read_concurrency".to_string(),
            (self.read_concurrency.value.to_string(), self.read_concurrency.source),
        );
        map.insert(
            "write_retry_attempts".to_string(),
            (self.write_retry_attempts.value.to_string(), self.write_retry_attempts.source),
        );
        map.insert(
            "secondary_id_property".to_string(),
            (self.secondary_id_property.value.clone(), self.secondary_id_property.source),
        );
        map.insert(
            "blob_prefix".to_string(),
            (self.blob_prefix.value.clone(), self.blob_prefix.source),
        );
        map.insert(
            "denormalize_cells".to_string(),
            (self.denormalize_cells.value.to_string(), self.denormalize_cells.source),
        );

        map
    }
}

/// Apply a parsed environment variable, warning on unparsable values
fn env_override<T: FromStr>(value: &mut ConfigValue<T>, var: &str) {
    if let Ok(raw) = env::var(var) {
        match raw.parse::<T>() {
            Ok(parsed) => value.update(parsed, ConfigSource::Environment),
            Err(_) => tracing::warn!("Invalid {} value '{}': ignoring", var, raw),
        }
    }
}

/// Configuration loaded from TOML file
#[derive(Debug, Deserialize, Serialize)]
struct FileConfig {
    inline_threshold_bytes: Option<usize>,
    coarse_threshold_meters: Option<f64>,
    write_concurrency: Option<usize>,
    read_concurrency: Option<usize>,
    write_retry_attempts: Option<usize>,
    retry_base_delay_ms: Option<u64>,
    secondary_id_property: Option<String>,
    blob_prefix: Option<String>,
    denormalize_cells: Option<bool>,
    cover: Option<CoverOptions>,
}

/// CLI configuration overrides
#[derive(Debug, Default)]
pub struct CliConfigOverrides {
    pub inline_threshold_bytes: Option<usize>,
    pub read_concurrency: Option<usize>,
    pub write_concurrency: Option<usize>,
    pub blob_prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LevelParams;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LayeredConfig::with_defaults();
        assert_eq!(config.inline_threshold_bytes.value, 10 * 1024);
        assert_eq!(config.inline_threshold_bytes.source, ConfigSource::Default);
        assert_eq!(config.read_concurrency.value, 100);
        assert_eq!(config.secondary_id_property.value, "id");
        assert_eq!(config.resolve().unwrap(), StoreSettings::default());
    }

    #[test]
    fn test_config_precedence() {
        let mut value = ConfigValue::new(100, ConfigSource::Default);

        // File should override default
        value.update(200, ConfigSource::File);
        assert_eq!(value.value, 200);
        assert_eq!(value.source, ConfigSource::File);

        // Environment should override file
        value.update(300, ConfigSource::Environment);
        assert_eq!(value.value, 300);

        // CLI should override environment
        value.update(400, ConfigSource::Cli);
        assert_eq!(value.value, 400);

        // Lower precedence should not override
        value.update(500, ConfigSource::File);
        assert_eq!(value.value, 400);
        assert_eq!(value.source, ConfigSource::Cli);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
inline_threshold_bytes = 2048
blob_prefix = "geo"
denormalize_cells = false

[cover.coarse]
index = {{ min_level = 3, max_level = 9, max_cells = 6 }}
query = {{ min_level = 1, max_level = 9, max_cells = 12 }}

[cover.fine]
index = {{ min_level = 9, max_level = 16, max_cells = 6 }}
query = {{ min_level = 1, max_level = 16, max_cells = 24 }}
"#
        )
        .unwrap();

        let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

        assert_eq!(config.inline_threshold_bytes.value, 2048);
        assert_eq!(config.inline_threshold_bytes.source, ConfigSource::File);
        assert_eq!(config.blob_prefix.value, "geo");
        assert!(!config.denormalize_cells.value);
        assert_eq!(config.cover.value.fine.index, LevelParams::new(9, 16, 6));
        // Untouched keys keep defaults
        assert_eq!(config.read_concurrency.source, ConfigSource::Default);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "inline_threshold_bytes = \"lots\"").unwrap();

        let result = LayeredConfig::with_defaults().load_from_file(file.path());
        assert!(matches!(result, Err(CellstoreError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = LayeredConfig::with_defaults();

        config.update_from_cli(CliConfigOverrides {
            read_concurrency: Some(8),
            blob_prefix: Some("cli".to_string()),
            ..Default::default()
        });

        assert_eq!(config.read_concurrency.value, 8);
        assert_eq!(config.read_concurrency.source, ConfigSource::Cli);
        assert_eq!(config.blob_prefix.value, "cli");
        assert_eq!(config.write_concurrency.source, ConfigSource::Default);
    }

    #[test]
    fn test_resolve_rejects_missing_blob_prefix() {
        let mut config = LayeredConfig::with_defaults();
        config.update_from_cli(CliConfigOverrides {
            blob_prefix: Some("  ".to_string()),
            ..Default::default()
        });
        assert!(matches!(config.resolve(), Err(CellstoreError::Validation { .. })));
    }

    #[test]
    fn test_resolve_rejects_zero_concurrency() {
        let mut config = LayeredConfig::with_defaults();
        config.update_from_cli(CliConfigOverrides {
            write_concurrency: Some(0),
            ..Default::default()
        });
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_inspection_map() {
        let config = LayeredConfig::with_defaults();
        let map = config.to_inspection_map();

        let (prefix, source) = &map["blob_prefix"];
        assert_eq!(prefix, "features");
        assert_eq!(*source, ConfigSource::Default);
        assert!(map.contains_key("inline_threshold_bytes"));
    }
}
