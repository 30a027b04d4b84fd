use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::uniprot::MAX_SEARCH_SIZE;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ga.json";
pub const DEFAULT_BASE_URL: &str = "https://rest.uniprot.org";
/// Return field that yields the `Entry` column every annotation row is keyed by.
pub const ACCESSION_FIELD: &str = "accession";

/// On-disk shape of `kira-ga.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub from_db: Option<String>,
    #[serde(default)]
    pub to_db: Option<String>,
    #[serde(default)]
    pub taxon_id: Option<String>,
    #[serde(default)]
    pub mapping_batch_size: Option<usize>,
    #[serde(default)]
    pub annotation_batch_size: Option<usize>,
    #[serde(default)]
    pub poll_interval_secs: Option<f64>,
    #[serde(default)]
    pub poll_timeout_secs: Option<f64>,
    #[serde(default)]
    pub pacing_delay_secs: Option<f64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub annotation_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub annotation_fields: Option<Vec<String>>,
}

/// Resolved runtime settings handed explicitly to the HTTP client and both pipeline steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_url: String,
    pub from_db: String,
    pub to_db: String,
    pub taxon_id: Option<String>,
    pub mapping_batch_size: usize,
    pub annotation_batch_size: usize,
    pub poll_interval: Duration,
    /// `None` polls until the job reaches a terminal status.
    pub poll_timeout: Option<Duration>,
    pub pacing_delay: Duration,
    pub request_timeout: Duration,
    pub annotation_timeout: Duration,
    pub max_retries: usize,
    pub annotation_fields: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            from_db: "Gene_Name".to_string(),
            to_db: "UniProtKB".to_string(),
            taxon_id: None,
            mapping_batch_size: 100,
            annotation_batch_size: 50,
            poll_interval: Duration::from_secs(2),
            poll_timeout: None,
            pacing_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            annotation_timeout: Duration::from_secs(120),
            max_retries: 3,
            annotation_fields: default_annotation_fields(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the given file, or `kira-ga.json` when present, or falls back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<Settings, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<Settings, KiraError> {
        let defaults = Settings::default();

        let mapping_batch_size = positive(
            "mapping_batch_size",
            config.mapping_batch_size.unwrap_or(defaults.mapping_batch_size),
        )?;
        let annotation_batch_size = positive(
            "annotation_batch_size",
            config
                .annotation_batch_size
                .unwrap_or(defaults.annotation_batch_size),
        )?;
        if annotation_batch_size > MAX_SEARCH_SIZE {
            return Err(KiraError::InvalidConfig(format!(
                "annotation_batch_size must be at most {MAX_SEARCH_SIZE}"
            )));
        }

        let annotation_fields = match config.annotation_fields {
            Some(fields) => {
                let fields = fields
                    .into_iter()
                    .map(|field| field.trim().to_string())
                    .filter(|field| !field.is_empty())
                    .collect::<Vec<_>>();
                if fields.is_empty() {
                    return Err(KiraError::InvalidConfig(
                        "annotation_fields must not be empty".to_string(),
                    ));
                }
                if !fields.iter().any(|field| field == ACCESSION_FIELD) {
                    return Err(KiraError::InvalidConfig(format!(
                        "annotation_fields must include {ACCESSION_FIELD}"
                    )));
                }
                fields
            }
            None => defaults.annotation_fields,
        };

        let poll_timeout = config
            .poll_timeout_secs
            .map(|secs| seconds("poll_timeout_secs", secs))
            .transpose()?;

        let poll_interval = config
            .poll_interval_secs
            .map(|secs| seconds("poll_interval_secs", secs))
            .transpose()?
            .unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(KiraError::InvalidConfig(
                "poll_interval_secs must be positive".to_string(),
            ));
        }

        Ok(Settings {
            base_url: config
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            from_db: config.from_db.unwrap_or(defaults.from_db),
            to_db: config.to_db.unwrap_or(defaults.to_db),
            taxon_id: config.taxon_id.filter(|taxon| !taxon.trim().is_empty()),
            mapping_batch_size,
            annotation_batch_size,
            poll_interval,
            poll_timeout,
            pacing_delay: config
                .pacing_delay_secs
                .map(|secs| seconds("pacing_delay_secs", secs))
                .transpose()?
                .unwrap_or(defaults.pacing_delay),
            request_timeout: config
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            annotation_timeout: config
                .annotation_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.annotation_timeout),
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            annotation_fields,
        })
    }
}

pub fn default_annotation_fields() -> Vec<String> {
    vec![
        ACCESSION_FIELD.to_string(),
        "go_id".to_string(),
        "xref_pfam".to_string(),
        "keywords".to_string(),
    ]
}

fn positive(name: &str, value: usize) -> Result<usize, KiraError> {
    if value == 0 {
        return Err(KiraError::InvalidConfig(format!("{name} must be positive")));
    }
    Ok(value)
}

fn seconds(name: &str, value: f64) -> Result<Duration, KiraError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| KiraError::InvalidConfig(format!("{name} must be a non-negative number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let settings = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert!(settings.poll_timeout.is_none());
    }

    #[test]
    fn negative_interval_is_rejected() {
        let config = Config {
            poll_interval_secs: Some(-1.0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
