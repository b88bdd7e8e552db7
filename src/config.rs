use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::aggregate::AnnotationLimit;
use crate::domain::StudyFormat;
use crate::error::MmitError;

pub const DEFAULT_DATABASE: &str = "HMDB-v4";
pub const DEFAULT_FDR: f64 = 0.1;
pub const DEFAULT_STORE_ENDPOINT: &str = "https://s3.eu-west-1.amazonaws.com";
pub const DEFAULT_SERVICE_URL: &str = "https://metaspace2020.eu";
pub const CONFIG_FILE_NAME: &str = "mmit.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: Option<StoreSection>,
    #[serde(default)]
    pub service: Option<ServiceSection>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub fdr: Option<f64>,
    #[serde(default)]
    pub annotation_limit: Option<usize>,
    #[serde(default)]
    pub study_format: Option<StudyFormat>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServiceSection {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub store_endpoint: String,
    pub bucket: Option<String>,
    pub credentials: Option<StoreCredentials>,
    pub service_url: String,
    pub database: String,
    pub fdr: f64,
    pub annotation_limit: AnnotationLimit,
    pub study_format: StudyFormat,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MmitError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(ResolvedConfig::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MmitError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MmitError::ConfigParse(err.to_string()))?;

        if let Some(fdr) = config.fdr {
            if !(0.0..=1.0).contains(&fdr) {
                return Err(MmitError::ConfigParse(format!(
                    "fdr must be within [0, 1], got {fdr}"
                )));
            }
        }

        Ok(Self::resolve_config(config))
    }

    /// `mmit.json` in the working directory, then in the user config directory.
    pub fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("eu", "metaspace", "mmit")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let store = config.store.unwrap_or_default();
        let credentials = match (store.access_key_id, store.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StoreCredentials {
                access_key_id,
                secret_access_key,
            }),
            _ => None,
        };

        ResolvedConfig {
            store_endpoint: store
                .endpoint
                .unwrap_or_else(|| DEFAULT_STORE_ENDPOINT.to_string()),
            bucket: store.bucket,
            credentials,
            service_url: config
                .service
                .and_then(|service| service.url)
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            database: config
                .database
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            fdr: config.fdr.unwrap_or(DEFAULT_FDR),
            annotation_limit: config
                .annotation_limit
                .map_or(AnnotationLimit::All, AnnotationLimit::First),
            study_format: config.study_format.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let resolved = ConfigLoader::resolve_config(Config::default());
        assert_eq!(resolved.database, DEFAULT_DATABASE);
        assert_eq!(resolved.fdr, DEFAULT_FDR);
        assert_eq!(resolved.annotation_limit, AnnotationLimit::All);
        assert!(resolved.credentials.is_none());
    }

    #[test]
    fn credentials_need_both_keys() {
        let config = Config {
            store: Some(StoreSection {
                access_key_id: Some("AKIA".to_string()),
                ..StoreSection::default()
            }),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).credentials.is_none());
    }
}
