use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Process-wide settings, loaded once at startup and passed to constructors.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
}

/// Which backend holds uploaded files. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    Local {
        base_path: String,
    },
    Remote {
        bucket_name: String,
        /// Service account JSON; the metadata server is used when absent.
        credentials_file: Option<String>,
        /// API endpoint override, e.g. for a storage emulator.
        endpoint: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local {
                base_path: "./files".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let max_upload_size = match var("MAX_UPLOAD_SIZE") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("MAX_UPLOAD_SIZE is not a number: {raw}"))
            })?,
            None => 100 * 1024 * 1024, // 100MB
        };

        let provider = var("STORAGE_PROVIDER").unwrap_or_else(|| "local".to_string());
        let provider = match provider.trim().to_lowercase().as_str() {
            "local" => StorageProvider::Local {
                base_path: var("LOCAL_STORAGE_PATH").unwrap_or_else(|| "./files".to_string()),
            },
            "remote" | "gcs" | "google_cloud" => StorageProvider::Remote {
                bucket_name: var("GCS_BUCKET").unwrap_or_default(),
                credentials_file: var("GCS_CREDENTIALS_FILE")
                    .or_else(|| var("GOOGLE_APPLICATION_CREDENTIALS"))
                    .filter(|s| !s.is_empty()),
                endpoint: var("GCS_ENDPOINT").filter(|s| !s.is_empty()),
            },
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "STORAGE_PROVIDER must be 'local' or 'remote', got '{other}'"
                )))
            }
        };

        let config = Config {
            bind_address,
            max_upload_size,
            storage: StorageConfig { provider },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        match &self.storage.provider {
            StorageProvider::Local { base_path } if base_path.trim().is_empty() => {
                Err(ConfigError::ValidationError(
                    "LOCAL_STORAGE_PATH cannot be empty".to_string(),
                ))
            }
            StorageProvider::Remote { bucket_name, .. } if bucket_name.trim().is_empty() => {
                Err(ConfigError::ValidationError(
                    "GCS_BUCKET is required when STORAGE_PROVIDER=remote".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_to_local_storage() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(
            config.storage.provider,
            StorageProvider::Local {
                base_path: "./files".to_string()
            }
        );
    }

    #[test]
    fn test_remote_requires_bucket() {
        let err = load(&[("STORAGE_PROVIDER", "remote")]).unwrap_err();
        assert!(err.to_string().contains("GCS_BUCKET"));

        let config = load(&[
            ("STORAGE_PROVIDER", "gcs"),
            ("GCS_BUCKET", "print-files"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/secrets/sa.json"),
        ])
        .unwrap();
        assert_eq!(
            config.storage.provider,
            StorageProvider::Remote {
                bucket_name: "print-files".to_string(),
                credentials_file: Some("/secrets/sa.json".to_string()),
                endpoint: None,
            }
        );
    }

    #[test]
    fn test_rejects_unknown_provider() {
        assert!(load(&[("STORAGE_PROVIDER", "s3")]).is_err());
    }

    #[test]
    fn test_rejects_bad_upload_size() {
        assert!(load(&[("MAX_UPLOAD_SIZE", "lots")]).is_err());
        assert!(load(&[("MAX_UPLOAD_SIZE", "0")]).is_err());
    }
}
