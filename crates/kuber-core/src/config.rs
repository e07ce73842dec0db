use kuber_crypto::{ChunkedPipeline, CipherKey, StreamOptions, DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KuberError, KuberResult};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KuberConfig {
    pub crypto: CryptoConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Environment variable holding the base64 key (default: KUBER_KEY)
    pub key_env: String,
    /// File holding the base64 key; takes precedence over `key_env`
    pub key_file: Option<PathBuf>,
    /// Transform buffer size in bytes, rounded down to a block multiple
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Read chunk size for `kuber encrypt` (default: 4 KiB)
    pub encrypt_chunk_size: usize,
    /// Read chunk size for `kuber decrypt` (default: 4 KiB)
    pub decrypt_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_env: "KUBER_KEY".into(),
            key_file: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            encrypt_chunk_size: DEFAULT_CHUNK_SIZE,
            decrypt_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl KuberConfig {
    /// Read and parse a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> KuberResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| KuberError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the transform cannot run with.
    pub fn validate(&self) -> KuberResult<()> {
        if self.crypto.buffer_size < kuber_crypto::BLOCK_SIZE {
            return Err(KuberError::Config(format!(
                "crypto.buffer_size must be at least {} bytes (got {})",
                kuber_crypto::BLOCK_SIZE,
                self.crypto.buffer_size
            )));
        }
        if self.pipeline.encrypt_chunk_size == 0 || self.pipeline.decrypt_chunk_size == 0 {
            return Err(KuberError::Config(
                "pipeline chunk sizes must be non-zero".into(),
            ));
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(KuberError::Config(format!(
                "logging.format must be \"json\" or \"text\" (got {other:?})"
            ))),
        }
    }
}

impl CryptoConfig {
    /// Resolve the cipher key: `key_file` if set, otherwise the `key_env`
    /// environment variable. Both hold the key as base64.
    pub fn load_key(&self) -> KuberResult<CipherKey> {
        let encoded = match &self.key_file {
            Some(path) => {
                check_key_file_mode(path);
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    KuberError::Key(format!("reading key file {}: {e}", path.display()))
                })?;
                SecretString::from(raw)
            }
            None => {
                let raw = std::env::var(&self.key_env).map_err(|_| {
                    KuberError::Key(format!(
                        "no key configured: set {} or crypto.key_file",
                        self.key_env
                    ))
                })?;
                SecretString::from(raw)
            }
        };
        Ok(CipherKey::from_base64(&encoded)?)
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions::default().with_buffer_size(self.buffer_size)
    }
}

impl PipelineConfig {
    pub fn encrypt_pipeline(&self) -> KuberResult<ChunkedPipeline> {
        Ok(ChunkedPipeline::new(self.encrypt_chunk_size)?)
    }

    pub fn decrypt_pipeline(&self) -> KuberResult<ChunkedPipeline> {
        Ok(ChunkedPipeline::new(self.decrypt_chunk_size)?)
    }
}

/// Warn when the key file is readable by group or others.
fn check_key_file_mode(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            let mode = meta.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                tracing::warn!(
                    path = %path.display(),
                    mode = %format!("{mode:o}"),
                    "key file is group/world accessible (suggest 0600)"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[crypto]
key_env = "MY_KEY"
key_file = "/etc/kuber/key"
buffer_size = 65536

[pipeline]
encrypt_chunk_size = 102400
decrypt_chunk_size = 8192

[logging]
level = "debug"
format = "json"
"#;
        let config: KuberConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.crypto.key_env, "MY_KEY");
        assert_eq!(config.crypto.key_file, Some(PathBuf::from("/etc/kuber/key")));
        assert_eq!(config.crypto.buffer_size, 65536);
        assert_eq!(config.pipeline.encrypt_chunk_size, 102400);
        assert_eq!(config.pipeline.decrypt_chunk_size, 8192);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: KuberConfig = toml::from_str("").unwrap();

        assert_eq!(config.crypto.key_env, "KUBER_KEY");
        assert!(config.crypto.key_file.is_none());
        assert_eq!(config.crypto.buffer_size, 8192);
        assert_eq!(config.pipeline.encrypt_chunk_size, 4096);
        assert_eq!(config.pipeline.decrypt_chunk_size, 4096);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[pipeline]
encrypt_chunk_size = 102400
"#;
        let config: KuberConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.pipeline.encrypt_chunk_size, 102400);
        // Defaults
        assert_eq!(config.pipeline.decrypt_chunk_size, 4096);
        assert_eq!(config.crypto.buffer_size, 8192);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = KuberConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: KuberConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.crypto.key_env, parsed.crypto.key_env);
        assert_eq!(config.crypto.buffer_size, parsed.crypto.buffer_size);
        assert_eq!(config.logging.format, parsed.logging.format);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = KuberConfig::default();
        config.crypto.buffer_size = 15;
        assert!(matches!(config.validate(), Err(KuberError::Config(_))));

        let mut config = KuberConfig::default();
        config.pipeline.decrypt_chunk_size = 0;
        assert!(matches!(config.validate(), Err(KuberError::Config(_))));

        let mut config = KuberConfig::default();
        config.logging.format = "yaml".into();
        assert!(matches!(config.validate(), Err(KuberError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = KuberConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.crypto.key_env, "KUBER_KEY");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[crypto]\nbuffer_size = 4096").unwrap();
        let config = KuberConfig::load(file.path()).unwrap();
        assert_eq!(config.crypto.buffer_size, 4096);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[crypto\nbuffer_size = ").unwrap();
        assert!(matches!(
            KuberConfig::load(file.path()),
            Err(KuberError::Config(_))
        ));
    }

    #[test]
    fn test_load_key_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // 32 bytes of 0x00, base64, with a trailing newline
        writeln!(file, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap();
        let crypto = CryptoConfig {
            key_file: Some(file.path().to_path_buf()),
            ..CryptoConfig::default()
        };
        let key = crypto.load_key().unwrap();
        assert_eq!(key.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_load_key_from_env() {
        let var = "KUBER_TEST_KEY_FROM_ENV";
        std::env::set_var(var, "AQEBAQEBAQEBAQEBAQEBAQ==");
        let crypto = CryptoConfig {
            key_env: var.into(),
            ..CryptoConfig::default()
        };
        let key = crypto.load_key().unwrap();
        assert_eq!(key.as_bytes(), &[1u8; 16]);
        std::env::remove_var(var);
    }

    #[test]
    fn test_load_key_missing() {
        let crypto = CryptoConfig {
            key_env: "KUBER_TEST_KEY_NEVER_SET".into(),
            ..CryptoConfig::default()
        };
        assert!(matches!(crypto.load_key(), Err(KuberError::Key(_))));
    }

    #[test]
    fn test_pipelines_follow_config() {
        let config = KuberConfig::default();
        assert_eq!(config.pipeline.encrypt_pipeline().unwrap().chunk_size(), 4096);

        let pipeline = PipelineConfig {
            decrypt_chunk_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            pipeline.decrypt_pipeline(),
            Err(KuberError::Crypto(kuber_crypto::CryptoError::InvalidChunkSize))
        ));
    }
}
