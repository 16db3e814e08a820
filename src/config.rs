//! Inference bridge configuration

use serde::Deserialize;
use std::path::PathBuf;

use crate::engine::codec::AlphaPolicy;
use crate::engine::devices::DEFAULT_CACHE_DIR;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    /// Input width; the model's declared shape is kept when unset
    pub width: Option<usize>,
    pub height: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Index into the presented (reversed) device listing
    #[serde(default)]
    pub device_index: usize,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub alpha: AlphaPolicy,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            cache_dir: default_cache_dir(),
            alpha: AlphaPolicy::Opaque,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read '{}': {}", path, e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                path: PathBuf::from("models/model.xml"),
                width: None,
                height: None,
            },
            inference: InferenceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
            [model]
            path = "models/style.xml"
            width = 640
            height = 360

            [inference]
            device_index = 1
            cache_dir = "ov_cache"
            alpha = "preserve"
            "#,
        )
        .unwrap();

        assert_eq!(config.model.path, PathBuf::from("models/style.xml"));
        assert_eq!(config.model.width, Some(640));
        assert_eq!(config.model.height, Some(360));
        assert_eq!(config.inference.device_index, 1);
        assert_eq!(config.inference.cache_dir, PathBuf::from("ov_cache"));
        assert_eq!(config.inference.alpha, AlphaPolicy::Preserve);
    }

    #[test]
    fn test_inference_section_defaults() {
        let config = Config::from_toml("[model]\npath = \"m.xml\"\n").unwrap();

        assert_eq!(config.model.width, None);
        assert_eq!(config.inference.device_index, 0);
        assert_eq!(config.inference.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.inference.alpha, AlphaPolicy::Opaque);
    }

    #[test]
    fn test_invalid_alpha_policy() {
        let result = Config::from_toml("[model]\npath = \"m.xml\"\n[inference]\nalpha = \"half\"\n");
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[model]\npath = \"from_file.xml\"\nwidth = 32\nheight = 16").unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.model.path, PathBuf::from("from_file.xml"));
        assert_eq!(config.model.width, Some(32));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/config.toml"),
            Err(BridgeError::Config(_))
        ));
    }
}
