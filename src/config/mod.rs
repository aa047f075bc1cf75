//! Application Configuration
//!
//! Dataset and toolkit settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::dataset::{ErrorPolicy, Granularity};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Dataset preparation settings
    pub dataset: DatasetConfig,
    /// External toolkit settings
    pub toolkit: ToolkitConfig,
}

/// Dataset preparation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset root holding `train/` and `validation/`
    pub root: PathBuf,
    /// Fraction of train documents moved to validation
    pub split_ratio: f64,
    /// Recognition sample granularity
    pub granularity: Granularity,
    /// Handling of unusable documents during crop extraction
    pub on_error: ErrorPolicy,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dataset"),
            split_ratio: 0.2,
            granularity: Granularity::Word,
            on_error: ErrorPolicy::Halt,
        }
    }
}

/// External toolkit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Python interpreter used to launch the toolkit scripts
    pub python: String,
    /// PaddleOCR checkout
    pub paddle_dir: PathBuf,
    /// Character dictionary for recognition at inference time
    pub rec_char_dict: PathBuf,
    /// Timeouts in seconds (0 = unlimited)
    pub train_timeout_secs: u64,
    pub export_timeout_secs: u64,
    pub infer_timeout_secs: u64,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            paddle_dir: PathBuf::from("PaddleOCR"),
            rec_char_dict: PathBuf::from("PaddleOCR/ppocr/utils/ppocr_keys_v1.txt"),
            train_timeout_secs: 48 * 3600,
            export_timeout_secs: 30 * 60,
            infer_timeout_secs: 60 * 60,
        }
    }
}

impl ToolkitConfig {
    /// Path of a script inside the PaddleOCR checkout
    pub fn script(&self, relative: &str) -> PathBuf {
        self.paddle_dir.join(relative)
    }
}

/// Default configuration file location
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("org", "funsd-ocr", "funsd-ocr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Check dataset defaults
        assert_eq!(config.dataset.root, PathBuf::from("dataset"));
        assert!((config.dataset.split_ratio - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.dataset.granularity, Granularity::Word);
        assert_eq!(config.dataset.on_error, ErrorPolicy::Halt);

        // Check toolkit defaults
        assert_eq!(config.toolkit.python, "python");
        assert_eq!(config.toolkit.paddle_dir, PathBuf::from("PaddleOCR"));
        assert_eq!(config.toolkit.train_timeout_secs, 172_800);
        assert_eq!(config.toolkit.export_timeout_secs, 1_800);
        assert_eq!(config.toolkit.infer_timeout_secs, 3_600);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.dataset.granularity = Granularity::Field;
        config.dataset.on_error = ErrorPolicy::Skip;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("granularity = \"field\""));
        assert!(toml_str.contains("on_error = \"skip\""));

        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.dataset.granularity, Granularity::Field);
        assert_eq!(parsed.dataset.on_error, ErrorPolicy::Skip);
        assert_eq!(parsed.toolkit.rec_char_dict, config.toolkit.rec_char_dict);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[dataset]\nsplit_ratio = 0.1\n").unwrap();
        assert!((parsed.dataset.split_ratio - 0.1).abs() < f64::EPSILON);
        assert_eq!(parsed.dataset.root, PathBuf::from("dataset"));
        assert_eq!(parsed.toolkit.python, "python");
    }

    #[test]
    fn test_script_path() {
        let toolkit = ToolkitConfig::default();
        assert_eq!(
            toolkit.script("tools/train.py"),
            PathBuf::from("PaddleOCR/tools/train.py")
        );
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.dataset.root, loaded.dataset.root);
        assert_eq!(config.toolkit.infer_timeout_secs, loaded.toolkit.infer_timeout_secs);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
