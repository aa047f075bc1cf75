//! Training configuration edits
//!
//! PaddleOCR reads experiment-tracking settings from a top-level `wandb`
//! section of its YAML config.

use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::info;

use crate::error::{IoResultExt, PrepError, PrepResult};

/// Top-level key holding the tracking section
pub const TRACKING_SECTION: &str = "wandb";

/// Replace the tracking section with `{project: <project>}`, rewriting the file.
/// Applying the same project twice leaves the file unchanged.
pub fn set_tracking_project(config_path: &Path, project: &str) -> PrepResult<()> {
    let content = std::fs::read_to_string(config_path).with_path(config_path)?;
    let yaml_error = |source| PrepError::TrainingConfig {
        path: config_path.to_path_buf(),
        source,
    };

    let mut doc: Value = serde_yaml::from_str(&content).map_err(yaml_error)?;
    let root = doc.as_mapping_mut().ok_or_else(|| {
        PrepError::Config(format!(
            "{}: top level of a training config must be a mapping",
            config_path.display()
        ))
    })?;

    let mut section = Mapping::new();
    section.insert(Value::from("project"), Value::from(project));
    root.insert(Value::from(TRACKING_SECTION), Value::Mapping(section));

    let updated = serde_yaml::to_string(&doc).map_err(yaml_error)?;
    std::fs::write(config_path, updated).with_path(config_path)?;

    info!("Set {} project to {:?} in {:?}", TRACKING_SECTION, project, config_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = "Global:\n  epoch_num: 100\n  save_model_dir: ./output/det\nwandb:\n  project: old\n  entity: team\n";

    #[test]
    fn test_sets_project_and_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("det.yml");
        std::fs::write(&path, CONFIG).unwrap();

        set_tracking_project(&path, "funsd-det").unwrap();

        let doc: Value = serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["wandb"]["project"].as_str(), Some("funsd-det"));
        // Section is replaced as a whole
        assert!(doc["wandb"].get("entity").is_none());
        assert_eq!(doc["Global"]["epoch_num"].as_u64(), Some(100));
    }

    #[test]
    fn test_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rec.yml");
        std::fs::write(&path, CONFIG).unwrap();

        set_tracking_project(&path, "funsd-rec").unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        set_tracking_project(&path, "funsd-rec").unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_mapping_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "- just\n- a list\n").unwrap();

        let err = set_tracking_project(&path, "p").unwrap_err();
        assert!(matches!(err, PrepError::Config(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "- just\n- a list\n");
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "Global: [unclosed\n").unwrap();

        let err = set_tracking_project(&path, "p").unwrap_err();
        assert!(matches!(err, PrepError::TrainingConfig { .. }));
    }
}
