//! Training, export and inference through the PaddleOCR scripts

use std::path::{Path, PathBuf};
use tracing::info;

use super::{training_config, CommandRunner, Invocation};
use crate::config::ToolkitConfig;
use crate::error::{PrepError, PrepResult};

/// File whose presence marks an exported inference model
pub const INFERENCE_MARKER: &str = "inference.pdmodel";

/// Environment variable carrying the experiment-tracking key
pub const TRACKING_KEY_VAR: &str = "WANDB_API_KEY";

const TRAIN_SCRIPT: &str = "tools/train.py";
const EXPORT_SCRIPT: &str = "tools/export_model.py";
const PREDICT_SCRIPT: &str = "tools/infer/predict_system.py";

/// Experiment-tracking credential forwarded to the training process
#[derive(Clone)]
pub struct TrackingCredentials {
    api_key: String,
}

impl TrackingCredentials {
    /// Read the key from `WANDB_API_KEY`; empty counts as missing
    pub fn from_env() -> PrepResult<Self> {
        match std::env::var(TRACKING_KEY_VAR) {
            Ok(key) => Self::from_key(key),
            Err(_) => Err(PrepError::MissingCredential(TRACKING_KEY_VAR)),
        }
    }

    pub fn from_key(api_key: impl Into<String>) -> PrepResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(PrepError::MissingCredential(TRACKING_KEY_VAR));
        }
        Ok(Self { api_key })
    }
}

impl std::fmt::Debug for TrackingCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingCredentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Load a `.env` file from the working directory or one of its parents.
/// Variables already present in the environment are kept.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Whether `model_dir` holds an exported inference model
pub fn is_inference_ready(model_dir: &Path) -> bool {
    model_dir.join(INFERENCE_MARKER).is_file()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Façade over the toolkit's command-line entry points
pub struct ModelRunner<R> {
    runner: R,
    settings: ToolkitConfig,
}

impl<R: CommandRunner> ModelRunner<R> {
    pub fn new(runner: R, settings: ToolkitConfig) -> Self {
        Self { runner, settings }
    }

    fn python(&self, script: &str) -> Invocation {
        Invocation::new(&self.settings.python).arg(path_arg(&self.settings.script(script)))
    }

    /// Run to completion; any non-zero exit is fatal
    fn execute(&self, invocation: Invocation) -> PrepResult<()> {
        let exit = self.runner.run(&invocation)?;
        if !exit.success() {
            return Err(PrepError::ProcessFailed {
                command: invocation.to_string(),
                code: exit.code,
            });
        }
        Ok(())
    }

    /// Point the config at `project` and launch training.
    /// The config file is rewritten in place before the process starts.
    pub fn train(
        &self,
        config_path: &Path,
        project: &str,
        credentials: &TrackingCredentials,
    ) -> PrepResult<()> {
        training_config::set_tracking_project(config_path, project)?;

        info!("Starting finetuning with {:?}", config_path);
        let invocation = self
            .python(TRAIN_SCRIPT)
            .args(["-c".to_string(), path_arg(config_path)])
            .env(TRACKING_KEY_VAR, credentials.api_key.clone())
            .timeout_secs(self.settings.train_timeout_secs);
        self.execute(invocation)
    }

    /// Export the best checkpoint in `model_dir` to inference format
    pub fn export(&self, model_dir: &Path) -> PrepResult<()> {
        let invocation = self
            .python(EXPORT_SCRIPT)
            .args([
                "-c".to_string(),
                path_arg(&model_dir.join("config.yml")),
                "-o".to_string(),
                format!("Global.pretrained_model={}", path_arg(&model_dir.join("best_accuracy"))),
                format!("Global.save_inference_dir={}", path_arg(model_dir)),
            ])
            .timeout_secs(self.settings.export_timeout_secs);
        self.execute(invocation)?;

        if !is_inference_ready(model_dir) {
            return Err(PrepError::ExportIncomplete {
                model_dir: model_dir.to_path_buf(),
                marker: INFERENCE_MARKER,
            });
        }
        Ok(())
    }

    /// Export `model_dir` unless it is already inference-ready.
    /// Returns `true` when an export ran.
    pub fn ensure_inference_model(&self, model_dir: &Path) -> PrepResult<bool> {
        if is_inference_ready(model_dir) {
            return Ok(false);
        }

        info!("Inference model not found in {:?}, exporting finetuned model", model_dir);
        self.export(model_dir)?;
        Ok(true)
    }

    /// Run detection + recognition over `image_dir`, writing results to `output_dir`
    pub fn infer(
        &self,
        det_model_dir: &Path,
        rec_model_dir: &Path,
        image_dir: &Path,
        output_dir: &Path,
    ) -> PrepResult<()> {
        self.ensure_inference_model(det_model_dir)?;
        self.ensure_inference_model(rec_model_dir)?;

        let invocation = self
            .python(PREDICT_SCRIPT)
            .args([
                "--image_dir".to_string(),
                path_arg(image_dir),
                "--det_model_dir".to_string(),
                path_arg(det_model_dir),
                "--rec_model_dir".to_string(),
                path_arg(rec_model_dir),
                "--rec_char_dict_path".to_string(),
                path_arg(&self.settings.rec_char_dict),
                "--draw_img_save_dir".to_string(),
                path_arg(output_dir),
            ])
            .args([
                "--use_angle_cls", "False",
                "--use_space_char", "True",
                "--use_mp", "False",
                "--use_gpu", "False",
                "--show_log", "False",
            ])
            .timeout_secs(self.settings.infer_timeout_secs);
        self.execute(invocation)
    }
}
