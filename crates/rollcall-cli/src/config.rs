use anyhow::{Context, Result};
use rollcall_core::{MatchConfig, PipelineConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Optional TOML file named by `ROLLCALL_CONFIG`. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    pipeline: PipelineConfig,
    matching: MatchConfig,
}

/// Resolved CLI configuration.
#[derive(Debug)]
pub struct Config {
    /// Directory containing `detector.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Path to the SQLite enrollment database.
    pub db_path: PathBuf,
    pub pipeline: PipelineConfig,
    pub matching: MatchConfig,
}

impl Config {
    /// Load the config file (if any), then apply `ROLLCALL_*` overrides.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                toml::from_str(&text).with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = env("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("enrollments.db"));

        let mut pipeline = file.pipeline;
        pipeline.detector.confidence_threshold = parsed(
            &env,
            "ROLLCALL_CONFIDENCE_THRESHOLD",
            pipeline.detector.confidence_threshold,
        );

        let mut matching = file.matching;
        matching.similarity_threshold = parsed(
            &env,
            "ROLLCALL_SIMILARITY_THRESHOLD",
            matching.similarity_threshold,
        );
        matching.degrade_on_store_error = env("ROLLCALL_DEGRADE_ON_STORE_ERROR")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(matching.degrade_on_store_error);

        Self {
            model_dir,
            db_path,
            pipeline,
            matching,
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("detector.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
