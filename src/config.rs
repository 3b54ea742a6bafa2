use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Largest accepted request body, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for uploaded and annotated images.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("uploads")
}

impl StorageConfig {
    pub fn keypoint_input_dir(&self) -> PathBuf {
        self.root.join("mtcnn").join("input")
    }

    pub fn mesh_input_dir(&self) -> PathBuf {
        self.root.join("mediapipe").join("input")
    }

    pub fn mesh_output_dir(&self) -> PathBuf {
        self.root.join("mediapipe").join("output")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Planar `[1, 3, H, W]` input.
    #[default]
    Nchw,
    /// Interleaved `[1, H, W, 3]` input.
    Nhwc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    /// File name inside the models directory, or an absolute path.
    pub file: PathBuf,

    /// Download location used when the file is missing.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub layout: TensorLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_models_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_face_detector")]
    pub face_detector: ModelFile,

    #[serde(default = "default_face_mesh")]
    pub face_mesh: ModelFile,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facemeter")
        .join("models")
}

fn default_face_detector() -> ModelFile {
    ModelFile {
        file: PathBuf::from("blazeface-128.onnx"),
        url: None,
        layout: TensorLayout::Nchw,
    }
}

fn default_face_mesh() -> ModelFile {
    ModelFile {
        file: PathBuf::from("face-mesh-attention-192.onnx"),
        url: None,
        layout: TensorLayout::Nhwc,
    }
}

impl ModelsConfig {
    /// Resolve a model file against the models directory.
    pub fn resolve(&self, model: &ModelFile) -> PathBuf {
        if model.file.is_absolute() {
            model.file.clone()
        } else {
            self.dir.join(&model.file)
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: default_models_dir(),
            face_detector: default_face_detector(),
            face_mesh: default_face_mesh(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Delete stored images older than this many days.
    #[serde(default)]
    pub max_age_days: Option<u32>,

    /// Keep at most this many files per storage directory.
    #[serde(default)]
    pub max_files: Option<usize>,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        self.max_age_days.is_some() || self.max_files.is_some()
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: None,
            max_files: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            models: ModelsConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing a default config there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facemeter")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACEMETER_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind.port(), 8000);
        assert_eq!(config.storage.mesh_output_dir(), PathBuf::from("uploads/mediapipe/output"));
        assert_eq!(config.models.face_mesh.layout, TensorLayout::Nhwc);
        assert!(!config.retention.is_enabled());
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            [server]
            bind = "127.0.0.1:9000"

            [retention]
            max_files = 100

            [models.face_detector]
            file = "/opt/models/face.onnx"
            layout = "nhwc"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.server.max_upload_bytes, 20 * 1024 * 1024);
        assert!(config.retention.is_enabled());
        assert_eq!(
            config.models.resolve(&config.models.face_detector),
            PathBuf::from("/opt/models/face.onnx")
        );
        assert_eq!(config.models.face_detector.layout, TensorLayout::Nhwc);
    }

    #[test]
    fn test_load_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.server.bind, config.server.bind);
        assert_eq!(reloaded.storage.root, config.storage.root);
    }
}
