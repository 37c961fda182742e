use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// File name of the project settings, relative to the project root.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Project layout and tool configuration.
///
/// Every field is optional in `settings.json`; directories are relative to
/// the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub mesh_source_dir: PathBuf,
    pub texture_source_dir: PathBuf,
    pub media_texture_dir: PathBuf,
    pub media_physics_dir: PathBuf,
    pub managers_dir: PathBuf,
    pub texture_compressor: PathBuf,
    /// Executable turning `.fbx` files into the XML interchange format.
    pub scene_converter: Option<PathBuf>,
    pub cook_physics: bool,
    pub compile_request_delay_ms: u64,
    pub file_change_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mesh_source_dir: PathBuf::from("assets/meshes"),
            texture_source_dir: PathBuf::from("assets/textures"),
            media_texture_dir: PathBuf::from("media/textures"),
            media_physics_dir: PathBuf::from("media/physics_meshes"),
            managers_dir: PathBuf::from("managers"),
            texture_compressor: PathBuf::from("nvcompress"),
            scene_converter: None,
            cook_physics: false,
            compile_request_delay_ms: 100,
            file_change_delay_ms: 1000,
        }
    }
}

impl Settings {
    /// Reads `<project>/settings.json`, falling back to the defaults when
    /// the file does not exist.
    pub fn load(project: &Path) -> Result<Self> {
        let path = project.join(SETTINGS_FILE_NAME);
        if !path.is_file() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("malformed settings {}", path.display()))
    }

    pub fn compile_request_delay(&self) -> Duration {
        Duration::from_millis(self.compile_request_delay_ms)
    }

    pub fn file_change_delay(&self) -> Duration {
        Duration::from_millis(self.file_change_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(Settings::load(dir.path()).unwrap(), Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            r#"{ "cookPhysics": true, "textureCompressor": "/opt/nvtt/nvcompress" }"#,
        )
        .unwrap();
        let settings = Settings::load(dir.path()).unwrap();
        assert!(settings.cook_physics);
        assert_eq!(settings.texture_compressor, PathBuf::from("/opt/nvtt/nvcompress"));
        assert_eq!(settings.managers_dir, PathBuf::from("managers"));
        assert_eq!(settings.file_change_delay(), Duration::from_secs(1));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE_NAME), "{ cookPhysics: ").unwrap();
        assert!(Settings::load(dir.path()).is_err());
    }
}
