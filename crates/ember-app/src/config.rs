// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Vulkan Application".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct InstanceCfg {
    /// Ignored in release builds.
    pub validation: bool,
    pub all_extensions: bool,
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
    pub device_extensions: Vec<String>,
}

impl Default for InstanceCfg {
    fn default() -> Self {
        InstanceCfg {
            validation: true,
            all_extensions: false,
            extensions: Vec::new(),
            layers: Vec::new(),
            device_extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ShaderCfg {
    pub vertex: Option<PathBuf>,
    pub fragment: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub instance: InstanceCfg,
    pub shaders: ShaderCfg,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file → defaults. Malformed file → defaults plus a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {}", path.display(), e);
            AppCfg::default()
        }),
        Err(e) => {
            debug!("no config at {} ({}), using defaults", path.display(), e);
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.title, "Vulkan Application");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert!(cfg.instance.validation);
        assert!(!cfg.instance.all_extensions);
        assert_eq!(cfg.shaders.vertex, None);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 1280

            [instance]
            validation = false
            layers = ["VK_LAYER_LUNARG_monitor"]

            [shaders]
            vertex = "shaders/tri.vert.spv"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.window.title, "Vulkan Application");
        assert!(!cfg.instance.validation);
        assert_eq!(cfg.instance.layers, vec!["VK_LAYER_LUNARG_monitor".to_owned()]);
        assert_eq!(
            cfg.shaders.vertex.as_deref(),
            Some(Path::new("shaders/tri.vert.spv"))
        );
        assert_eq!(cfg.shaders.fragment, None);
    }

    #[test]
    fn wrong_types_are_an_error() {
        assert!(parse_cfg("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("definitely/not/here/ember.toml"));
        assert_eq!(cfg, AppCfg::default());
    }
}
