use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, ViewerError};

pub const DEFAULT_HEAP_OPTION: &str = "-Xmx4G";
pub const DEFAULT_JAR_DIR: &str = "./jars";

const HEAP_OPTION_ENV: &str = "BDV_HEAP_OPTION";
const JAR_DIR_ENV: &str = "BDV_JAR_DIR";

#[derive(Debug, Default, Deserialize)]
pub struct BdvConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub view: ViewOptions,
}

impl BdvConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bdv")
            .join("config.toml")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}

/// How the embedded runtime is launched.
///
/// Empty strings count as unset, matching what callers passing empty
/// arguments expect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    pub heap_option: Option<String>,
    pub jar_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn new(heap_option: Option<&str>, jar_dir: Option<&Path>) -> Self {
        Self {
            heap_option: heap_option.map(str::to_owned),
            jar_dir: jar_dir.map(Path::to_path_buf),
        }
    }

    pub fn heap_option(&self) -> &str {
        match self.heap_option.as_deref() {
            Some(opt) if !opt.is_empty() => opt,
            _ => DEFAULT_HEAP_OPTION,
        }
    }

    pub fn jar_dir(&self) -> &Path {
        match self.jar_dir.as_deref() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new(DEFAULT_JAR_DIR),
        }
    }

    /// Overlay `BDV_HEAP_OPTION` / `BDV_JAR_DIR` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(heap) = lookup(HEAP_OPTION_ENV) {
            self.heap_option = Some(heap);
        }
        if let Some(dir) = lookup(JAR_DIR_ENV) {
            self.jar_dir = Some(PathBuf::from(dir));
        }
        self
    }
}

/// Render geometry for one viewer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewOptions {
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default = "default_height")]
    pub height: i32,
    /// Screen scales, tried from last to first while a frame refines. Each
    /// must lie in `(0, 1]`.
    #[serde(default = "default_screen_scales")]
    pub screen_scales: Vec<f64>,
    #[serde(default = "default_rendering_threads")]
    pub rendering_threads: i32,
}

fn default_width() -> i32 {
    800
}
fn default_height() -> i32 {
    600
}
fn default_screen_scales() -> Vec<f64> {
    vec![1.0, 0.75, 0.5, 0.25, 0.125]
}
fn default_rendering_threads() -> i32 {
    3
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            screen_scales: default_screen_scales(),
            rendering_threads: default_rendering_threads(),
        }
    }
}

impl ViewOptions {
    pub fn new(width: i32, height: i32, screen_scales: Vec<f64>) -> Self {
        Self {
            width,
            height,
            screen_scales,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ViewerError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(ViewerError::InvalidOptions(format!(
                "render size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width.checked_mul(self.height).is_none() {
            return Err(ViewerError::InvalidOptions(format!(
                "{}x{} pixels do not fit one frame array",
                self.width, self.height
            )));
        }
        if self.screen_scales.is_empty() {
            return Err(ViewerError::InvalidOptions("no screen scales given".into()));
        }
        if let Some(bad) = self
            .screen_scales
            .iter()
            .find(|s| !(**s > 0.0 && **s <= 1.0))
        {
            return Err(ViewerError::InvalidOptions(format!(
                "screen scale {bad} outside (0, 1]"
            )));
        }
        if self.rendering_threads < 1 {
            return Err(ViewerError::InvalidOptions(format!(
                "need at least one rendering thread, got {}",
                self.rendering_threads
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[runtime]
heap_option = "-Xmx8G"
jar_dir = "/opt/bdv/jars"

[view]
width = 1024
height = 768
screen_scales = [1.0, 0.5]
rendering_threads = 4
"#;
        let config: BdvConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runtime.heap_option(), "-Xmx8G");
        assert_eq!(config.runtime.jar_dir(), Path::new("/opt/bdv/jars"));
        assert_eq!(config.view.width, 1024);
        assert_eq!(config.view.screen_scales, vec![1.0, 0.5]);
        assert_eq!(config.view.rendering_threads, 4);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: BdvConfig = toml::from_str("").unwrap();
        assert_eq!(config.runtime.heap_option(), DEFAULT_HEAP_OPTION);
        assert_eq!(config.runtime.jar_dir(), Path::new(DEFAULT_JAR_DIR));
        assert_eq!(config.view, ViewOptions::default());
    }

    #[test]
    fn empty_strings_fall_back_to_defaults() {
        let config = RuntimeConfig::new(Some(""), Some(Path::new("")));
        assert_eq!(config.heap_option(), DEFAULT_HEAP_OPTION);
        assert_eq!(config.jar_dir(), Path::new(DEFAULT_JAR_DIR));
    }

    #[test]
    fn overrides_replace_file_values() {
        let config = RuntimeConfig::new(Some("-Xmx1G"), None).with_overrides(|key| match key {
            "BDV_JAR_DIR" => Some("/tmp/jars".into()),
            _ => None,
        });
        assert_eq!(config.heap_option(), "-Xmx1G");
        assert_eq!(config.jar_dir(), Path::new("/tmp/jars"));
    }

    #[test]
    fn rejects_scales_outside_unit_interval() {
        for scales in [vec![], vec![1.0, 0.0], vec![1.5], vec![f64::NAN]] {
            let view = ViewOptions::new(800, 600, scales.clone());
            assert!(
                matches!(view.validate(), Err(ViewerError::InvalidOptions(_))),
                "scales {scales:?} should be rejected"
            );
        }
        assert!(ViewOptions::default().validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(ViewOptions::new(0, 600, vec![1.0]).validate().is_err());
        let mut view = ViewOptions::default();
        view.rendering_threads = 0;
        assert!(view.validate().is_err());
    }

    #[test]
    fn rejects_frames_larger_than_an_int_array() {
        let view = ViewOptions::new(50_000, 50_000, vec![1.0]);
        assert!(matches!(view.validate(), Err(ViewerError::InvalidOptions(_))));
        assert!(ViewOptions::new(46_340, 46_340, vec![1.0]).validate().is_ok());
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        match BdvConfig::from_file(&path) {
            Err(ConfigError::Read { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
