//! Layered configuration: built-in defaults, an optional `rxforms.toml`
//! (or an explicit file), then `RXFORMS__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cache::DEFAULT_CACHE_BYTES;
use crate::error::Result;
use crate::naming::{ExhaustionPolicy, NameGenerator, DEFAULT_MAX_ATTEMPTS};
use crate::template::{RenderMode, Renderer, DEFAULT_SECTION_PASS_LIMIT};

pub const DEFAULT_CONFIG_FILE: &str = "rxforms";
pub const ENV_PREFIX: &str = "RXFORMS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub mode: RenderMode,
    pub section_pass_limit: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { mode: RenderMode::Unbounded, section_pass_limit: DEFAULT_SECTION_PASS_LIMIT }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NamingSettings {
    pub max_attempts: usize,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, exhaustion: ExhaustionPolicy::Accept }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_bytes: usize,
    /// Directory holding markup fragment overrides.
    pub template_dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { max_bytes: DEFAULT_CACHE_BYTES, template_dir: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub render: RenderSettings,
    pub naming: NamingSettings,
    pub cache: CacheSettings,
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true)
}

impl Settings {
    /// Loads settings. An explicit `path` must exist; otherwise `rxforms.toml`
    /// in the working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Self::build(file, environment())
    }

    fn build(file: config::File<config::FileSourceFile, config::FileFormat>, env: config::Environment) -> Result<Settings> {
        let settings = config::Config::builder().add_source(file).add_source(env).build()?.try_deserialize()?;
        Ok(settings)
    }

    pub fn renderer(&self) -> Renderer {
        Renderer::new(self.render.mode, self.render.section_pass_limit)
    }

    pub fn name_generator(&self) -> NameGenerator {
        NameGenerator::new(self.naming.max_attempts, self.naming.exhaustion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let s = Settings::default();
        assert_eq!(s.render.section_pass_limit, 10);
        assert_eq!(s.naming.max_attempts, 100);
        assert_eq!(s.renderer(), Renderer::default());
        assert_eq!(s.name_generator(), NameGenerator::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("rxforms_settings_{}.toml", std::process::id()));
        std::fs::write(&path, "[render]\nmode = \"fixed_point\"\nsection_pass_limit = 3\n\n[naming]\nexhaustion = \"reject\"\n").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(s.render.mode, RenderMode::FixedPoint);
        assert_eq!(s.render.section_pass_limit, 3);
        assert_eq!(s.naming.exhaustion, ExhaustionPolicy::Reject);
        assert_eq!(s.naming.max_attempts, 100);
        assert_eq!(s.cache.max_bytes, DEFAULT_CACHE_BYTES);
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        let vars: config::Map<String, String> = [
            ("RXFORMS__NAMING__MAX_ATTEMPTS".to_string(), "7".to_string()),
            ("RXFORMS__RENDER__MODE".to_string(), "fixed_point".to_string()),
        ]
        .into_iter()
        .collect();
        let file = config::File::with_name("rxforms_settings_absent").required(false);
        let s = Settings::build(file, environment().source(Some(vars))).unwrap();
        assert_eq!(s.naming.max_attempts, 7);
        assert_eq!(s.render.mode, RenderMode::FixedPoint);
        assert_eq!(s.render.section_pass_limit, DEFAULT_SECTION_PASS_LIMIT);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("rxforms_settings_does_not_exist.toml");
        assert!(Settings::load(Some(&path)).is_err());
    }
}
