//! Config Module for the view compiler
//!
//! `ViewSettings` is the serializable part (views root, file extension).
//! `ViewConfig` adds the helper registry and is frozen once built.

use crate::error::{Result, ViewError};
use crate::value::{Helper, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_EXTENSION: &str = "ejs";

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSettings {
    pub views_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl ViewSettings {
    pub fn new(views_dir: impl Into<PathBuf>) -> Self {
        Self {
            views_dir: views_dir.into(),
            extension: default_extension(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: ViewSettings =
            serde_json::from_str(json).map_err(|e| ViewError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| ViewError::Io {
            name: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.extension.is_empty() || self.extension.starts_with('.') {
            return Err(ViewError::Config(format!(
                "extension must be non-empty and given without a leading dot, got \"{}\"",
                self.extension
            )));
        }
        Ok(())
    }
}

/// Settings plus helpers. Shared behind an `Arc` and never mutated.
#[derive(Clone)]
pub struct ViewConfig {
    settings: ViewSettings,
    helpers: IndexMap<String, Helper>,
}

impl ViewConfig {
    pub fn new(views_dir: impl Into<PathBuf>) -> Self {
        Self::from_settings(ViewSettings::new(views_dir))
    }

    pub fn from_settings(settings: ViewSettings) -> Self {
        Self {
            settings,
            helpers: IndexMap::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        self.settings.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Register a function callable by name from embedded code.
    pub fn with_helper<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn views_dir(&self) -> &Path {
        &self.settings.views_dir
    }

    pub fn extension(&self) -> &str {
        &self.settings.extension
    }

    pub fn helpers(&self) -> &IndexMap<String, Helper> {
        &self.helpers
    }

    /// `views_dir/{name}.{extension}`
    pub fn view_path(&self, name: &str) -> PathBuf {
        self.settings
            .views_dir
            .join(format!("{}.{}", name, self.settings.extension))
    }
}

impl fmt::Debug for ViewConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewConfig")
            .field("settings", &self.settings)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_view_path_convention() {
        let config = ViewConfig::new("/srv/views");
        assert_eq!(config.view_path("home"), PathBuf::from("/srv/views/home.ejs"));
        assert_eq!(
            config.view_path("partials/nav"),
            PathBuf::from("/srv/views/partials/nav.ejs")
        );

        let config = config.with_extension(".html");
        assert_eq!(config.view_path("home"), PathBuf::from("/srv/views/home.html"));
    }

    #[test]
    fn test_settings_from_json_defaults_extension() {
        let settings = ViewSettings::from_json_str(r#"{"viewsDir": "views"}"#).unwrap();
        assert_eq!(settings.views_dir, PathBuf::from("views"));
        assert_eq!(settings.extension, "ejs");

        let settings =
            ViewSettings::from_json_str(r#"{"viewsDir": "v", "extension": "tpl"}"#).unwrap();
        assert_eq!(settings.extension, "tpl");
    }

    #[test]
    fn test_settings_rejects_bad_input() {
        assert!(matches!(
            ViewSettings::from_json_str(r#"{"extension": "ejs"}"#),
            Err(ViewError::Config(_))
        ));
        assert!(matches!(
            ViewSettings::from_json_str(r#"{"viewsDir": "v", "extension": ".ejs"}"#),
            Err(ViewError::Config(_))
        ));
    }

    #[test]
    fn test_settings_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("views.json");
        fs::write(&path, r#"{"viewsDir": "templates", "extension": "html"}"#).unwrap();
        let settings = ViewSettings::from_json_file(&path).unwrap();
        assert_eq!(settings, ViewSettings {
            views_dir: PathBuf::from("templates"),
            extension: "html".to_string(),
        });

        let missing = ViewSettings::from_json_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ViewError::Io { .. })));
    }

    #[test]
    fn test_helpers_keep_registration_order() {
        let config = ViewConfig::new("v")
            .with_helper("b", |_| Ok(Value::Null))
            .with_helper("a", |_| Ok(Value::Null));
        let names: Vec<&String> = config.helpers().keys().collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
