//! Compiler Module for the view compiler
//!
//! `ViewCompiler` ties the pipeline together:
//! resolve layout directives → tokenize → generate source → compile → run.

use crate::codegen::generate_source;
use crate::config::ViewConfig;
use crate::error::{Result, ViewError};
use crate::execute::{self, CompiledView, RenderContext};
use crate::layout::{self, Resolved, ViewLoader, Warning};
use crate::store::{discover_views, FsViewStore, ViewStore};
use crate::tokenize::tokenize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Output of one render plus the recoverable problems met on the way.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendered {
    pub output: String,
    pub warnings: Vec<Warning>,
}

/// Entry point for rendering named views. Cheap to clone; every render only
/// reads the shared configuration and store.
#[derive(Clone)]
pub struct ViewCompiler {
    config: Arc<ViewConfig>,
    store: Arc<dyn ViewStore>,
}

impl ViewCompiler {
    /// Compiler reading views from the filesystem under the configured root.
    pub fn new(config: ViewConfig) -> Self {
        Self::with_store(config, Arc::new(FsViewStore))
    }

    pub fn with_store(config: ViewConfig, store: Arc<dyn ViewStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Render the view `name` with `data` (a JSON object or null).
    pub fn render(&self, name: &str, data: &serde_json::Value) -> Result<Rendered> {
        let resolved = self.resolve(name)?;
        self.render_resolved(resolved, data)
    }

    /// Render template text that is not in the store. Layout directives in
    /// it still load views by name.
    pub fn render_source(&self, label: &str, text: &str, data: &serde_json::Value) -> Result<Rendered> {
        let resolved = layout::resolve_text(self, label, text)?;
        self.render_resolved(resolved, data)
    }

    /// Flattened template text of `name` with every layout directive applied.
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        layout::resolve_view(self, name, false)
    }

    /// Resolve and compile `name` without running it.
    pub fn compile(&self, name: &str) -> Result<CompiledView> {
        let resolved = self.resolve(name)?;
        let source = self.generate(&resolved)?;
        execute::compile(name, &source)
    }

    /// Logical names of every view found under the views root.
    pub fn available_views(&self) -> Vec<String> {
        discover_views(self.config.views_dir(), self.config.extension())
    }

    fn generate(&self, resolved: &Resolved) -> Result<String> {
        let tokens = tokenize(&resolved.content);
        let source = generate_source(&tokens)?;
        tracing::trace!(view = %resolved.name, source = %source, "generated view source");
        Ok(source)
    }

    fn context(&self, data: &serde_json::Value) -> Result<RenderContext> {
        let context = self
            .config
            .helpers()
            .iter()
            .fold(RenderContext::new(), |context, (name, helper)| {
                context.with_helper(name.clone(), helper.clone())
            });
        context.with_json(data)
    }

    fn render_resolved(&self, resolved: Resolved, data: &serde_json::Value) -> Result<Rendered> {
        let context = self.context(data)?;
        let source = self.generate(&resolved)?;
        let output = execute::compile_and_run(&resolved.name, &source, &context)?;
        tracing::debug!(
            view = %resolved.name,
            bytes = output.len(),
            warnings = resolved.warnings.len(),
            "rendered view"
        );
        Ok(Rendered {
            output,
            warnings: resolved.warnings,
        })
    }
}

impl ViewLoader for ViewCompiler {
    fn view_path(&self, name: &str) -> PathBuf {
        self.config.view_path(name)
    }

    fn load_view(&self, name: &str) -> Result<Option<String>> {
        let path = self.config.view_path(name);
        self.store
            .load(name, &path)
            .map_err(|source| ViewError::Io {
                name: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryViewStore;
    use crate::value::Value;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn memory(views: &[(&str, &str)]) -> ViewCompiler {
        let store = views
            .iter()
            .fold(MemoryViewStore::new(), |store, (name, text)| store.with_view(*name, *text));
        ViewCompiler::with_store(ViewConfig::new("/views"), Arc::new(store))
    }

    #[test]
    fn test_render_from_filesystem() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("partials")).unwrap();
        fs::write(dir.path().join("layout.ejs"), "<body>@yield('body')</body>").unwrap();
        fs::write(dir.path().join("partials/nav.ejs"), "<nav/>").unwrap();
        fs::write(
            dir.path().join("home.ejs"),
            "@extends('layout')\n@section('body')\n@particle('partials/nav')<p><%= msg %></p>\n@endsection\n",
        )
        .unwrap();

        let compiler = ViewCompiler::new(ViewConfig::new(dir.path()));
        let rendered = compiler.render("home", &json!({"msg": "a & b"})).unwrap();
        assert_eq!(rendered.output, "<body><nav/><p>a &amp; b</p></body>");
        assert!(rendered.warnings.is_empty());
        assert_eq!(compiler.available_views(), vec!["home", "layout", "partials/nav"]);
    }

    #[test]
    fn test_missing_primary_view() {
        let dir = TempDir::new().unwrap();
        let compiler = ViewCompiler::new(ViewConfig::new(dir.path()));
        let err = compiler.render("nope", &json!({})).unwrap_err();
        match err {
            ViewError::ViewNotFound { name, path } => {
                assert_eq!(name, "nope");
                assert_eq!(path, dir.path().join("nope.ejs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_helpers_from_config() {
        let config = ViewConfig::new("/views").with_helper("upper", |args: &[Value]| {
            Ok(Value::from(args.first().map(|v| v.to_js_string()).unwrap_or_default().to_uppercase()))
        });
        let store = MemoryViewStore::new().with_view("shout", "<%= upper(word) %>!");
        let compiler = ViewCompiler::with_store(config, Arc::new(store));
        let rendered = compiler.render("shout", &json!({"word": "hey"})).unwrap();
        assert_eq!(rendered.output, "HEY!");
    }

    #[test]
    fn test_compile_returns_reusable_unit() {
        let compiler = memory(&[("greet", "Hi <%= who %>")]);
        let view = compiler.compile("greet").unwrap();
        assert_eq!(view.name(), "greet");
        let out = view
            .run(&RenderContext::new().with_value("who", Value::from("Ann")))
            .unwrap();
        assert_eq!(out, "Hi Ann");
    }

    #[test]
    fn test_render_source_uses_store_for_particles() {
        let compiler = memory(&[("footer", "<footer>(c)</footer>")]);
        let rendered = compiler
            .render_source("inline", "<main/>@particle('footer')", &json!(null))
            .unwrap();
        assert_eq!(rendered.output, "<main/><footer>(c)</footer>");
    }

    #[test]
    fn test_rejects_non_object_data() {
        let compiler = memory(&[("v", "x")]);
        assert!(matches!(
            compiler.render("v", &json!("text")),
            Err(ViewError::Config(_))
        ));
    }

    #[test]
    fn test_rendered_serializes_camel_case() {
        let compiler = memory(&[("v", "@particle('gone')ok")]);
        let rendered = compiler.render("v", &json!({})).unwrap();
        let json = serde_json::to_value(&rendered).unwrap();
        assert_eq!(json["output"], "ok");
        assert_eq!(json["warnings"][0]["kind"], "missingParticle");
    }
}
