//! Execution Engine
//!
//! Compiles generated view source with `oxc_parser` and runs it through the
//! [`Interpreter`] against a render context. Parsing and running share one
//! arena, so a [`CompiledView`] keeps the checked source and re-parses on each
//! run.

use crate::builtins;
use crate::codegen::ESCAPE_FN;
use crate::error::{Result, ViewError};
use crate::interpreter::Interpreter;
use crate::value::{Callable, Helper, Value};
use indexmap::IndexMap;
use oxc_allocator::Allocator;
use oxc_parser::{ParseOptions, Parser};
use oxc_span::SourceType;

/// Names bound for one render, in precedence order (later writers win).
#[derive(Clone, Default)]
pub struct RenderContext {
    helpers: IndexMap<String, Helper>,
    data: IndexMap<String, Value>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_helper(mut self, name: impl Into<String>, helper: Helper) -> Self {
        self.helpers.insert(name.into(), helper);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.data.insert(name.into(), value);
        self
    }

    /// Bind every top-level field of a JSON object; `null` binds nothing.
    pub fn with_json(mut self, data: &serde_json::Value) -> Result<Self> {
        match data {
            serde_json::Value::Object(map) => {
                for (name, value) in map {
                    self.data.insert(name.clone(), Value::from_json(value));
                }
                Ok(self)
            }
            serde_json::Value::Null => Ok(self),
            other => Err(ViewError::Config(format!(
                "render data must be a JSON object or null, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Globals, then `escapeFunction`, then helpers, then caller data.
    fn bindings(&self) -> Vec<(String, Value)> {
        let mut bindings: Vec<(String, Value)> = builtins::globals()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        bindings.push((ESCAPE_FN.to_string(), builtins::escape_function()));
        for (name, helper) in &self.helpers {
            bindings.push((name.clone(), Value::Function(Callable::Helper(helper.clone()))));
        }
        for (name, value) in &self.data {
            bindings.push((name.clone(), value.clone()));
        }
        bindings
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn source_type() -> SourceType {
    SourceType::default().with_module(false)
}

fn parse_options() -> ParseOptions {
    ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    }
}

fn compile_error<E: std::fmt::Display>(view: &str, errors: &[E]) -> ViewError {
    let diagnostic = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    ViewError::Compile {
        view: view.to_string(),
        diagnostic,
    }
}

/// Opaque compiled unit: syntax-checked source, re-invocable with any context.
#[derive(Debug, Clone)]
pub struct CompiledView {
    name: String,
    source: String,
}

impl CompiledView {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The generated source this unit runs.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn run(&self, context: &RenderContext) -> Result<String> {
        compile_and_run(&self.name, &self.source, context)
    }
}

/// Check that generated source is valid; no code runs.
pub fn compile(view: &str, source: &str) -> Result<CompiledView> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type())
        .with_options(parse_options())
        .parse();
    if !ret.errors.is_empty() {
        return Err(compile_error(view, &ret.errors));
    }
    Ok(CompiledView {
        name: view.to_string(),
        source: source.to_string(),
    })
}

/// Compile generated source and run it, returning the accumulated output.
pub fn compile_and_run(view: &str, source: &str, context: &RenderContext) -> Result<String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type())
        .with_options(parse_options())
        .parse();
    if !ret.errors.is_empty() {
        return Err(compile_error(view, &ret.errors));
    }

    let program = ret.program;
    tracing::trace!(view, statements = program.body.len(), "running view");

    Interpreter::new(source, context.bindings())
        .run(&program)
        .map_err(|message| ViewError::Runtime {
            view: view.to_string(),
            message,
        })
}
