//! # View Compiler
//!
//! Compiles EJS-style templates with layout directives into output text.
//!
//! ## Pipeline
//!
//! 1. **Resolve** (`layout`): `@particle` includes are expanded, then
//!    `@extends`/`@section`/`@yield` are spliced into one template text.
//! 2. **Tokenize** (`tokenize`): tag markers are split from literal runs.
//!    Concatenating the tokens always reproduces the input.
//! 3. **Generate** (`codegen`): a mode state machine turns tokens into
//!    `__append(...)` statements and verbatim code lines.
//! 4. **Execute** (`execute`): the generated source is parsed with `oxc` and
//!    run by a tree-walking interpreter against the render context.
//!
//! ## Invariants
//!
//! 1. **Text Passthrough**: a template without tags or directives renders to
//!    itself byte-for-byte.
//!
//! 2. **Escaping**: `<%= expr %>` output is HTML-escaped (`& < > " '`);
//!    `<%- expr %>` is written raw. `undefined`/`null` write nothing.
//!
//! 3. **Trim**: `-%>` and `_%>` remove exactly one following line break.
//!
//! 4. **Context Precedence**: builtin globals < `escapeFunction` < helpers <
//!    caller data. The last writer wins.
//!
//! 5. **Isolation**: every render owns its resolution state and runtime
//!    values. Configuration and the view store are only read.
//!
//! ## Errors
//!
//! Fatal problems are [`ViewError`]s (missing view, unmatched tag, compile,
//! runtime, cyclic include, I/O, configuration). Missing particles and
//! sections are [`Warning`]s returned with the output.

mod builtins;
mod codegen;
mod compiler;
mod config;
mod error;
mod escape;
mod execute;
mod interpreter;
mod layout;
mod store;
mod tokenize;
mod value;

#[cfg(test)]
mod render_tests;

pub use codegen::{generate_source, Mode, APPEND_FN, ESCAPE_FN};
pub use compiler::{Rendered, ViewCompiler};
pub use config::{ViewConfig, ViewSettings, DEFAULT_EXTENSION};
pub use error::*;
pub use escape::{escape_html, escape_value};
pub use execute::{compile, compile_and_run, CompiledView, RenderContext};
pub use layout::{resolve_text, resolve_view, Resolved, ViewLoader, Warning};
pub use store::{discover_views, FsViewStore, MemoryViewStore, ViewStore};
pub use tokenize::{tokenize, TagMarker, Token};
pub use value::{Helper, Value};
