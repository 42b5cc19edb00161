//! Error taxonomy for the view compiler.
//!
//! Fatal failures surface as [`ViewError`]. Recoverable problems (missing
//! particles, missing sections) never become errors; they are collected as
//! [`crate::layout::Warning`]s on the render result instead.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_VIEW_NOT_FOUND: &str = "V-ERR-VIEW-404";
pub const ERR_UNMATCHED_TAG: &str = "V-ERR-TAG-001";
pub const ERR_COMPILE: &str = "V-ERR-COMPILE-001";
pub const ERR_RUNTIME: &str = "V-ERR-RUNTIME-001";
pub const ERR_CYCLE: &str = "V-ERR-CYCLE-001";
pub const ERR_IO: &str = "V-ERR-IO-001";
pub const ERR_CONFIG: &str = "V-ERR-CONFIG-001";

pub type Result<T> = std::result::Result<T, ViewError>;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("view \"{name}\" not found at {}", path.display())]
    ViewNotFound { name: String, path: PathBuf },

    #[error("could not find matching close tag for \"{tag}\"")]
    UnmatchedTag { tag: String },

    #[error("failed to compile view \"{view}\": {diagnostic}")]
    Compile { view: String, diagnostic: String },

    #[error("error while rendering view \"{view}\": {message}")]
    Runtime { view: String, message: String },

    #[error("cyclic include: {}", chain.join(" -> "))]
    CyclicInclude { chain: Vec<String> },

    #[error("failed to read view \"{name}\": {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ViewError {
    /// Stable identifier of the failure class, suitable for matching in tooling.
    pub fn code(&self) -> &'static str {
        match self {
            ViewError::ViewNotFound { .. } => ERR_VIEW_NOT_FOUND,
            ViewError::UnmatchedTag { .. } => ERR_UNMATCHED_TAG,
            ViewError::Compile { .. } => ERR_COMPILE,
            ViewError::Runtime { .. } => ERR_RUNTIME,
            ViewError::CyclicInclude { .. } => ERR_CYCLE,
            ViewError::Io { .. } => ERR_IO,
            ViewError::Config(_) => ERR_CONFIG,
        }
    }
}
