//! Layout Module for the view compiler
//!
//! Flattens `@particle`, `@extends`, `@section` and `@yield` directives into a
//! single template text before tokenization:
//!
//! 1. `@particle('name')` is replaced by the named view's (recursively
//!    expanded) text. A missing particle becomes empty text plus a warning.
//! 2. The first `@extends('parent')` makes the view a child. Its
//!    `@section('x') ... @endsection` blocks are captured (later duplicates
//!    win) and everything else in the child is dropped.
//! 3. The parent is resolved as a parent pass and each `@yield('x')` in it is
//!    replaced by the child's section `x`. A section the child lacks becomes
//!    empty text plus a warning naming the child and that parent, at every
//!    level. Yields a section body brings along are filled by the next child
//!    down. Leftover yields are stripped at the end unless the view itself is
//!    resolved as a parent pass.

use crate::error::{Result, ViewError};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

lazy_static! {
    static ref EXTENDS_RE: Regex =
        Regex::new(r"@extends\('([^']+)'\)").expect("extends pattern is valid");
    static ref YIELD_RE: Regex =
        Regex::new(r"@yield\('([^']+)'\)").expect("yield pattern is valid");
    static ref PARTICLE_RE: Regex =
        Regex::new(r"@particle\('([^']+)'\)").expect("particle pattern is valid");
    /// Non-greedy: each block ends at its own `@endsection`. One line break
    /// (with surrounding spaces/tabs) on either side of the body is dropped.
    static ref SECTION_RE: Regex = Regex::new(
        r"(?s)@section\('([^']+)'\)[ \t]*(?:\r?\n)?(.*?)(?:\r?\n)?[ \t]*@endsection"
    )
    .expect("section pattern is valid");
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Recoverable problem found while resolving a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Warning {
    MissingParticle {
        name: String,
        view: String,
    },
    MissingSection {
        name: String,
        view: String,
        parent: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MissingParticle { name, view } => {
                write!(f, "particle \"{}\" not found in \"{}\"", name, view)
            }
            Warning::MissingSection { name, view, parent } => write!(
                f,
                "section \"{}\" not found in \"{}\" for parent \"{}\"",
                name, view, parent
            ),
        }
    }
}

/// Fully flattened template text of one view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolved {
    pub name: String,
    pub content: String,
    pub warnings: Vec<Warning>,
}

/// Source of raw view text for the resolver.
pub trait ViewLoader {
    /// Location a logical name maps to, used in not-found errors.
    fn view_path(&self, name: &str) -> PathBuf;

    /// Raw text of a view, `None` when it does not exist.
    fn load_view(&self, name: &str) -> Result<Option<String>>;
}

/// Accumulator threaded through one resolution.
#[derive(Default)]
struct ResolveState {
    /// Views currently being resolved, outermost first.
    chain: Vec<String>,
    warnings: Vec<Warning>,
}

impl ResolveState {
    fn enter(&mut self, name: &str) -> Result<()> {
        if self.chain.iter().any(|n| n == name) {
            let mut chain = self.chain.clone();
            chain.push(name.to_string());
            return Err(ViewError::CyclicInclude { chain });
        }
        self.chain.push(name.to_string());
        Ok(())
    }

    fn leave(&mut self) {
        self.chain.pop();
    }

    fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve a stored view. With `is_parent_pass` leftover yields are kept.
pub fn resolve_view(loader: &dyn ViewLoader, name: &str, is_parent_pass: bool) -> Result<Resolved> {
    let mut state = ResolveState::default();
    let content = resolve_named(loader, name, &mut state)?;
    Ok(finish(name, content, is_parent_pass, state))
}

/// Resolve template text that does not come from the store; directives in it
/// still load views through `loader`.
pub fn resolve_text(loader: &dyn ViewLoader, label: &str, text: &str) -> Result<Resolved> {
    let mut state = ResolveState::default();
    state.enter(label)?;
    let content = resolve_contents(loader, label, text, &mut state)?;
    state.leave();
    Ok(finish(label, content, false, state))
}

fn finish(name: &str, content: String, is_parent_pass: bool, state: ResolveState) -> Resolved {
    let content = if is_parent_pass {
        content
    } else {
        YIELD_RE.replace_all(&content, "").into_owned()
    };
    Resolved {
        name: name.to_string(),
        content,
        warnings: state.warnings,
    }
}

fn resolve_named(loader: &dyn ViewLoader, name: &str, state: &mut ResolveState) -> Result<String> {
    state.enter(name)?;
    let raw = loader.load_view(name)?.ok_or_else(|| ViewError::ViewNotFound {
        name: name.to_string(),
        path: loader.view_path(name),
    })?;
    tracing::debug!(view = name, bytes = raw.len(), "loaded view");

    let content = resolve_contents(loader, name, &raw, state)?;
    state.leave();
    Ok(content)
}

fn resolve_contents(
    loader: &dyn ViewLoader,
    name: &str,
    raw: &str,
    state: &mut ResolveState,
) -> Result<String> {
    let expanded = expand_particles(loader, raw, name, state)?;
    let parent = EXTENDS_RE
        .captures(&expanded)
        .map(|caps| caps[1].to_string());
    let (body, sections) = extract_sections(&expanded);

    let Some(parent) = parent else {
        return Ok(body);
    };

    tracing::debug!(view = name, parent = %parent, "resolving parent view");
    let parent_content = resolve_named(loader, &parent, state)?;
    Ok(splice_yields(&parent_content, &sections, name, &parent, state))
}

/// Replace every `@particle('name')` with the named view's expanded text.
fn expand_particles(
    loader: &dyn ViewLoader,
    text: &str,
    view: &str,
    state: &mut ResolveState,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in PARTICLE_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();

        let particle = &caps[1];
        state.enter(particle)?;
        match loader.load_view(particle)? {
            Some(raw) => {
                tracing::debug!(view, particle, "expanding particle");
                out.push_str(&expand_particles(loader, &raw, particle, state)?);
            }
            None => state.warn(Warning::MissingParticle {
                name: particle.to_string(),
                view: view.to_string(),
            }),
        }
        state.leave();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Split out `@section` blocks, returning the remaining text and the sections.
fn extract_sections(text: &str) -> (String, IndexMap<String, String>) {
    let mut sections = IndexMap::new();
    let mut body = String::with_capacity(text.len());
    let mut last = 0;

    for caps in SECTION_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        body.push_str(&text[last..whole.start()]);
        last = whole.end();
        sections.insert(caps[1].to_string(), caps[2].to_string());
    }

    body.push_str(&text[last..]);
    (body, sections)
}

fn splice_yields(
    parent_content: &str,
    sections: &IndexMap<String, String>,
    view: &str,
    parent: &str,
    state: &mut ResolveState,
) -> String {
    let mut out = String::with_capacity(parent_content.len());
    let mut last = 0;

    for caps in YIELD_RE.captures_iter(parent_content) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&parent_content[last..whole.start()]);
        last = whole.end();

        let name = &caps[1];
        match sections.get(name) {
            Some(body) => out.push_str(body),
            None => state.warn(Warning::MissingSection {
                name: name.to_string(),
                view: view.to_string(),
                parent: parent.to_string(),
            }),
        }
    }

    out.push_str(&parent_content[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Views(HashMap<&'static str, &'static str>);

    impl ViewLoader for Views {
        fn view_path(&self, name: &str) -> PathBuf {
            PathBuf::from(format!("/views/{}.ejs", name))
        }

        fn load_view(&self, name: &str) -> Result<Option<String>> {
            Ok(self.0.get(name).map(|s| s.to_string()))
        }
    }

    fn views(entries: &[(&'static str, &'static str)]) -> Views {
        Views(entries.iter().copied().collect())
    }

    #[test]
    fn test_plain_view_is_unchanged() {
        let loader = views(&[("home", "Hello <%= name %>\n")]);
        let resolved = resolve_view(&loader, "home", false).unwrap();
        assert_eq!(resolved.content, "Hello <%= name %>\n");
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_missing_view_is_not_found() {
        let loader = views(&[]);
        let err = resolve_view(&loader, "nope", false).unwrap_err();
        match err {
            ViewError::ViewNotFound { name, path } => {
                assert_eq!(name, "nope");
                assert_eq!(path, PathBuf::from("/views/nope.ejs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_particles_expand_recursively() {
        let loader = views(&[
            ("page", "[@particle('header')]"),
            ("header", "<h1>@particle('title')</h1>"),
            ("title", "Site"),
        ]);
        let resolved = resolve_view(&loader, "page", false).unwrap();
        assert_eq!(resolved.content, "[<h1>Site</h1>]");
    }

    #[test]
    fn test_missing_particle_warns_and_continues() {
        let loader = views(&[("page", "a@particle('missing')b")]);
        let resolved = resolve_view(&loader, "page", false).unwrap();
        assert_eq!(resolved.content, "ab");
        assert_eq!(
            resolved.warnings,
            vec![Warning::MissingParticle {
                name: "missing".to_string(),
                view: "page".to_string(),
            }]
        );
    }

    #[test]
    fn test_section_spliced_into_parent_yield() {
        let loader = views(&[
            ("layout", "<main>@yield('body')</main>"),
            (
                "child",
                "@extends('layout')\n@section('body')\n<p>Hi</p>\n@endsection\n",
            ),
        ]);
        let resolved = resolve_view(&loader, "child", false).unwrap();
        assert_eq!(resolved.content, "<main><p>Hi</p></main>");
    }

    #[test]
    fn test_inline_section_body_is_trimmed() {
        let loader = views(&[
            ("B", "<body>@yield('body')</body>"),
            ("A", "@extends('B') @section('body') Hi, <%= name %>! @endsection"),
        ]);
        let resolved = resolve_view(&loader, "A", false).unwrap();
        assert_eq!(resolved.content, "<body>Hi, <%= name %>!</body>");
    }

    #[test]
    fn test_sibling_sections_match_their_own_end() {
        let text = "@section('a')\nA\n@endsection\nx\n@section('b')\nB\n@endsection\n@section('c')C@endsection";
        let (body, sections) = extract_sections(text);
        assert_eq!(sections.get("a").map(String::as_str), Some("A"));
        assert_eq!(sections.get("b").map(String::as_str), Some("B"));
        assert_eq!(sections.get("c").map(String::as_str), Some("C"));
        assert_eq!(body, "\nx\n\n");
    }

    #[test]
    fn test_duplicate_section_last_wins() {
        let (_, sections) = extract_sections("@section('x')1@endsection@section('x')2@endsection");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections["x"], "2");
    }

    #[test]
    fn test_missing_section_warns_and_strips() {
        let loader = views(&[
            ("layout", "[@yield('head')|@yield('body')]"),
            ("child", "@extends('layout')@section('body')B@endsection"),
        ]);
        let resolved = resolve_view(&loader, "child", false).unwrap();
        assert_eq!(resolved.content, "[|B]");
        assert_eq!(
            resolved.warnings,
            vec![Warning::MissingSection {
                name: "head".to_string(),
                view: "child".to_string(),
                parent: "layout".to_string(),
            }]
        );
    }

    #[test]
    fn test_parent_pass_keeps_unfilled_yields() {
        let loader = views(&[("layout", "<title>@yield('title')</title>")]);
        let resolved = resolve_view(&loader, "layout", true).unwrap();
        assert_eq!(resolved.content, "<title>@yield('title')</title>");

        let resolved = resolve_view(&loader, "layout", false).unwrap();
        assert_eq!(resolved.content, "<title></title>");
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn test_three_level_inheritance() {
        let loader = views(&[
            ("base", "<html>@yield('title')|@yield('content')</html>"),
            (
                "page",
                "@extends('base')@section('content')<div>@yield('main')</div>@endsection",
            ),
            (
                "home",
                "@extends('page')@section('title')Home@endsection@section('main')Welcome@endsection",
            ),
        ]);
        let resolved = resolve_view(&loader, "home", false).unwrap();
        assert_eq!(resolved.content, "<html>|<div>Welcome</div></html>");
        assert_eq!(
            resolved.warnings,
            vec![Warning::MissingSection {
                name: "title".to_string(),
                view: "page".to_string(),
                parent: "base".to_string(),
            }]
        );
    }

    #[test]
    fn test_middle_view_empties_yields_it_does_not_fill() {
        let loader = views(&[
            ("base", "<t>@yield('title')</t>"),
            ("page", "@extends('base')@section('x')X@endsection"),
            ("home", "@extends('page')@section('title')Home@endsection"),
        ]);
        let resolved = resolve_view(&loader, "home", false).unwrap();
        assert_eq!(resolved.content, "<t></t>");
        assert_eq!(
            resolved.warnings,
            vec![Warning::MissingSection {
                name: "title".to_string(),
                view: "page".to_string(),
                parent: "base".to_string(),
            }]
        );

        // Resolved as a parent itself, the middle view keeps nothing to fill.
        let resolved = resolve_view(&loader, "page", true).unwrap();
        assert_eq!(resolved.content, "<t></t>");
    }

    #[test]
    fn test_include_cycle_is_fatal() {
        let loader = views(&[("a", "@particle('b')"), ("b", "@particle('a')")]);
        let err = resolve_view(&loader, "a", false).unwrap_err();
        match err {
            ViewError::CyclicInclude { chain } => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }

        let loader = views(&[("a", "@extends('b')"), ("b", "@extends('a')")]);
        assert!(matches!(
            resolve_view(&loader, "a", false),
            Err(ViewError::CyclicInclude { .. })
        ));
    }

    #[test]
    fn test_resolve_text_uses_loader_for_directives() {
        let loader = views(&[("footer", "(c) 2024")]);
        let resolved = resolve_text(&loader, "inline", "body @particle('footer')").unwrap();
        assert_eq!(resolved.content, "body (c) 2024");
        assert_eq!(resolved.name, "inline");
    }

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let warning = Warning::MissingParticle {
            name: "nav".to_string(),
            view: "home".to_string(),
        };
        let json = serde_json::to_value(&warning).unwrap();
        assert_eq!(json["kind"], "missingParticle");
        assert_eq!(json["name"], "nav");
    }
}
