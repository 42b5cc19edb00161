//! Render Tests for the view compiler
//!
//! End-to-end checks through `ViewCompiler::render`:
//! - tag modes, escaping and newline trimming
//! - layout inheritance, particles and their warnings
//! - fatal error classes (not found, unmatched tag, compile, runtime, cycles)

#[cfg(test)]
mod tests {
    use crate::compiler::{Rendered, ViewCompiler};
    use crate::config::ViewConfig;
    use crate::error::ViewError;
    use crate::layout::Warning;
    use crate::store::MemoryViewStore;
    use crate::value::Value;
    use serde_json::json;
    use std::sync::Arc;

    fn compiler_with(config: ViewConfig, views: &[(&str, &str)]) -> ViewCompiler {
        let store = views
            .iter()
            .fold(MemoryViewStore::new(), |store, (name, text)| store.with_view(*name, *text));
        ViewCompiler::with_store(config, Arc::new(store))
    }

    fn compiler(views: &[(&str, &str)]) -> ViewCompiler {
        compiler_with(ViewConfig::new("/views"), views)
    }

    fn render(text: &str, data: serde_json::Value) -> Rendered {
        compiler(&[]).render_source("inline", text, &data).unwrap()
    }

    fn output(text: &str, data: serde_json::Value) -> String {
        render(text, data).output
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // TAG MODES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_text_without_tags_is_unchanged() {
        let text = "Line one\n\t\"quoted\" \\ back\\slash\r\n  trailing  \n";
        assert_eq!(output(text, json!({})), text);
        assert_eq!(output("", json!({})), "");
    }

    #[test]
    fn test_escaped_versus_raw_output() {
        let out = output("<%= html %>|<%- html %>", json!({"html": "<b>&'\"</b>"}));
        assert_eq!(out, "&lt;b&gt;&amp;&#39;&#34;&lt;/b&gt;|<b>&'\"</b>");
    }

    #[test]
    fn test_nullish_output_is_empty() {
        let out = output("[<%= nothing %>][<%- nothing %>][<%= 0 %>]", json!({"nothing": null}));
        assert_eq!(out, "[][][0]");
    }

    #[test]
    fn test_trailing_semicolon_in_output_tag() {
        assert_eq!(output("<%= name; %>", json!({"name": "Ann"})), "Ann");
    }

    #[test]
    fn test_comment_tag_is_discarded() {
        assert_eq!(output("a<%# note %>b", json!({})), "ab");
        assert_eq!(output("a<%# <b>\"quoted\"</b> -%>\nb", json!({})), "ab");
    }

    #[test]
    fn test_literal_tags() {
        assert_eq!(output("<%% if (x) { %%>", json!({})), "<% if (x) { %>");
        assert_eq!(output("<%% raw %>", json!({})), "<% raw %>");
        assert_eq!(output("100%%> sure", json!({})), "100%> sure");
    }

    #[test]
    fn test_eval_blocks_drive_loops() {
        let text = "<ul><% for (const item of items) { %><li><%= item %></li><% } %></ul>";
        let out = output(text, json!({"items": ["a", "<b>"]}));
        assert_eq!(out, "<ul><li>a</li><li>&lt;b&gt;</li></ul>");
    }

    #[test]
    fn test_line_comment_in_eval_does_not_swallow_output() {
        assert_eq!(output("<% // setup %>ok", json!({})), "ok");
        assert_eq!(output("<% var n = 2 // two %><%= n %>", json!({})), "2");
    }

    #[test]
    fn test_js_number_and_array_formatting() {
        assert_eq!(output("<%= 1.5 + 1.5 %> <%= 0.1 * 3 %>", json!({})), "3 0.30000000000000004");
        assert_eq!(output("<%= list %>", json!({"list": [1, 2, 3]})), "1,2,3");
        assert_eq!(output("<%= obj %>", json!({"obj": {"a": 1}})), "[object Object]");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // NEWLINE TRIMMING
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_trim_close_removes_one_line_break() {
        let text = "<% if (show) { -%>\nyes\n<% } -%>\nend";
        assert_eq!(output(text, json!({"show": true})), "yes\nend");
        assert_eq!(output(text, json!({"show": false})), "end");
    }

    #[test]
    fn test_slurp_close_matches_trim_close() {
        let text = "<% if (show) { _%>\nyes\n<% } _%>\nend";
        assert_eq!(output(text, json!({"show": true})), "yes\nend");
    }

    #[test]
    fn test_plain_close_keeps_line_breaks() {
        let text = "<% if (show) { %>\nyes\n<% } %>\nend";
        assert_eq!(output(text, json!({"show": true})), "\nyes\n\nend");
    }

    #[test]
    fn test_trim_removes_exactly_one_break() {
        assert_eq!(output("<% var x = 1 -%>\n\nafter", json!({})), "\nafter");
        assert_eq!(output("<% var x = 1 -%>\r\n\r\nafter", json!({})), "\r\nafter");
        assert_eq!(output("<% var x = 1 -%>  \nafter", json!({})), "  \nafter");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // LAYOUTS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_section_spliced_at_yield() {
        let compiler = compiler(&[
            ("B", "<html><body>@yield('body')</body></html>"),
            ("A", "@extends('B') @section('body') Hi, <%= name %>! @endsection"),
        ]);
        let rendered = compiler.render("A", &json!({"name": "Sam"})).unwrap();
        assert_eq!(rendered.output, "<html><body>Hi, Sam!</body></html>");
        assert!(rendered.warnings.is_empty());
    }

    #[test]
    fn test_sibling_sections_fill_their_own_yields() {
        let compiler = compiler(&[
            ("layout", "<h>@yield('a')</h><m>@yield('b')</m><f>@yield('c')</f>"),
            (
                "page",
                "@extends('layout')\n\
                 @section('a')\nA\n@endsection\n\
                 @section('b')\nB\n@endsection\n\
                 @section('c')\nC\n@endsection\n",
            ),
        ]);
        let rendered = compiler.render("page", &json!({})).unwrap();
        assert_eq!(rendered.output, "<h>A</h><m>B</m><f>C</f>");
    }

    #[test]
    fn test_missing_section_warns() {
        let compiler = compiler(&[
            ("layout", "<title>@yield('title')</title>@yield('body')"),
            ("page", "@extends('layout')@section('body')main@endsection"),
        ]);
        let rendered = compiler.render("page", &json!({})).unwrap();
        assert_eq!(rendered.output, "<title></title>main");
        assert_eq!(
            rendered.warnings,
            vec![Warning::MissingSection {
                name: "title".to_string(),
                view: "page".to_string(),
                parent: "layout".to_string(),
            }]
        );
    }

    #[test]
    fn test_layout_sees_caller_data() {
        let compiler = compiler(&[
            ("layout", "<title><%= title %></title>@yield('body')"),
            ("page", "@extends('layout')@section('body')<%= body %>@endsection"),
        ]);
        let rendered = compiler
            .render("page", &json!({"title": "T", "body": "B"}))
            .unwrap();
        assert_eq!(rendered.output, "<title>T</title>B");
    }

    #[test]
    fn test_particle_in_section_is_expanded() {
        let compiler = compiler(&[
            ("layout", "<main>@yield('body')</main>"),
            ("nav", "<nav><%= user %></nav>"),
            ("page", "@extends('layout')@section('body')@particle('nav')!@endsection"),
        ]);
        let rendered = compiler.render("page", &json!({"user": "kim"})).unwrap();
        assert_eq!(rendered.output, "<main><nav>kim</nav>!</main>");
    }

    #[test]
    fn test_missing_particle_does_not_abort() {
        let rendered = render("a@particle('nope')<%= 1 + 1 %>", json!({}));
        assert_eq!(rendered.output, "a2");
        assert_eq!(
            rendered.warnings,
            vec![Warning::MissingParticle {
                name: "nope".to_string(),
                view: "inline".to_string(),
            }]
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FATAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_unmatched_open_tag() {
        let err = compiler(&[])
            .render_source("inline", "before <% if (x) { after", &json!({}))
            .unwrap_err();
        match err {
            ViewError::UnmatchedTag { tag } => assert_eq!(tag, "<%"),
            other => panic!("unexpected error: {other}"),
        }

        let err = compiler(&[])
            .render_source("inline", "<%= a <%= b %>", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ViewError::UnmatchedTag { ref tag } if tag == "<%="));
    }

    #[test]
    fn test_missing_view() {
        let err = compiler(&[]).render("ghost", &json!({})).unwrap_err();
        assert!(matches!(err, ViewError::ViewNotFound { ref name, .. } if name == "ghost"));
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let compiler = compiler(&[("page", "@extends('gone')")]);
        let err = compiler.render("page", &json!({})).unwrap_err();
        assert!(matches!(err, ViewError::ViewNotFound { ref name, .. } if name == "gone"));
    }

    #[test]
    fn test_unbalanced_code_is_compile_error() {
        let err = compiler(&[])
            .render_source("inline", "<% if (x) { %>never closed", &json!({"x": true}))
            .unwrap_err();
        assert!(matches!(err, ViewError::Compile { .. }));
    }

    #[test]
    fn test_undefined_name_is_runtime_error() {
        let err = compiler(&[])
            .render_source("inline", "<%= nothing.here %>", &json!({}))
            .unwrap_err();
        match err {
            ViewError::Runtime { view, message } => {
                assert_eq!(view, "inline");
                assert!(message.contains("nothing is not defined"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_extending_view_is_cycle() {
        let compiler = compiler(&[("loop", "@extends('loop')")]);
        let err = compiler.render("loop", &json!({})).unwrap_err();
        assert!(matches!(err, ViewError::CyclicInclude { .. }));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONTEXT PRECEDENCE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_helpers_and_data_precedence() {
        let config = ViewConfig::new("/views")
            .with_helper("title", |_: &[Value]| Ok(Value::from("from helper")))
            .with_helper("wrap", |args: &[Value]| {
                let inner = args.first().map(|v| v.to_js_string()).unwrap_or_default();
                Ok(Value::from(format!("[{}]", inner)))
            });
        let compiler = compiler_with(config, &[("v", "<%= title %> <%- wrap(n) %>")]);
        let rendered = compiler
            .render("v", &json!({"title": "from data", "n": 7}))
            .unwrap();
        assert_eq!(rendered.output, "from data [7]");
    }

    #[test]
    fn test_helper_can_replace_escape_function() {
        let config = ViewConfig::new("/views").with_helper("escapeFunction", |args: &[Value]| {
            Ok(Value::from(format!(
                "<{}>",
                args.first().map(|v| v.to_js_string()).unwrap_or_default()
            )))
        });
        let compiler = compiler_with(config, &[("v", "<%= 'x' %>")]);
        assert_eq!(compiler.render("v", &json!({})).unwrap().output, "<x>");
    }

    #[test]
    fn test_helper_error_is_runtime_error() {
        let config = ViewConfig::new("/views")
            .with_helper("fail", |_: &[Value]| Err("helper failed".to_string()));
        let compiler = compiler_with(config, &[("v", "<%= fail() %>")]);
        let err = compiler.render("v", &json!({})).unwrap_err();
        assert!(matches!(err, ViewError::Runtime { ref message, .. } if message.contains("helper failed")));
    }

    #[test]
    fn test_concurrent_renders_share_compiler() {
        let compiler = compiler(&[
            ("layout", "<p>@yield('body')</p>"),
            ("page", "@extends('layout')@section('body')<%= n * 2 %>@endsection"),
        ]);
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|n| {
                    let compiler = &compiler;
                    scope.spawn(move || compiler.render("page", &json!({"n": n})).map(|r| r.output))
                })
                .collect();
            for (n, handle) in handles.into_iter().enumerate() {
                let out = handle.join().unwrap().unwrap();
                assert_eq!(out, format!("<p>{}</p>", n * 2));
            }
        });
    }
}
