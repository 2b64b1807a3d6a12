//! HTML templates.
//!
//! Handlers write templates in a surface syntax (`{{.title}}`,
//! `{{describe .}}`) that [`rewrite`] turns into a canonical form built from
//! four functions: `get`, `nonempty`, `iterable` and `call`. The canonical
//! form is parsed and executed against the handler's data value, with
//! attribute reads and calls going through the interpreter thread.
//!
//! Output is HTML-escaped and `nil` renders as nothing. Renders are
//! serialized on the runtime's template lock.

mod exec;
mod lex;
mod parse;
mod rewrite;

use std::sync::Arc;

use relish_runtime::{InterpreterThread, Value};

use crate::error::WebError;

pub use parse::{parse, Node};
pub use rewrite::rewrite;

/// Renders surface-syntax `source` with `data` as `.` and `$`.
pub fn render(thread: &mut InterpreterThread, source: &str, data: Value) -> Result<String, WebError> {
    let nodes = parse(&rewrite(source)?)?;
    let runtime = Arc::clone(thread.runtime());
    let _guard = runtime.template_lock();
    exec::Executor::new(thread, data).run(&nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relish_runtime::{Manifest, Runtime, RuntimeConfig};

    const PAGE: &str = r#"{
        "types": [
            { "name": "site/Page", "attributes": [
                { "name": "title", "type": "String" },
                { "name": "tags", "type": "String", "collection": "List" },
                { "name": "parent", "type": "site/Page" } ] }
        ],
        "methods": [
            { "package": "site", "name": "shout",
              "params": [ { "name": "s", "type": "String" } ],
              "returns": ["String"],
              "body": { "concat": [ { "arg": 0 }, { "lit": "!" } ] } }
        ]
    }"#;

    fn page(tags: &[&str]) -> (Arc<Runtime>, InterpreterThread, Value) {
        let mut b = Runtime::builder(RuntimeConfig::in_memory());
        Manifest::from_json(PAGE).unwrap().install(&mut b).unwrap();
        let rt = b.build().unwrap();
        let mut t = rt.new_thread("site", "render");
        let obj = t.new_object("site/Page").unwrap();
        t.set_attr(&obj, "title", Value::str("Fish & <Chips>")).unwrap();
        let list = t.get_attr(&obj, "tags").unwrap();
        for tag in tags {
            t.call_by_name("push", vec![list.clone(), Value::str(tag)]).unwrap();
        }
        (rt, t, Value::Object(obj))
    }

    #[test]
    fn renders_fields_blocks_and_calls() {
        let (_rt, mut t, data) = page(&["salt", "vinegar"]);
        let src = "<h1>{{.title}}</h1>\
                   {{if .tags}}<ul>{{range .tags}}<li>{{shout .}}</li>{{end}}</ul>{{end}}\
                   {{with .parent}}{{.title}}{{else}}orphan{{end}}";
        insta::assert_snapshot!(
            render(&mut t, src, data).unwrap(),
            @"<h1>Fish &amp; &lt;Chips&gt;</h1><ul><li>salt!</li><li>vinegar!</li></ul>orphan"
        );
    }

    #[test]
    fn empty_collection_takes_else_branch() {
        let (_rt, mut t, data) = page(&[]);
        let out = render(&mut t, "{{range .tags}}x{{else}}none{{end}}|{{.parent.title}}|", data).unwrap();
        assert_eq!(out, "none||");
    }

    #[test]
    fn range_over_a_string_fails() {
        let (_rt, mut t, data) = page(&[]);
        assert!(matches!(
            render(&mut t, "{{range .title}}{{end}}", data),
            Err(WebError::Template(_))
        ));
    }

    #[test]
    fn unknown_method_is_a_runtime_error() {
        let (_rt, mut t, data) = page(&[]);
        assert!(matches!(
            render(&mut t, "{{nosuch .}}", data),
            Err(WebError::Runtime(_))
        ));
    }
}
