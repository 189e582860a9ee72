//! Helpers for the rich-text document format carried in message `content`.
//!
//! Documents are editor JSON trees: every node is an object with a `type`,
//! text leaves carry `text`, and containers carry a `content` array.

use serde_json::{json, Value};

/// Block-level node types that end a line when flattened to plain text.
const BLOCK_NODES: &[&str] = &[
    "paragraph",
    "heading",
    "blockquote",
    "codeBlock",
    "listItem",
    "hardBreak",
];

/// Returns `true` when `content` looks like a rich-text node.
pub fn is_document(content: &Value) -> bool {
    content
        .as_object()
        .is_some_and(|node| node.get("type").is_some_and(Value::is_string))
}

/// Flatten a document to plain text, one line per block node.
pub fn extract_text(content: &Value) -> String {
    let mut out = String::new();
    collect_text(content, &mut out);
    out.trim_end().to_string()
}

fn collect_text(node: &Value, out: &mut String) {
    match node {
        Value::String(s) => out.push_str(s),
        Value::Array(nodes) => nodes.iter().for_each(|n| collect_text(n, out)),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
            if let Some(children) = map.get("content") {
                collect_text(children, out);
            }
            let is_block = map
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| BLOCK_NODES.contains(&t));
            if is_block && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        _ => {}
    }
}

/// Wrap plain text into a document, one paragraph per line.
pub fn plain_text_to_document(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .lines()
        .map(|line| {
            if line.is_empty() {
                json!({ "type": "paragraph" })
            } else {
                json!({
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": line }],
                })
            }
        })
        .collect();

    json!({ "type": "doc", "content": paragraphs })
}
