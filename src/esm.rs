//! ESM blocks (`import`/`export`) of MDX documents, parsed with
//! tree-sitter-javascript.
//!
//! Two questions are answered here:
//!
//! - [`is_complete`]: does a run of source lines form complete JavaScript?
//!   An ESM block may contain blank lines and only ends once it parses.
//! - [`extract_meta`]: the literal-valued properties of
//!   `export const|let|var meta = { … }`.
//!
//! ```text
//! export const meta = {
//!   title: "Getting started",
//!   order: 2,
//!   draft: false,
//! }
//! ```
//!
//! Only identifier keys with literal values (string, number, boolean, regex,
//! bigint) are captured. Anything else (calls, identifiers, template
//! literals, nested objects, spreads, methods) is dropped without error.

use serde_json::{Number, Value};
use tracing::debug;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::models::Metadata;

const EXPORT_NAME: &str = "meta";

fn parse(source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    let language: Language = tree_sitter_javascript::LANGUAGE.into();
    if let Err(err) = parser.set_language(&language) {
        debug!(error = ?err, "javascript grammar rejected");
        return None;
    }
    parser.parse(source, None)
}

/// True when `source` parses as JavaScript without error or missing nodes.
pub fn is_complete(source: &str) -> bool {
    parse(source).is_some_and(|tree| !tree.root_node().has_error())
}

/// Find `export const|let|var meta = { … }` in `source` and return its
/// literal-valued properties.
///
/// Returns `None` when no such export exists or its initializer is not a
/// well-formed object literal.
pub fn extract_meta(source: &str) -> Option<Metadata> {
    let tree = parse(source)?;
    let root = tree.root_node();
    let bytes = source.as_bytes();

    let mut cursor = root.walk();
    let object = root
        .named_children(&mut cursor)
        .filter(|node| node.kind() == "export_statement")
        .filter_map(|node| node.child_by_field_name("declaration"))
        .filter(|decl| matches!(decl.kind(), "lexical_declaration" | "variable_declaration"))
        .find_map(|decl| meta_initializer(decl, bytes))?;

    if object.has_error() {
        debug!("meta export is not a well-formed object literal");
        return None;
    }

    let mut meta = Metadata::new();
    let mut cursor = object.walk();
    for property in object.named_children(&mut cursor) {
        match property.kind() {
            "pair" => {
                if let Some((key, value)) = literal_pair(property, bytes) {
                    meta.insert(key, value);
                }
            }
            "comment" => {}
            other => debug!(kind = other, "dropping non-literal meta property"),
        }
    }
    Some(meta)
}

/// The object literal assigned to `meta` in one declaration, if any.
fn meta_initializer<'t>(declaration: Node<'t>, bytes: &[u8]) -> Option<Node<'t>> {
    let mut cursor = declaration.walk();
    let declarators: Vec<Node<'t>> = declaration
        .named_children(&mut cursor)
        .filter(|node| node.kind() == "variable_declarator")
        .collect();

    declarators.into_iter().find_map(|declarator| {
        let name = declarator.child_by_field_name("name")?;
        if name.kind() != "identifier" || name.utf8_text(bytes).ok()? != EXPORT_NAME {
            return None;
        }
        let value = declarator.child_by_field_name("value")?;
        if value.kind() == "object" {
            Some(value)
        } else {
            debug!(kind = value.kind(), "meta export is not an object literal");
            None
        }
    })
}

fn literal_pair(pair: Node<'_>, bytes: &[u8]) -> Option<(String, Value)> {
    let key = pair.child_by_field_name("key")?;
    let value = pair.child_by_field_name("value")?;
    let key_text = key.utf8_text(bytes).ok()?.to_string();

    if key.kind() != "property_identifier" {
        debug!(key = %key_text, "dropping meta property with non-identifier key");
        return None;
    }

    let text = value.utf8_text(bytes).ok()?;
    let literal = match value.kind() {
        "string" => Some(Value::String(string_value(value, bytes))),
        "number" => number_value(text),
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "regex" => Some(Value::String(text.to_string())),
        _ => None,
    };

    match literal {
        Some(literal) => Some((key_text, literal)),
        None => {
            debug!(key = %key_text, kind = value.kind(), "dropping non-literal meta value");
            None
        }
    }
}

fn string_value(node: Node<'_>, bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut cursor = node.walk();
    for part in node.named_children(&mut cursor) {
        let Ok(text) = part.utf8_text(bytes) else {
            continue;
        };
        match part.kind() {
            "string_fragment" => out.push_str(text),
            "escape_sequence" => unescape(text, &mut out),
            _ => {}
        }
    }
    out
}

/// Decode one escape sequence, backslash included.
fn unescape(sequence: &str, out: &mut String) {
    let body = sequence.strip_prefix('\\').unwrap_or(sequence);
    let hex = |digits: &str| u32::from_str_radix(digits, 16).ok().and_then(char::from_u32);

    let decoded = match body {
        "n" => Some('\n'),
        "t" => Some('\t'),
        "r" => Some('\r'),
        "b" => Some('\u{8}'),
        "f" => Some('\u{c}'),
        "v" => Some('\u{b}'),
        "0" => Some('\0'),
        // line continuation
        "\n" | "\r\n" | "\r" => return,
        _ => {
            if let Some(digits) = body.strip_prefix("u{").and_then(|b| b.strip_suffix('}')) {
                hex(digits)
            } else if let Some(digits) = body.strip_prefix('u').or_else(|| body.strip_prefix('x')) {
                hex(digits)
            } else {
                None
            }
        }
    };

    match decoded {
        Some(c) => out.push(c),
        None => out.push_str(body),
    }
}

/// JSON value of a numeric literal. Bigints become decimal strings.
fn number_value(text: &str) -> Option<Value> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, bigint) = match cleaned.strip_suffix('n') {
        Some(digits) => (digits, true),
        None => (cleaned.as_str(), false),
    };

    let radix = match digits.get(..2) {
        Some("0x") | Some("0X") => 16,
        Some("0o") | Some("0O") => 8,
        Some("0b") | Some("0B") => 2,
        _ => 10,
    };
    if radix != 10 {
        let parsed = u64::from_str_radix(&digits[2..], radix).ok()?;
        return Some(if bigint {
            Value::String(parsed.to_string())
        } else {
            Value::Number(Number::from(parsed))
        });
    }

    if bigint {
        return Some(Value::String(digits.to_string()));
    }
    if let Ok(int) = digits.parse::<i64>() {
        return Some(Value::Number(Number::from(int)));
    }
    digits
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_literals() {
        let src = r#"export const meta = {
  title: "Getting started",
  order: 2,
  weight: 1.5,
  mask: 0xff,
  draft: false,
  pattern: /^a[/]b$/gi,
  big: 12345678901234567890n,
}"#;
        let meta = extract_meta(src).unwrap();
        assert_eq!(
            serde_json::Value::Object(meta),
            json!({
                "title": "Getting started",
                "order": 2,
                "weight": 1.5,
                "mask": 255,
                "draft": false,
                "pattern": "/^a[/]b$/gi",
                "big": "12345678901234567890",
            })
        );
    }

    #[test]
    fn test_drops_non_literals() {
        let src = r#"import { x } from './x'
export const meta = {
  title: 'Kept',
  computed: x.y,
  call: fn(1, { a: 2 }),
  tpl: `hi ${x}`,
  nested: { deep: true },
  list: [1, 2],
  sum: 1 + 2,
  nothing: null,
  shorthand,
  ...spread,
  method() { return 1 },
  "quoted": "skipped",
  last: "also kept"
}"#;
        let meta = extract_meta(src).unwrap();
        let mut keys: Vec<&str> = meta.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["last", "title"]);
        assert_eq!(meta["title"], json!("Kept"));
        assert_eq!(meta["last"], json!("also kept"));
    }

    #[test]
    fn test_other_exports_are_ignored() {
        assert!(extract_meta("export const other = { a: 1 }").is_none());
        assert!(extract_meta("export default function Layout() {}").is_none());
        assert!(extract_meta("import Foo from './foo'").is_none());
    }

    #[test]
    fn test_non_object_initializer() {
        assert!(extract_meta("export const meta = makeMeta()").is_none());
    }

    #[test]
    fn test_finds_meta_in_later_declaration() {
        let src = "export const layout = 'docs'\nexport let meta = { a: \"b\" }\nexport var other = 1";
        let meta = extract_meta(src).unwrap();
        assert_eq!(meta["a"], json!("b"));
    }

    #[test]
    fn test_string_escapes_and_comments() {
        let src = "export const meta = {\n  // comment, with comma\n  title: 'It\\'s \\u{1F600}\\n', /* trailing */\n}";
        let meta = extract_meta(src).unwrap();
        assert_eq!(meta["title"], json!("It's \u{1F600}\n"));
    }

    #[test]
    fn test_malformed_object_is_lenient() {
        assert!(extract_meta("export const meta = { title: 'x'").is_none());
    }

    #[test]
    fn test_jsx_in_esm_is_understood() {
        let src = "export const Note = ({ children }) => <aside>{children}</aside>\n\nexport const meta = { title: 'With JSX' }\n";
        assert!(is_complete(src));
        assert_eq!(extract_meta(src).unwrap()["title"], json!("With JSX"));
    }

    #[test]
    fn test_completeness() {
        assert!(is_complete("import { A } from './a'\n"));
        assert!(is_complete("export const meta = {\n  title: 'A',\n\n  order: 1,\n}\n"));
        assert!(!is_complete("export const meta = {\n  title: 'A',\n"));
        assert!(!is_complete("export is just a word in this sentence.\n"));
    }
}
