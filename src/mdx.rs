//! MDX/Markdown processing for search indexing.
//!
//! [`process_mdx`] turns raw document text into a [`ParsedDocument`]:
//!
//! 1. A SHA-256 checksum of the raw bytes (base64), for change detection.
//! 2. A flat list of top-level [`Node`]s. ESM blocks (`import`/`export`) and
//!    flow expressions (`{…}` on their own lines) are recognized line by line;
//!    an ESM block runs until its JavaScript is complete, blank lines
//!    included. Everything else is parsed with `pulldown-cmark`. A JSX/HTML
//!    element becomes one [`Node::JsxFlow`] together with all of its
//!    children, up to the matching closing tag.
//! 3. The `meta` export, if any (see [`crate::esm`]).
//! 4. A content-only tree: ESM, JSX and expression nodes are dropped, inline
//!    JSX elements (with their children) and `{…}` text expressions are cut
//!    out of prose.
//! 5. Consecutive runs of nodes, a new run starting at every heading.
//! 6. One [`Section`] per run with normalized text, heading label and a
//!    document-scoped slug.

use std::ops::Range;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pulldown_cmark::{Event, Options, Parser, Tag};
use sha2::{Digest, Sha256};

use crate::esm;
use crate::models::{ParsedDocument, Section};
use crate::slug::Slugger;

/// A top-level block of an MDX document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// `import`/`export` statements.
    Esm(String),
    /// A block-level JSX or HTML element, children included.
    JsxFlow(String),
    /// A `{…}` expression on its own lines.
    FlowExpression(String),
    Heading {
        level: usize,
        /// Plain-text label, markup and expressions removed.
        label: String,
        /// Normalized ATX markdown for the heading line.
        markdown: String,
    },
    /// Any other markdown block (paragraph, list, code, quote, table, rule).
    Prose(String),
}

impl Node {
    fn is_content(&self) -> bool {
        matches!(self, Node::Heading { .. } | Node::Prose(_))
    }

    fn is_heading(&self) -> bool {
        matches!(self, Node::Heading { .. })
    }

    fn markdown(&self) -> &str {
        match self {
            Node::Esm(s) | Node::JsxFlow(s) | Node::FlowExpression(s) | Node::Prose(s) => s,
            Node::Heading { markdown, .. } => markdown,
        }
    }
}

/// Process one document's raw content for search indexing.
pub fn process_mdx(content: &str) -> ParsedDocument {
    let checksum = checksum(content);
    let nodes = parse_nodes(content);

    let meta = nodes.iter().find_map(|node| match node {
        Node::Esm(source) => esm::extract_meta(source),
        _ => None,
    });

    let sections = match content_tree(nodes) {
        Some(tree) => build_sections(split_at_headings(tree)),
        None => Vec::new(),
    };

    ParsedDocument {
        checksum,
        meta,
        sections,
    }
}

/// Base64-encoded SHA-256 of the raw content.
pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Drop every non-content node. `None` when nothing is left.
fn content_tree(nodes: Vec<Node>) -> Option<Vec<Node>> {
    let tree: Vec<Node> = nodes.into_iter().filter(Node::is_content).collect();
    if tree.is_empty() {
        None
    } else {
        Some(tree)
    }
}

/// Group nodes into runs; each heading starts a new run and belongs to it.
fn split_at_headings(nodes: Vec<Node>) -> Vec<Vec<Node>> {
    nodes.into_iter().fold(Vec::new(), |mut runs: Vec<Vec<Node>>, node| {
        match runs.last_mut() {
            Some(run) if !node.is_heading() => run.push(node),
            _ => runs.push(vec![node]),
        }
        runs
    })
}

fn build_sections(runs: Vec<Vec<Node>>) -> Vec<Section> {
    let mut slugger = Slugger::new();
    runs.into_iter()
        .map(|run| {
            let heading = match run.first() {
                Some(Node::Heading { label, .. }) => Some(label.clone()),
                _ => None,
            };
            let slug = heading.as_deref().map(|h| slugger.slug(h));
            let mut content = run
                .iter()
                .map(Node::markdown)
                .collect::<Vec<_>>()
                .join("\n\n");
            content.push('\n');
            Section {
                content,
                heading,
                slug,
            }
        })
        .collect()
}

// ============ Block recognition ============

enum Segment {
    Markdown(Range<usize>),
    Esm(Range<usize>),
    Expression(Range<usize>),
}

/// Parse `content` into top-level nodes, in document order.
pub fn parse_nodes(content: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    for segment in segment_lines(content) {
        match segment {
            Segment::Esm(range) => nodes.push(Node::Esm(content[range].trim_end().to_string())),
            Segment::Expression(range) => {
                nodes.push(Node::FlowExpression(content[range].trim_end().to_string()))
            }
            Segment::Markdown(range) => parse_markdown(content, range, &mut nodes),
        }
    }
    group_jsx_elements(nodes)
}

/// Split the document into markdown, ESM and flow-expression segments.
///
/// ESM and flow expressions only start at the beginning of a block (first
/// line, or after a blank line) and never inside fenced code.
fn segment_lines(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut markdown_start = 0;
    let mut pos = 0;
    let mut block_start = true;
    let mut fence: Option<(u8, usize)> = None;

    while pos < content.len() {
        let line_end = content[pos..]
            .find('\n')
            .map(|i| pos + i + 1)
            .unwrap_or(content.len());
        let line = &content[pos..line_end];

        if let Some((ch, len)) = fence {
            if closes_fence(line, ch, len) {
                fence = None;
            }
            block_start = false;
            pos = line_end;
            continue;
        }

        if let Some(open) = opens_fence(line) {
            fence = Some(open);
            block_start = false;
            pos = line_end;
            continue;
        }

        if block_start && (line.starts_with("import ") || line.starts_with("export ")) {
            let end = esm_end(content, pos);
            push_markdown(&mut segments, markdown_start..pos);
            segments.push(Segment::Esm(pos..end));
            markdown_start = end;
            pos = end;
            block_start = true;
            continue;
        }

        if block_start && line.starts_with('{') {
            if let Some(end) = flow_expression_end(content, pos) {
                push_markdown(&mut segments, markdown_start..pos);
                segments.push(Segment::Expression(pos..end));
                markdown_start = end;
                pos = end;
                block_start = true;
                continue;
            }
        }

        block_start = line.trim().is_empty();
        pos = line_end;
    }

    push_markdown(&mut segments, markdown_start..content.len());
    segments
}

fn push_markdown(segments: &mut Vec<Segment>, range: Range<usize>) {
    if !range.is_empty() {
        segments.push(Segment::Markdown(range));
    }
}

/// End offset (exclusive) of the block starting at `start`: the first blank
/// line or the end of input.
fn block_end(content: &str, start: usize) -> usize {
    let mut pos = start;
    while pos < content.len() {
        let line_end = content[pos..]
            .find('\n')
            .map(|i| pos + i + 1)
            .unwrap_or(content.len());
        if content[pos..line_end].trim().is_empty() {
            return pos;
        }
        pos = line_end;
    }
    content.len()
}

/// End offset of the ESM block starting at `start`.
///
/// A blank line only ends the block once the source before it is complete
/// JavaScript. A block that never completes ends at its first blank line.
fn esm_end(content: &str, start: usize) -> usize {
    let first = block_end(content, start);
    let mut end = first;
    loop {
        if esm::is_complete(&content[start..end]) {
            return end;
        }
        let next = skip_blank_lines(content, end);
        if next >= content.len() {
            return first;
        }
        end = block_end(content, next);
    }
}

fn skip_blank_lines(content: &str, start: usize) -> usize {
    let mut pos = start;
    while pos < content.len() {
        let line_end = content[pos..]
            .find('\n')
            .map(|i| pos + i + 1)
            .unwrap_or(content.len());
        if !content[pos..line_end].trim().is_empty() {
            return pos;
        }
        pos = line_end;
    }
    content.len()
}

/// If a balanced `{…}` starts at `start` and only whitespace follows it on
/// its closing line, return the end of that line.
fn flow_expression_end(content: &str, start: usize) -> Option<usize> {
    let close = matching_brace(content.as_bytes(), start)?;
    let line_end = content[close..]
        .find('\n')
        .map(|i| close + i + 1)
        .unwrap_or(content.len());
    if content[close + 1..line_end].trim().is_empty() {
        Some(line_end)
    } else {
        None
    }
}

/// Index of the `}` matching the `{` at `open`.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn opens_fence(line: &str) -> Option<(u8, usize)> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let ch = *trimmed.as_bytes().first()?;
    if ch != b'`' && ch != b'~' {
        return None;
    }
    let len = trimmed.bytes().take_while(|&b| b == ch).count();
    if len < 3 {
        return None;
    }
    if ch == b'`' && trimmed[len..].contains('`') {
        return None;
    }
    Some((ch, len))
}

fn closes_fence(line: &str, ch: u8, len: usize) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let run = trimmed.bytes().take_while(|&b| b == ch).count();
    run >= len && trimmed[run..].trim().is_empty()
}

// ============ JSX elements ============

enum JsxTag {
    Open(String),
    Close(String),
}

/// Opening and closing JSX/HTML tags in `text`, in order. Self-closing tags
/// and comments are skipped; `<>` and `</>` are fragments with an empty name.
fn jsx_tags(text: &str) -> Vec<JsxTag> {
    let bytes = text.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        if text[i..].starts_with("<!--") {
            i = text[i..].find("-->").map(|e| i + e + 3).unwrap_or(bytes.len());
            continue;
        }

        let closing = bytes.get(i + 1) == Some(&b'/');
        let name_start = if closing { i + 2 } else { i + 1 };
        let name_len = bytes[name_start.min(bytes.len())..]
            .iter()
            .take_while(|&&b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b':' | b'-' | b'_'))
            .count();
        let name_end = name_start + name_len;
        let is_tag = match bytes.get(name_start) {
            Some(&b) if b.is_ascii_alphabetic() => true,
            Some(&b'>') => true,
            _ => false,
        };
        if !is_tag {
            i += 1;
            continue;
        }

        let Some(end) = tag_end(bytes, name_end) else {
            break;
        };
        let name = text[name_start..name_end].to_string();
        if closing {
            tags.push(JsxTag::Close(name));
        } else if bytes[end - 1] != b'/' {
            tags.push(JsxTag::Open(name));
        }
        i = end + 1;
    }
    tags
}

/// Index of the `>` closing a tag, skipping quoted and `{…}` attribute values.
fn tag_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut quote = None;
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                b'>' if depth == 0 => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Apply the tags in `text` to a stack of open element names.
fn track_jsx(text: &str, open: &mut Vec<String>) {
    for tag in jsx_tags(text) {
        match tag {
            JsxTag::Open(name) => open.push(name),
            JsxTag::Close(name) => {
                if let Some(i) = open.iter().rposition(|n| *n == name) {
                    open.truncate(i);
                }
            }
        }
    }
}

/// Index of the node that closes every element opened by `nodes[start]`.
fn element_end(nodes: &[Node], start: usize) -> Option<usize> {
    let Node::JsxFlow(text) = &nodes[start] else {
        return None;
    };
    let mut open = Vec::new();
    track_jsx(text, &mut open);
    if open.is_empty() {
        return None;
    }
    for (offset, node) in nodes[start + 1..].iter().enumerate() {
        if let Node::JsxFlow(text) = node {
            track_jsx(text, &mut open);
            if open.is_empty() {
                return Some(start + 1 + offset);
            }
        }
    }
    None
}

/// Fold every JSX element and the nodes between its opening and closing
/// tags into a single [`Node::JsxFlow`]. An element that is never closed
/// keeps only its own tag.
fn group_jsx_elements(nodes: Vec<Node>) -> Vec<Node> {
    let mut grouped = Vec::with_capacity(nodes.len());
    let mut i = 0;
    while i < nodes.len() {
        let end = element_end(&nodes, i).unwrap_or(i);
        let node = if end > i {
            let text = nodes[i..=end]
                .iter()
                .map(Node::markdown)
                .collect::<Vec<_>>()
                .join("\n\n");
            Node::JsxFlow(text)
        } else {
            nodes[i].clone()
        };
        match node {
            Node::JsxFlow(text) if text.trim().is_empty() => {}
            Node::JsxFlow(text) => grouped.push(Node::JsxFlow(text.trim_end().to_string())),
            other => grouped.push(other),
        }
        i = end + 1;
    }
    grouped
}

// ============ Markdown blocks ============

enum BlockKind {
    Heading(usize),
    Code,
    Other,
}

/// A top-level markdown block being assembled from parser events.
struct Block {
    kind: BlockKind,
    range: Range<usize>,
    /// Inline JSX/HTML to cut out of the block text.
    removals: Vec<Range<usize>>,
    /// Inline elements opened but not yet closed: name and opening tag.
    open: Vec<(String, Range<usize>)>,
    /// Code spans and nested code blocks, never scanned for expressions.
    protected: Vec<Range<usize>>,
    label: String,
}

impl Block {
    /// Heading text outside any inline JSX element.
    fn in_label(&self) -> bool {
        matches!(self.kind, BlockKind::Heading(_)) && self.open.is_empty()
    }

    /// Record an inline tag. A closing tag removes its whole element.
    fn inline_html(&mut self, html: &str, range: Range<usize>) {
        match jsx_tags(html).into_iter().next() {
            Some(JsxTag::Open(name)) => self.open.push((name, range)),
            Some(JsxTag::Close(name)) => {
                match self.open.iter().rposition(|(n, _)| *n == name) {
                    Some(i) => {
                        let start = self.open[i].1.start;
                        self.open.truncate(i);
                        self.removals.push(start..range.end);
                    }
                    None => self.removals.push(range),
                }
            }
            None => self.removals.push(range),
        }
    }
}

fn parse_markdown(content: &str, segment: Range<usize>, nodes: &mut Vec<Node>) {
    let offset = segment.start;
    let source = &content[segment];
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut depth = 0usize;
    let mut block: Option<Block> = None;
    let mut html_end: Option<usize> = None;

    for (event, range) in Parser::new_ext(source, options).into_offset_iter() {
        let range = range.start + offset..range.end + offset;
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    let kind = match &tag {
                        Tag::Heading(level, _, _) => BlockKind::Heading(*level as usize),
                        Tag::CodeBlock(_) => BlockKind::Code,
                        _ => BlockKind::Other,
                    };
                    block = Some(Block {
                        kind,
                        range: range.clone(),
                        removals: Vec::new(),
                        open: Vec::new(),
                        protected: Vec::new(),
                        label: String::new(),
                    });
                } else if let (Tag::CodeBlock(_), Some(b)) = (&tag, block.as_mut()) {
                    b.protected.push(range.clone());
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(b) = block.take() {
                        if let Some(node) = finish_block(content, b) {
                            nodes.push(node);
                        }
                    }
                }
            }
            Event::Html(html) if depth == 0 => {
                // Lines of one HTML block arrive as separate events.
                match nodes.last_mut() {
                    Some(Node::JsxFlow(text)) if html_end == Some(range.start) => {
                        text.push_str(&html)
                    }
                    _ => nodes.push(Node::JsxFlow(String::from(&*html))),
                }
                html_end = Some(range.end);
            }
            Event::Rule if depth == 0 => {
                nodes.push(Node::Prose(content[range].trim().to_string()));
            }
            Event::Html(html) => {
                if let Some(b) = block.as_mut() {
                    b.inline_html(&html, range);
                }
            }
            Event::Code(code) => {
                if let Some(b) = block.as_mut() {
                    b.protected.push(range);
                    if b.in_label() {
                        b.label.push_str(&code);
                    }
                }
            }
            Event::Text(text) => {
                if let Some(b) = block.as_mut() {
                    if b.in_label() {
                        b.label.push_str(&strip_expressions(&text));
                    }
                }
            }
            _ => {}
        }
    }
}

fn finish_block(content: &str, mut block: Block) -> Option<Node> {
    // Unclosed inline elements lose only their opening tag.
    block
        .removals
        .extend(block.open.drain(..).map(|(_, range)| range));

    let raw = &content[block.range.clone()];
    let text = match block.kind {
        BlockKind::Code => raw.to_string(),
        _ => clean_block(content, &block),
    };
    let text = text.trim_end().trim_start_matches(['\n', '\r']).to_string();

    match block.kind {
        BlockKind::Heading(level) => {
            let label = block.label.split_whitespace().collect::<Vec<_>>().join(" ");
            let markdown = if text.trim_start().starts_with('#') {
                text.trim().to_string()
            } else {
                format!("{} {}", "#".repeat(level), label)
            };
            Some(Node::Heading {
                level,
                label,
                markdown,
            })
        }
        _ if text.trim().is_empty() => None,
        _ => Some(Node::Prose(text)),
    }
}

/// Block text with inline JSX and `{…}` text expressions removed.
fn clean_block(content: &str, block: &Block) -> String {
    let bytes = content.as_bytes();
    let covered = |i: usize| {
        block
            .protected
            .iter()
            .chain(block.removals.iter())
            .any(|r| r.contains(&i))
    };

    let mut removals = block.removals.clone();
    let mut i = block.range.start;
    while i < block.range.end {
        if bytes[i] == b'{' && !covered(i) && !(i > 0 && bytes[i - 1] == b'\\') {
            if let Some(close) = matching_brace(&bytes[..block.range.end], i) {
                removals.push(i..close + 1);
                i = close + 1;
                continue;
            }
        }
        i += 1;
    }

    removals.sort_by_key(|r| r.start);
    let mut out = String::with_capacity(block.range.len());
    let mut cursor = block.range.start;
    let mut removed = false;
    for r in removals {
        if r.start > cursor {
            push_kept(&mut out, &content[cursor..r.start], removed);
        }
        removed = true;
        cursor = cursor.max(r.end);
    }
    if cursor < block.range.end {
        push_kept(&mut out, &content[cursor..block.range.end], removed);
    }
    out
}

/// Append kept text. After a removed span, the whitespace on both sides of
/// the gap collapses to a single separator.
fn push_kept(out: &mut String, text: &str, after_removal: bool) {
    if !after_removal {
        out.push_str(text);
        return;
    }
    let mut text = text;
    if out.is_empty() || out.ends_with([' ', '\t', '\n']) {
        text = text.trim_start_matches([' ', '\t']);
    }
    if text.is_empty() || text.starts_with(['\n', '\r']) {
        let kept = out.trim_end_matches([' ', '\t']).len();
        out.truncate(kept);
        if out.ends_with('\n') {
            text = text
                .strip_prefix("\r\n")
                .or_else(|| text.strip_prefix('\n'))
                .unwrap_or(text);
        }
    }
    out.push_str(text);
}

/// Remove balanced `{…}` expressions from plain text.
fn strip_expressions(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = matching_brace(bytes, i) {
                out.push_str(&text[cursor..i]);
                cursor = close + 1;
                i = close + 1;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&text[cursor..]);
    out
}
