//! Template compiler and evaluator.
//!
//! Grammar of one variable:
//!
//! ```text
//! { section.field ( ::modifier )? ( ::locale )? ( ["true text"||"false text"] )? }
//! ```
//!
//! Branch texts are themselves templates and may nest variables up to
//! [`MAX_DEPTH`] levels; deeper branches stay literal. Anything that does
//! not parse as a variable is kept as text.

use super::modifiers::{evaluate_condition, transform, Modifier};
use super::value::{ParseValue, Section};

/// Maximum nesting of variables inside branch texts.
pub const MAX_DEPTH: usize = 8;

const REMOVE_LINE: &str = "{tools.removeLine}";
const NEW_LINE: &str = "{tools.newLine}";

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Field(Section, &'static str),
    UnknownSection,
    UnknownField,
}

#[derive(Debug, Clone, PartialEq)]
struct Variable {
    target: Target,
    /// Modifier as written, and parsed.
    modifier: Option<(String, Modifier)>,
    locale: Option<String>,
    branches: Option<(Branch, Branch)>,
}

/// One side of `["T"||"F"]`: the compiled nodes plus the text as written.
#[derive(Debug, Clone, PartialEq)]
struct Branch {
    nodes: Vec<Node>,
    raw: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(Box<Variable>),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
    uses_debug: bool,
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn scan_ident(src: &str, from: usize) -> usize {
    let bytes = src.as_bytes();
    let mut end = from;
    while end < bytes.len() && is_ident(bytes[end]) {
        end += 1;
    }
    end
}

/// Read a modifier token starting at `from`; parentheses may hold quoted text.
fn scan_modifier(src: &str, from: usize) -> usize {
    let bytes = src.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                let mut quote: Option<u8> = None;
                i += 1;
                while i < bytes.len() {
                    match (quote, bytes[i]) {
                        (None, b')') => break,
                        (None, q @ (b'\'' | b'"')) => quote = Some(q),
                        (Some(q), c) if c == q => quote = None,
                        _ => {}
                    }
                    i += 1;
                }
                i += 1;
            }
            b'[' | b'}' => break,
            b':' if src[i..].starts_with("::") => break,
            _ => i += 1,
        }
    }
    i.min(bytes.len())
}

/// Read a `"..."` branch at `from`; quotes only close at brace depth zero.
/// Returns the content range end and the index after the closing quote.
fn scan_branch(src: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = src.as_bytes();
    if bytes.get(from) != Some(&b'"') {
        return None;
    }
    let mut depth = 0usize;
    let mut i = from + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'"' if depth == 0 => return Some((i, i + 1)),
            _ => {}
        }
        i += 1;
    }
    None
}

struct Compiler {
    uses_debug: bool,
}

impl Compiler {
    fn nodes(&mut self, src: &str, depth: usize) -> Vec<Node> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut i = 0;

        while i < src.len() {
            if src.as_bytes()[i] == b'{' {
                if let Some((node, consumed)) = self.variable(&src[i..], depth) {
                    if !text.is_empty() {
                        nodes.push(Node::Text(std::mem::take(&mut text)));
                    }
                    nodes.push(node);
                    i += consumed;
                    continue;
                }
            }
            let Some(ch) = src[i..].chars().next() else {
                break;
            };
            text.push(ch);
            i += ch.len_utf8();
        }

        if !text.is_empty() {
            nodes.push(Node::Text(text));
        }
        nodes
    }

    /// Parse one `{...}` at the start of `src`.
    fn variable(&mut self, src: &str, depth: usize) -> Option<(Node, usize)> {
        let bytes = src.as_bytes();

        let section_end = scan_ident(src, 1);
        if section_end == 1 || bytes.get(section_end) != Some(&b'.') {
            return None;
        }
        let field_start = section_end + 1;
        let field_end = scan_ident(src, field_start);
        if field_end == field_start {
            return None;
        }
        let section = &src[1..section_end];
        let field = &src[field_start..field_end];

        let mut p = field_end;
        let mut tokens: Vec<&str> = Vec::new();
        while src[p..].starts_with("::") {
            let start = p + 2;
            p = scan_modifier(src, start);
            if p == start || tokens.len() == 2 {
                return None;
            }
            tokens.push(&src[start..p]);
        }

        let mut branches = None;
        if bytes.get(p) == Some(&b'[') {
            let (true_end, after_true) = scan_branch(src, p + 1)?;
            if !src[after_true..].starts_with("||") {
                return None;
            }
            let (false_end, after_false) = scan_branch(src, after_true + 2)?;
            if bytes.get(after_false) != Some(&b']') {
                return None;
            }
            branches = Some((&src[p + 2..true_end], &src[after_true + 3..false_end]));
            p = after_false + 1;
        }

        if bytes.get(p) != Some(&b'}') {
            return None;
        }
        let consumed = p + 1;
        let raw = &src[..consumed];

        if section == "tools" {
            return Some((Node::Text(raw.to_string()), consumed));
        }

        let target = match Section::parse(section) {
            None => Target::UnknownSection,
            Some(s) => match s.field(field) {
                Some(f) => {
                    if s == Section::Debug {
                        self.uses_debug = true;
                    }
                    Target::Field(s, f)
                }
                None => Target::UnknownField,
            },
        };

        let branches = branches.map(|(t, f)| (self.branch(t, depth), self.branch(f, depth)));

        let variable = Variable {
            target,
            modifier: tokens.first().map(|m| ((*m).to_string(), Modifier::parse(m))),
            locale: tokens.get(1).map(|l| (*l).to_string()),
            branches,
        };
        Some((Node::Var(Box::new(variable)), consumed))
    }

    /// Branches past [`MAX_DEPTH`] stay literal.
    fn branch(&mut self, src: &str, depth: usize) -> Branch {
        let nodes = if depth + 1 >= MAX_DEPTH {
            vec![Node::Text(src.to_string())]
        } else {
            self.nodes(src, depth + 1)
        };
        Branch {
            nodes,
            raw: src.to_string(),
        }
    }
}

fn render_nodes(nodes: &[Node], value: &ParseValue, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(var) => render_variable(var, value, out),
        }
    }
}

fn render_variable(var: &Variable, value: &ParseValue, out: &mut String) {
    let (section, field) = match var.target {
        Target::Field(section, field) => (section, field),
        Target::UnknownSection => return out.push_str("{unknown_variableName}"),
        Target::UnknownField => return out.push_str("{unknown_propertyName}"),
    };
    let field_value = value.get(section, field);

    match (&var.modifier, &var.branches) {
        (None, _) => out.push_str(&field_value.render()),
        (Some((_, modifier)), Some((when_true, when_false))) if modifier.is_conditional() => {
            let branch = if evaluate_condition(field_value, modifier) {
                when_true
            } else {
                when_false
            };
            // An empty expansion falls back to the branch as written.
            let mut expanded = String::new();
            render_nodes(&branch.nodes, value, &mut expanded);
            if expanded.is_empty() {
                out.push_str(&branch.raw);
            } else {
                out.push_str(&expanded);
            }
        }
        (Some((raw, modifier)), None) if modifier.is_conditional() => {
            out.push_str(&format!("{{unknown_conditional_modifier({raw})}}"));
        }
        (Some((raw, modifier)), _) => {
            out.push_str(&transform(field_value, modifier, raw, var.locale.as_deref()));
        }
    }
}

/// Expand literal `\n`, drop blank and `{tools.removeLine}` lines, then
/// expand `{tools.newLine}`.
#[must_use]
pub fn post_process(text: &str) -> String {
    let text = text.replace("\\n", "\n");
    text.lines()
        .filter(|line| !line.trim().is_empty() && !line.contains(REMOVE_LINE))
        .collect::<Vec<_>>()
        .join("\n")
        .replace(NEW_LINE, "\n")
}

impl Template {
    #[must_use]
    pub fn compile(source: &str) -> Self {
        let mut compiler = Compiler { uses_debug: false };
        let nodes = compiler.nodes(source, 0);
        Self {
            nodes,
            uses_debug: compiler.uses_debug,
        }
    }

    /// Whether the template reads the debug section.
    #[must_use]
    pub fn uses_debug(&self) -> bool {
        self.uses_debug
    }

    /// Evaluate and post-process.
    #[must_use]
    pub fn render(&self, value: &ParseValue) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, value, &mut out);
        post_process(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguagePreferences;
    use crate::formatter::FormatContext;
    use crate::models::{Addon, ParsedFile, ParsedStream, ServiceInfo, StreamType};
    use std::sync::Arc;

    fn value(with_debug: bool) -> ParseValue {
        let addon = Arc::new(Addon::new("tio", "Torrentio", "https://t.example/manifest.json"));
        let mut stream = ParsedStream::new("tio.0", addon, StreamType::Debrid);
        stream.seeders = Some(0);
        stream.size = Some(2_000_000_000);
        stream.service = Some(ServiceInfo { id: "realdebrid".into(), cached: false });
        stream.parsed_file = Some(ParsedFile {
            resolution: Some("1080p".into()),
            quality: Some("WEB-DL".into()),
            visual_tags: vec!["HDR".into(), "DV".into()],
            ..ParsedFile::default()
        });
        let context = FormatContext {
            addon_name: "StreamFed".into(),
            languages: LanguagePreferences::default(),
        };
        ParseValue::build(&stream, &context, with_debug)
    }

    fn render(src: &str) -> String {
        Template::compile(src).render(&value(false))
    }

    #[test]
    fn plain_fields_and_unknowns() {
        assert_eq!(render("{stream.resolution}"), "1080p");
        assert_eq!(render("{stream.doesnotexist}"), "{unknown_propertyName}");
        assert_eq!(render("{nope.resolution}"), "{unknown_variableName}");
        assert_eq!(render("Just text, no tokens"), "Just text, no tokens");
    }

    #[test]
    fn exists_branches() {
        assert_eq!(render(r#"{stream.seeders::exists["yes"||"no"]}"#), "yes");
        assert_eq!(render(r#"{stream.indexer::exists["yes"||"no"]}"#), "no");
    }

    #[test]
    fn nested_branches_expand() {
        let src = r#"{service.shortName::exists["[{service.shortName}{service.cached::istrue["+"||" download"]}]"||""]}"#;
        assert_eq!(render(src), "[RD download]");
    }

    #[test]
    fn empty_branch_expansion_falls_back_to_raw_text() {
        assert_eq!(
            render(r#"{stream.seeders::exists["{stream.indexer}"||"no"]}"#),
            "{stream.indexer}"
        );
        assert_eq!(
            render(r#"{stream.indexer::exists["yes"||"{stream.indexer::upper}"]}"#),
            "{stream.indexer::upper}"
        );
        // Non-empty expansions and empty branches are unaffected.
        assert_eq!(render(r#"{stream.seeders::exists["{stream.resolution}"||"no"]}"#), "1080p");
        assert_eq!(render(r#"{stream.indexer::exists["yes"||""]}"#), "");
    }

    #[test]
    fn modifiers_and_locale() {
        assert_eq!(render("{stream.size::bytes}"), "2 GB");
        assert_eq!(render("{stream.visualTags::join(' | ')}"), "HDR | DV");
        assert_eq!(render("{stream.size::comma::de}"), "2.000.000.000");
        assert_eq!(render("{stream.quality::shout}"), "{unknown_modifier(shout)}");
        assert_eq!(render("{stream.quality::exists}"), "{unknown_conditional_modifier(exists)}");
        assert_eq!(render("{stream.indexer::upper}"), "");
    }

    #[test]
    fn malformed_tokens_stay_literal() {
        assert_eq!(render("{stream.resolution"), "{stream.resolution");
        assert_eq!(render("{ not a var }"), "{ not a var }");
        assert_eq!(render(r#"{stream.seeders::exists["a"]}"#), r#"{stream.seeders::exists["a"]}"#);
    }

    #[test]
    fn post_processing_order() {
        assert_eq!(post_process("a\\nb"), "a\nb");
        assert_eq!(post_process("a\n\n   \nb"), "a\nb");
        assert_eq!(post_process("keep\ndrop {tools.removeLine}\nend"), "keep\nend");
        assert_eq!(post_process("x{tools.newLine}y"), "x\ny");
        assert_eq!(post_process("x{tools.newLine}{tools.newLine}y"), "x\n\ny");
    }

    #[test]
    fn remove_line_driven_by_condition() {
        let src = "{stream.resolution}\n{stream.indexer::exists[\"{stream.indexer}\"||\"{tools.removeLine}\"]}none";
        assert_eq!(render(src), "1080p");
    }

    #[test]
    fn debug_section_is_tracked() {
        let template = Template::compile("{debug.json}");
        assert!(template.uses_debug());
        let out = template.render(&value(true));
        assert!(out.contains("\"resolution\":\"1080p\""));
        assert!(!Template::compile("{stream.resolution}").uses_debug());
    }

    #[test]
    fn depth_is_bounded() {
        let mut src = String::from("x");
        for _ in 0..(MAX_DEPTH + 2) {
            src = format!("{{stream.resolution::exists[\"{src}\"||\"\"]}}");
        }
        let out = render(&src);
        assert!(out.starts_with("{stream.resolution::exists[\""));
        assert!(out.ends_with("\"||\"\"]}"));
    }
}
