//! Relative location paths evaluated against a parsed XML document
//!
//! Schema paths are a subset of XPath 1.0 location paths. Every schema path is
//! evaluated as `./{path}` relative to a context element, so `title`,
//! `./title`, `.//p` and `@lang` all work as expected.
//!
//! Supported syntax:
//! - name tests (namespace prefixes are ignored), `*`, `.`, `..`
//! - `//` (descendant-or-self)
//! - `@name`, `@*`, `text()`, `node()`
//! - predicates `[n]`, `[last()]`, `[@a]`, `[@a='v']`, `[child]`,
//!   `[child='v']`, `[text()='v']`, `[.='v']`

use roxmltree::Node;
use std::fmt;
use thiserror::Error;

/// A path that failed to parse
#[derive(Debug, Clone, Error)]
#[error("invalid path `{path}`: {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Axis {
    Child,
    SelfNode,
    Parent,
    Attribute,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Wildcard,
    Text,
    AnyNode,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Position(usize),
    Last,
    Attribute { name: String, value: Option<String> },
    Child { name: String, value: Option<String> },
    Text(String),
    SelfValue(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    /// Step was preceded by `//`
    descendants: bool,
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// One item selected by a path
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Match<'a, 'input: 'a> {
    Node(Node<'a, 'input>),
    Attribute {
        owner: Node<'a, 'input>,
        name: &'a str,
        value: &'a str,
    },
}

impl<'a, 'input: 'a> Match<'a, 'input> {
    /// XPath string-value: concatenated descendant text for nodes, the value for attributes
    pub fn string_value(&self) -> String {
        match self {
            Match::Node(node) => string_value(*node),
            Match::Attribute { value, .. } => (*value).to_string(),
        }
    }

    /// Sort key for document order: attributes follow their owner element
    /// and precede its children
    fn document_position(&self) -> (usize, usize) {
        match self {
            Match::Node(node) => (node.id().get_usize(), 0),
            Match::Attribute { owner, name, .. } => {
                let index = owner
                    .attributes()
                    .position(|a| a.name() == *name)
                    .unwrap_or_default();
                (owner.id().get_usize(), index + 1)
            }
        }
    }
}

fn string_value(node: Node<'_, '_>) -> String {
    if node.is_text() {
        return node.text().unwrap_or_default().to_string();
    }
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// A compiled relative path
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    steps: Vec<Step>,
}

impl XPath {
    /// Compile a schema path. The path is read as `./{path}`.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let expr = format!("./{}", path.trim());
        let steps = PathParser::new(&expr).parse().map_err(|reason| PathError {
            path: path.to_string(),
            reason,
        })?;
        Ok(XPath {
            source: path.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Select everything this path reaches from `context`, in document order
    pub fn select<'a, 'input>(&self, context: Node<'a, 'input>) -> Vec<Match<'a, 'input>> {
        let mut current = vec![Match::Node(context)];

        for step in &self.steps {
            let mut next: Vec<Match<'a, 'input>> = Vec::new();
            for item in &current {
                // attributes have no children to step into
                let Match::Node(node) = item else {
                    continue;
                };
                let origins: Vec<Node<'a, 'input>> = if step.descendants {
                    node.descendants().collect()
                } else {
                    vec![*node]
                };
                for origin in origins {
                    next.extend(step.apply(origin));
                }
            }
            next.sort_by_key(Match::document_position);
            next.dedup();
            current = next;
        }

        current
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Step {
    fn apply<'a, 'input>(&self, origin: Node<'a, 'input>) -> Vec<Match<'a, 'input>> {
        let mut candidates: Vec<Match<'a, 'input>> = match self.axis {
            Axis::Child => origin
                .children()
                .filter(|c| self.test.matches(*c))
                .map(Match::Node)
                .collect(),
            Axis::SelfNode => {
                if self.test.matches(origin) {
                    vec![Match::Node(origin)]
                } else {
                    Vec::new()
                }
            }
            Axis::Parent => origin
                .parent()
                .filter(|p| self.test.matches(*p))
                .map(Match::Node)
                .into_iter()
                .collect(),
            Axis::Attribute => origin
                .attributes()
                .filter(|a| match &self.test {
                    NodeTest::Name(name) => a.name() == name,
                    _ => true,
                })
                .map(|a| Match::Attribute {
                    owner: origin,
                    name: a.name(),
                    value: a.value(),
                })
                .collect(),
        };

        for predicate in &self.predicates {
            candidates = predicate.filter(candidates);
        }
        candidates
    }
}

impl NodeTest {
    fn matches(&self, node: Node<'_, '_>) -> bool {
        match self {
            NodeTest::Name(name) => node.is_element() && node.tag_name().name() == name,
            NodeTest::Wildcard => node.is_element(),
            NodeTest::Text => node.is_text(),
            NodeTest::AnyNode => true,
        }
    }
}

impl Predicate {
    fn filter<'a, 'input>(&self, candidates: Vec<Match<'a, 'input>>) -> Vec<Match<'a, 'input>> {
        match self {
            Predicate::Position(n) => candidates.into_iter().nth(n - 1).into_iter().collect(),
            Predicate::Last => candidates.into_iter().last().into_iter().collect(),
            _ => candidates.into_iter().filter(|m| self.holds(m)).collect(),
        }
    }

    fn holds(&self, item: &Match<'_, '_>) -> bool {
        let Match::Node(node) = item else {
            return false;
        };
        match self {
            Predicate::Attribute { name, value } => node.attributes().any(|a| {
                a.name() == name && value.as_deref().map_or(true, |v| a.value() == v)
            }),
            Predicate::Child { name, value } => node.children().any(|c| {
                c.is_element()
                    && c.tag_name().name() == name
                    && value.as_deref().map_or(true, |v| string_value(c) == v)
            }),
            Predicate::Text(v) => node
                .children()
                .any(|c| c.is_text() && c.text() == Some(v.as_str())),
            Predicate::SelfValue(v) => string_value(*node) == *v,
            Predicate::Position(_) | Predicate::Last => true,
        }
    }
}

struct PathParser {
    chars: Vec<char>,
    pos: usize,
}

impl PathParser {
    fn new(expr: &str) -> Self {
        PathParser {
            chars: expr.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse(mut self) -> Result<Vec<Step>, String> {
        let mut steps = Vec::new();
        let mut descendants = false;

        loop {
            steps.push(self.parse_step(descendants)?);

            if self.peek().is_none() {
                break;
            }
            if !self.eat('/') {
                return Err(format!("unexpected `{}` at offset {}", self.chars[self.pos], self.pos));
            }
            descendants = self.eat('/');
            if self.peek().is_none() {
                return Err("path ends with `/`".to_string());
            }
        }

        Ok(steps)
    }

    fn parse_step(&mut self, descendants: bool) -> Result<Step, String> {
        let (axis, test) = match self.peek() {
            Some('.') if self.peek_at(1) == Some('.') => {
                self.pos += 2;
                (Axis::Parent, NodeTest::AnyNode)
            }
            Some('.') => {
                self.pos += 1;
                (Axis::SelfNode, NodeTest::AnyNode)
            }
            Some('@') => {
                self.pos += 1;
                if self.eat('*') {
                    (Axis::Attribute, NodeTest::Wildcard)
                } else {
                    let name = self.parse_name()?;
                    (Axis::Attribute, NodeTest::Name(name))
                }
            }
            Some('*') => {
                self.pos += 1;
                (Axis::Child, NodeTest::Wildcard)
            }
            Some(_) => {
                let name = self.parse_name()?;
                if self.eat('(') {
                    if !self.eat(')') {
                        return Err(format!("function `{name}` takes no arguments"));
                    }
                    match name.as_str() {
                        "text" => (Axis::Child, NodeTest::Text),
                        "node" => (Axis::Child, NodeTest::AnyNode),
                        other => return Err(format!("unsupported function `{other}()`")),
                    }
                } else {
                    (Axis::Child, NodeTest::Name(name))
                }
            }
            None => return Err("empty step".to_string()),
        };

        let mut predicates = Vec::new();
        while self.eat('[') {
            let body = self.take_predicate_body()?;
            predicates.push(parse_predicate(body.trim())?);
        }

        Ok(Step {
            descendants,
            axis,
            test,
            predicates,
        })
    }

    /// Read an element or attribute name, dropping any namespace prefix
    fn parse_name(&mut self) -> Result<String, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        if raw.is_empty() {
            return Err(format!("expected a name at offset {start}"));
        }
        if raw.contains("::") {
            return Err(format!("axis syntax `{raw}` is not supported"));
        }
        Ok(local_name(&raw).to_string())
    }

    /// Consume up to the matching `]`, honouring quoted literals
    fn take_predicate_body(&mut self) -> Result<String, String> {
        let mut body = String::new();
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '\'' || c == '"' => quote = Some(c),
                None if c == ']' => return Ok(body),
                None => {}
            }
            body.push(c);
        }
        Err("unterminated predicate".to_string())
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn parse_predicate(body: &str) -> Result<Predicate, String> {
    if body.is_empty() {
        return Err("empty predicate".to_string());
    }
    if body.chars().all(|c| c.is_ascii_digit()) {
        let n: usize = body.parse().map_err(|_| format!("bad position `{body}`"))?;
        if n == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(n));
    }
    if body == "last()" {
        return Ok(Predicate::Last);
    }

    let (lhs, value) = match body.split_once('=') {
        Some((lhs, rhs)) => (lhs.trim(), Some(parse_literal(rhs.trim())?)),
        None => (body, None),
    };

    if let Some(attr) = lhs.strip_prefix('@') {
        return Ok(Predicate::Attribute {
            name: local_name(attr).to_string(),
            value,
        });
    }
    match (lhs, value) {
        ("text()", Some(v)) => Ok(Predicate::Text(v)),
        (".", Some(v)) => Ok(Predicate::SelfValue(v)),
        ("text()", None) | (".", None) => Err(format!("predicate `{body}` needs a comparison")),
        (name, value)
            if !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')) =>
        {
            Ok(Predicate::Child {
                name: local_name(name).to_string(),
                value,
            })
        }
        _ => Err(format!("unsupported predicate `{body}`")),
    }
}

fn parse_literal(raw: &str) -> Result<String, String> {
    let mut chars = raw.chars();
    match (chars.next(), raw.chars().last()) {
        (Some(open), Some(close)) if raw.len() >= 2 && (open == '\'' || open == '"') && open == close => {
            Ok(raw[1..raw.len() - 1].to_string())
        }
        _ => Err(format!("expected a quoted literal, found `{raw}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<patent lang="en">
        <id>42</id>
        <parties>
            <inventor seq="1"><name>Ada</name></inventor>
            <inventor seq="2"><name>Grace</name></inventor>
        </parties>
        <claims><claim num="1">first <b>bold</b> claim</claim></claims>
    </patent>"#;

    fn texts(path: &str, doc: &roxmltree::Document) -> Vec<String> {
        XPath::parse(path)
            .unwrap()
            .select(doc.root_element())
            .iter()
            .map(|m| m.string_value())
            .collect()
    }

    #[test]
    fn test_child_steps() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert_eq!(texts("id", &doc), vec!["42"]);
        assert_eq!(texts("./parties/inventor/name", &doc), vec!["Ada", "Grace"]);
        assert!(texts("missing", &doc).is_empty());
    }

    #[test]
    fn test_descendants_and_attributes() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert_eq!(texts(".//name", &doc), vec!["Ada", "Grace"]);
        assert_eq!(texts("@lang", &doc), vec!["en"]);
        assert_eq!(texts("parties/inventor/@seq", &doc), vec!["1", "2"]);
        assert_eq!(texts("claims/claim", &doc), vec!["first bold claim"]);
    }

    #[test]
    fn test_nested_descendants_in_document_order() {
        let doc = roxmltree::Document::parse(
            r#"<claim id="C1"><claim-text>a<claim-text>b</claim-text></claim-text><claim-text>c</claim-text></claim>"#,
        )
        .unwrap();
        assert_eq!(texts(".//claim-text/text()", &doc), vec!["a", "b", "c"]);
        assert_eq!(texts(".//claim-text", &doc), vec!["ab", "b", "c"]);
        assert_eq!(texts(".//@id", &doc), vec!["C1"]);
    }

    #[test]
    fn test_attributes_precede_children() {
        let doc = roxmltree::Document::parse(r#"<r b="2" a="1"><c a="3"/></r>"#).unwrap();
        assert_eq!(texts(".//@*", &doc), vec!["2", "1", "3"]);
    }

    #[test]
    fn test_predicates() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert_eq!(texts("parties/inventor[2]/name", &doc), vec!["Grace"]);
        assert_eq!(texts("parties/inventor[last()]/name", &doc), vec!["Grace"]);
        assert_eq!(texts("parties/inventor[@seq='1']/name", &doc), vec!["Ada"]);
        assert_eq!(texts("parties/inventor[name=\"Grace\"]/@seq", &doc), vec!["2"]);
        assert_eq!(texts("claims/claim[@num]/b", &doc), vec!["bold"]);
    }

    #[test]
    fn test_self_and_parent() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert_eq!(texts("./id", &doc), vec!["42"]);
        assert_eq!(texts("parties/inventor/..", &doc).len(), 1);
    }

    #[test]
    fn test_namespace_prefix_ignored() {
        let doc = roxmltree::Document::parse(
            r#"<r xmlns:m="http://www.w3.org/1998/Math/MathML"><m:math>x</m:math></r>"#,
        )
        .unwrap();
        assert_eq!(texts("m:math", &doc), vec!["x"]);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(XPath::parse("a/").is_err());
        assert!(XPath::parse("a[").is_err());
        assert!(XPath::parse("a[0]").is_err());
        assert!(XPath::parse("count(a)").is_err());
        assert!(XPath::parse("child::a").is_err());
        assert!(XPath::parse("a[@b=c]").is_err());
    }
}
