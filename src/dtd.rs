//! Document preparation in front of the XML parser
//!
//! Bulk archives reference external DTDs by relative SYSTEM id, and their text
//! uses named entities that are only declared in those DTDs (or in the `.ent`
//! files the DTDs pull in). The parser does not load external DTDs, so the
//! resolver maps the SYSTEM id onto a local directory, collects the entity
//! declarations once per DTD and expands references before parsing.
//!
//! A few MathML entities are used by the corpora without being declared
//! anywhere; those are replaced by private-use code points first.

use crate::error::DocumentError;
use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Entities the corpora use without declaring them
const UNDECLARED_ENTITIES: [(&str, &str); 5] = [
    ("&IndentingNewLine;", "&#xF3A3;"),
    ("&LeftBracketingBar;", "&#xF603;"),
    ("&RightBracketingBar;", "&#xF604;"),
    ("&LeftDoubleBracketingBar;", "&#xF605;"),
    ("&RightDoubleBracketingBar;", "&#xF606;"),
];

const PREDEFINED_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// Nesting limit when entity values reference other entities
const MAX_EXPANSION_DEPTH: usize = 8;

static DOCTYPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<!DOCTYPE\s+([^\s\[>]+)(?:\s+(?:SYSTEM\s+(?:"([^"]*)"|'([^']*)')|PUBLIC\s+(?:"[^"]*"|'[^']*')\s+(?:"([^"]*)"|'([^']*)')))?"#,
    )
    .unwrap()
});

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static GENERAL_ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<!ENTITY\s+([^\s%][^\s]*)\s+(?:"([^"]*)"|'([^']*)')\s*>"#).unwrap()
});

static PARAMETER_ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<!ENTITY\s+%\s*([^\s]+)\s+(?:PUBLIC\s+(?:"[^"]*"|'[^']*')\s*|SYSTEM\s+)(?:"([^"]*)"|'([^']*)')\s*>"#,
    )
    .unwrap()
});

static PARAMETER_REF_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"%([\w.:-]+);").unwrap());

static ELEMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<!ELEMENT\s+([^\s%(]+)").unwrap());

/// Spans whose content is literal: CDATA sections and comments
static LITERAL_SPAN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[.*?\]\]>|<!--.*?-->").unwrap());

static ENTITY_REF_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"&([A-Za-z_][\w.:-]*);").unwrap());

/// Replace the known-undeclared MathML entities with private-use characters
pub fn substitute_undeclared_entities(text: &str) -> Cow<'_, str> {
    if !UNDECLARED_ENTITIES.iter().any(|(name, _)| text.contains(name)) {
        return Cow::Borrowed(text);
    }
    let mut out = text.to_string();
    for (name, replacement) in UNDECLARED_ENTITIES {
        out = out.replace(name, replacement);
    }
    Cow::Owned(out)
}

/// `<!DOCTYPE name SYSTEM "id">` of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocType {
    pub name: String,
    pub system_id: Option<String>,
}

impl DocType {
    pub fn find(text: &str) -> Option<Self> {
        let caps = DOCTYPE_REGEX.captures(text)?;
        let system_id = [2, 3, 4, 5]
            .iter()
            .find_map(|&i| caps.get(i))
            .map(|m| m.as_str().to_string());
        Some(DocType {
            name: caps[1].to_string(),
            system_id,
        })
    }
}

/// Declarations collected from a DTD and everything it includes
#[derive(Debug, Default)]
pub struct Dtd {
    entities: HashMap<String, String>,
    elements: HashSet<String>,
}

impl Dtd {
    /// Load a DTD file, following external parameter entities it references
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let mut dtd = Dtd::default();
        let mut visited = HashSet::new();
        dtd.absorb_file(path, &mut visited)?;
        Ok(dtd)
    }

    /// Parse DTD text without following includes
    pub fn parse(text: &str) -> Self {
        let mut dtd = Dtd::default();
        dtd.absorb(text, None, &mut HashSet::new());
        dtd
    }

    fn absorb_file(&mut self, path: &Path, visited: &mut HashSet<PathBuf>) -> std::io::Result<()> {
        if !visited.insert(path.to_path_buf()) {
            return Ok(());
        }
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        self.absorb(&text, path.parent(), visited);
        Ok(())
    }

    fn absorb(&mut self, text: &str, base_dir: Option<&Path>, visited: &mut HashSet<PathBuf>) {
        let text = COMMENT_REGEX.replace_all(text, "");

        // the first declaration of an entity is binding
        for caps in GENERAL_ENTITY_REGEX.captures_iter(&text) {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            self.entities
                .entry(caps[1].to_string())
                .or_insert_with(|| value.to_string());
        }

        for caps in ELEMENT_REGEX.captures_iter(&text) {
            self.elements.insert(local_name(&caps[1]).to_string());
        }

        let Some(base_dir) = base_dir else {
            return;
        };
        let includes: HashMap<String, String> = PARAMETER_ENTITY_REGEX
            .captures_iter(&text)
            .filter_map(|caps| {
                let system_id = caps.get(2).or_else(|| caps.get(3))?;
                Some((caps[1].to_string(), system_id.as_str().to_string()))
            })
            .collect();
        for caps in PARAMETER_REF_REGEX.captures_iter(&text) {
            let Some(system_id) = includes.get(&caps[1]) else {
                continue;
            };
            let included = base_dir.join(file_component(system_id));
            if let Err(e) = self.absorb_file(&included, visited) {
                debug!("Skipping DTD include {}: {e}", included.display());
            }
        }
    }

    /// Replacement text of an entity with nested references expanded
    fn expand(&self, name: &str, depth: usize) -> Option<String> {
        let value = self.entities.get(name)?;
        if depth >= MAX_EXPANSION_DEPTH || !value.contains('&') {
            return Some(value.clone());
        }
        Some(self.expand_refs(value, depth + 1).into_owned())
    }

    fn expand_refs<'t>(&self, text: &'t str, depth: usize) -> Cow<'t, str> {
        ENTITY_REF_REGEX.replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            if PREDEFINED_ENTITIES.contains(&name) {
                return caps[0].to_string();
            }
            self.expand(name, depth).unwrap_or_else(|| caps[0].to_string())
        })
    }

    /// Expand references in document text, leaving literal spans untouched
    fn expand_document<'t>(&self, text: &'t str) -> Cow<'t, str> {
        if !LITERAL_SPAN_REGEX.is_match(text) {
            return self.expand_refs(text, 0);
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for span in LITERAL_SPAN_REGEX.find_iter(text) {
            out.push_str(&self.expand_refs(&text[last..span.start()], 0));
            out.push_str(span.as_str());
            last = span.end();
        }
        out.push_str(&self.expand_refs(&text[last..], 0));
        Cow::Owned(out)
    }

    pub fn entity(&self, name: &str) -> Option<&str> {
        self.entities.get(name).map(String::as_str)
    }

    pub fn declares_element(&self, name: &str) -> bool {
        self.elements.contains(name)
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// URLs are mapped onto their last path segment
fn file_component(system_id: &str) -> &str {
    if system_id.contains("://") {
        system_id.rsplit('/').next().unwrap_or(system_id)
    } else {
        system_id
    }
}

/// Resolves DOCTYPEs against a local DTD directory and prepares document text
#[derive(Debug, Default)]
pub struct DtdResolver {
    dtd_dir: Option<PathBuf>,
    validate: bool,
    /// Loaded DTDs by resolved path; `None` marks a DTD that failed to load
    cache: HashMap<PathBuf, Option<Rc<Dtd>>>,
}

impl DtdResolver {
    pub fn new(dtd_dir: Option<PathBuf>, validate: bool) -> Self {
        DtdResolver {
            dtd_dir,
            validate,
            cache: HashMap::new(),
        }
    }

    /// Local path a SYSTEM id refers to
    pub fn resolve_path(&self, system_id: &str) -> Option<PathBuf> {
        let dir = self.dtd_dir.as_ref()?;
        if Path::new(system_id).starts_with(dir) {
            return Some(PathBuf::from(system_id));
        }
        Some(dir.join(file_component(system_id)))
    }

    fn dtd(&mut self, path: PathBuf) -> Option<Rc<Dtd>> {
        self.cache
            .entry(path)
            .or_insert_with_key(|path| match Dtd::load(path) {
                Ok(dtd) => Some(Rc::new(dtd)),
                Err(e) => {
                    debug!("Unable to load DTD {}: {e}", path.display());
                    None
                }
            })
            .clone()
    }

    /// Substitute and expand entities so the text can be parsed standalone
    pub fn prepare<'t>(&mut self, raw: &'t str) -> PreparedDocument<'t> {
        let text = substitute_undeclared_entities(raw);
        let doctype = DocType::find(&text);

        let dtd = doctype
            .as_ref()
            .and_then(|d| d.system_id.as_deref())
            .and_then(|id| self.resolve_path(id))
            .and_then(|path| self.dtd(path));

        let text = match &dtd {
            Some(dtd) => match dtd.expand_document(&text) {
                Cow::Borrowed(_) => text,
                Cow::Owned(expanded) => Cow::Owned(expanded),
            },
            None => text,
        };

        PreparedDocument {
            text,
            doctype,
            dtd,
            validate: self.validate,
        }
    }
}

/// Document text ready for the parser, with what was learned about its DTD
#[derive(Debug)]
pub struct PreparedDocument<'t> {
    pub text: Cow<'t, str>,
    pub doctype: Option<DocType>,
    dtd: Option<Rc<Dtd>>,
    validate: bool,
}

impl<'t> PreparedDocument<'t> {
    /// Parse the prepared text, validating it when the resolver was asked to
    pub fn parse(&self) -> Result<roxmltree::Document<'_>, DocumentError> {
        let mut options = roxmltree::ParsingOptions::default();
        options.allow_dtd = true;
        let doc = roxmltree::Document::parse_with_options(&self.text, options)
            .map_err(|e| DocumentError::XmlSyntax(e.to_string()))?;
        if self.validate {
            self.check_structure(&doc)?;
        }
        Ok(doc)
    }

    /// Root element matches the DOCTYPE and every element is declared
    fn check_structure(&self, doc: &roxmltree::Document<'_>) -> Result<(), DocumentError> {
        let Some(doctype) = &self.doctype else {
            return Err(DocumentError::Validation("no DOCTYPE declaration".to_string()));
        };
        let Some(dtd) = &self.dtd else {
            return Err(DocumentError::Validation(format!(
                "DTD {} could not be loaded",
                doctype.system_id.as_deref().unwrap_or("(none)")
            )));
        };

        let root = doc.root_element().tag_name().name();
        if root != local_name(&doctype.name) {
            return Err(DocumentError::Validation(format!(
                "root element <{root}> does not match DOCTYPE {}",
                doctype.name
            )));
        }

        if dtd.elements.is_empty() {
            return Ok(());
        }
        for node in doc.descendants().filter(|n| n.is_element()) {
            let name = node.tag_name().name();
            if !dtd.declares_element(name) {
                let line = doc.text_pos_at(node.range().start).row;
                return Err(DocumentError::Validation(format!(
                    "element <{name}> at line {line} is not declared in the DTD"
                )));
            }
        }
        Ok(())
    }
}
