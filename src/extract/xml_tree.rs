//! Small namespace-aware element tree over `quick-xml`, queried with the
//! XPath subset ISO 19139 lookups need: `.//a//b/c` with prefixed names.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

pub(crate) const GMD: &str = "http://www.isotc211.org/2005/gmd";
pub(crate) const GCO: &str = "http://www.isotc211.org/2005/gco";
pub(crate) const GML: &str = "http://www.opengis.net/gml/3.2";
pub(crate) const GML31: &str = "http://www.opengis.net/gml";
pub(crate) const GMX: &str = "http://www.isotc211.org/2005/gmx";
pub(crate) const SRV: &str = "http://www.isotc211.org/2005/srv";
pub(crate) const XLINK: &str = "http://www.w3.org/1999/xlink";

/// Prefixes usable in query paths. Documents may bind any prefix they like;
/// matching is by namespace URI.
const PREFIXES: &[(&str, &str)] = &[
    ("gmd", GMD),
    ("gco", GCO),
    ("gml", GML),
    ("gml31", GML31),
    ("gmx", GMX),
    ("srv", SRV),
    ("xlink", XLINK),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    ns: Option<String>,
    local: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    ns: Option<String>,
    local: String,
    attributes: Vec<Attribute>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(reader: &NsReader<&[u8]>, ns: Option<String>, start: &BytesStart<'_>) -> Result<Self, String> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| format!("malformed attribute: {e}"))?;
            let (attr_ns, local) = reader.resolve_attribute(attr.key);
            let value = attr
                .unescape_value()
                .map_err(|e| format!("bad attribute value: {e}"))?
                .into_owned();
            attributes.push(Attribute {
                ns: bound_namespace(attr_ns),
                local: String::from_utf8_lossy(local.as_ref()).into_owned(),
                value,
            });
        }
        Ok(Self {
            ns,
            local: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub(crate) fn local_name(&self) -> &str {
        &self.local
    }

    pub(crate) fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    /// Trimmed direct text content, `None` when blank.
    pub(crate) fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    /// Unqualified attribute by local name.
    pub(crate) fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.ns.is_none() && a.local == local)
            .map(|a| a.value.as_str())
    }

    pub(crate) fn attr_ns(&self, ns: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.ns.as_deref() == Some(ns) && a.local == local)
            .map(|a| a.value.as_str())
    }

    fn matches(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns.as_deref() == Some(ns)
    }

    fn descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            out.push(child);
            child.descendants(out);
        }
    }

    /// Elements matching `path`, in document order without duplicates.
    /// Paths use `/` for child steps and `//` for descendant steps; a leading
    /// `.` is the context element.
    pub(crate) fn select(&self, path: &str) -> Vec<&Element> {
        let Some(steps) = parse_path(path) else {
            return Vec::new();
        };

        let mut current: Vec<&Element> = vec![self];
        for step in steps {
            let mut next: Vec<&Element> = Vec::new();
            for node in &current {
                let candidates: Vec<&Element> = if step.descendant {
                    let mut all = Vec::new();
                    node.descendants(&mut all);
                    all
                } else {
                    node.children.iter().collect()
                };
                for candidate in candidates {
                    if candidate.matches(step.ns, step.local)
                        && !next.iter().any(|seen| std::ptr::eq(*seen, candidate))
                    {
                        next.push(candidate);
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    pub(crate) fn first(&self, path: &str) -> Option<&Element> {
        self.select(path).into_iter().next()
    }

    /// Text of the first match with non-blank text.
    pub(crate) fn first_text(&self, path: &str) -> Option<String> {
        self.select(path)
            .into_iter()
            .find_map(Element::text)
            .map(str::to_string)
    }

    /// First non-blank text across several fallback paths.
    pub(crate) fn first_text_of(&self, paths: &[&str]) -> Option<String> {
        paths.iter().find_map(|path| self.first_text(path))
    }

    /// Text of a code-list element: the `codeListValue` attribute, else its text.
    pub(crate) fn code_value(&self) -> Option<String> {
        self.attr("codeListValue")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.text())
            .map(str::to_string)
    }
}

struct Step<'a> {
    descendant: bool,
    ns: &'static str,
    local: &'a str,
}

fn parse_path(path: &str) -> Option<Vec<Step<'_>>> {
    let mut rest = path.strip_prefix('.').unwrap_or(path);
    let mut steps = Vec::new();
    while !rest.is_empty() {
        let descendant = if let Some(r) = rest.strip_prefix("//") {
            rest = r;
            true
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            false
        } else {
            // Bare leading name is a child step.
            steps.is_empty().then_some(())?;
            false
        };
        let end = rest.find('/').unwrap_or(rest.len());
        let (name, tail) = rest.split_at(end);
        let (prefix, local) = name.split_once(':')?;
        let ns = PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, uri)| *uri)?;
        steps.push(Step {
            descendant,
            ns,
            local,
        });
        rest = tail;
    }
    Some(steps)
}

fn bound_namespace(result: ResolveResult<'_>) -> Option<String> {
    match result {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    }
}

/// Parses a whole document into its root element. Mismatched or unclosed
/// tags, and documents without a root, are errors.
pub(crate) fn parse_document(content: &str) -> Result<Element, String> {
    let mut reader = NsReader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position();
        let (ns, event) = reader
            .read_resolved_event()
            .map_err(|e| format!("XML syntax error at byte {position}: {e}"))?;
        let ns = bound_namespace(ns);

        match event {
            Event::Start(start) => {
                let element = Element::from_start(&reader, ns, &start)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = Element::from_start(&reader, ns, &start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| format!("unexpected closing tag at byte {position}"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| format!("bad text at byte {position}: {e}"))?;
                    append_text(&mut current.text, &text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    append_text(&mut current.text, &String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unexpected end of document: <{}> is never closed", open.local));
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err("document has more than one root element".to_string()),
    }
    Ok(())
}

fn append_text(buf: &mut String, text: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}
