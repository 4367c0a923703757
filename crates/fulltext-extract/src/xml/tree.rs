//! A small owned element tree built from `quick-xml` events.
//!
//! Publisher XML is frequently not well formed, so the builder is lenient:
//! end tags close the nearest open element with the same name and stray end
//! tags are ignored. Comments, CDATA and processing instructions are dropped.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::escape::{resolve_html5_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use crate::rules::{NameMatch, XmlSelector};

#[derive(Debug, Clone)]
enum Child {
    Element(usize),
    Text(String),
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Child>,
    parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Element>,
    names: NameMatch,
}

/// Handle to an element of an [`XmlTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

const ROOT: usize = 0;

impl XmlTree {
    /// Parse a document. Fails only when not a single element could be read.
    pub fn parse(input: &str, names: NameMatch) -> Result<Self, String> {
        let mut tree = Self {
            nodes: vec![Element {
                name: String::new(),
                attributes: Vec::new(),
                children: Vec::new(),
                parent: None,
            }],
            names,
        };

        let mut reader = Reader::from_str(input);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;

        let mut open = vec![ROOT];
        loop {
            let current = *open.last().unwrap_or(&ROOT);
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = tree.push_element(current, &e);
                    open.push(id);
                }
                Ok(Event::Empty(e)) => {
                    tree.push_element(current, &e);
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if let Some(pos) = open
                        .iter()
                        .rposition(|&id| id != ROOT && tree.nodes[id].name == name)
                    {
                        open.truncate(pos);
                    }
                }
                Ok(Event::Text(e)) => {
                    let raw = String::from_utf8_lossy(&e);
                    tree.push_text(current, unescape_lenient(&raw).into_owned());
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    if tree.nodes.len() == 1 {
                        return Err(format!(
                            "at byte {}: {e}",
                            reader.error_position()
                        ));
                    }
                    warn!(
                        position = reader.error_position(),
                        error = %e,
                        "XML error, keeping the part parsed so far"
                    );
                    break;
                }
            }
        }

        if tree.nodes.len() == 1 {
            return Err("document contains no elements".to_string());
        }
        Ok(tree)
    }

    fn push_element(&mut self, parent: usize, start: &BytesStart<'_>) -> usize {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let attributes = start
            .attributes()
            .with_checks(false)
            .filter_map(|attr| attr.ok())
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let raw = String::from_utf8_lossy(attr.value.as_ref());
                (key, unescape_lenient(&raw).into_owned())
            })
            .collect();

        let id = self.nodes.len();
        self.nodes.push(Element {
            name,
            attributes,
            children: Vec::new(),
            parent: Some(parent),
        });
        self.nodes[parent].children.push(Child::Element(id));
        id
    }

    fn push_text(&mut self, parent: usize, text: String) {
        if text.is_empty() {
            return;
        }
        match self.nodes[parent].children.last_mut() {
            Some(Child::Text(previous)) => previous.push_str(&text),
            _ => self.nodes[parent].children.push(Child::Text(text)),
        }
    }

    /// Elements matching a selector, in document order.
    pub fn select(&self, selector: &XmlSelector) -> Vec<NodeId> {
        let mut found = Vec::new();
        self.walk(ROOT, &mut |id| {
            if self.matches(id, selector) {
                found.push(NodeId(id));
            }
        });
        found
    }

    /// Pre-order walk below `id`. Iterative, nesting depth is unbounded.
    fn walk(&self, id: usize, visit: &mut impl FnMut(usize)) {
        let mut stack: Vec<usize> = self.child_elements(id).rev().collect();
        while let Some(id) = stack.pop() {
            visit(id);
            stack.extend(self.child_elements(id).rev());
        }
    }

    fn child_elements(&self, id: usize) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.nodes[id].children.iter().filter_map(|child| match child {
            Child::Element(id) => Some(*id),
            Child::Text(_) => None,
        })
    }

    fn matches(&self, id: usize, selector: &XmlSelector) -> bool {
        let element = &self.nodes[id];
        if !self.name_matches(&element.name, &selector.tag) {
            return false;
        }
        match &selector.attribute {
            None => true,
            Some((name, value)) => self.attribute(NodeId(id), name) == Some(value.as_str()),
        }
    }

    fn name_matches(&self, actual: &str, wanted: &str) -> bool {
        match self.names {
            NameMatch::Qualified if wanted.contains(':') => actual == wanted,
            _ => local_name(actual) == local_name(wanted),
        }
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        let attributes = &self.nodes[id.0].attributes;
        attributes
            .iter()
            .find(|(key, _)| key == name)
            .or_else(|| {
                attributes
                    .iter()
                    .find(|(key, _)| local_name(key) == local_name(name))
            })
            .map(|(_, value)| value.as_str())
    }

    /// Text nodes below an element, each trimmed, joined by single spaces.
    pub fn text(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut stack: Vec<&Child> = self.nodes[id.0].children.iter().rev().collect();
        while let Some(child) = stack.pop() {
            match child {
                Child::Text(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
                Child::Element(child) => stack.extend(self.nodes[*child].children.iter().rev()),
            }
        }
        parts.join(" ")
    }

    /// Remove every element with one of the given names. The text that
    /// follows a removed element stays where it was.
    pub fn strip(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        for id in 1..self.nodes.len() {
            let element = &self.nodes[id];
            if names.iter().any(|n| self.name_matches(&element.name, n)) {
                self.unlink(id);
            }
        }
        self.merge_adjacent_text();
    }

    /// Move every match of `selector` out of its parent, right after it.
    pub fn detach(&mut self, selector: &XmlSelector) {
        for NodeId(id) in self.select(selector) {
            let Some(parent) = self.nodes[id].parent else {
                continue;
            };
            let Some(grandparent) = self.nodes[parent].parent else {
                continue;
            };
            self.unlink(id);
            let Some(position) = self.position_in(grandparent, parent) else {
                continue;
            };
            self.nodes[grandparent]
                .children
                .insert(position + 1, Child::Element(id));
            self.nodes[id].parent = Some(grandparent);
        }
    }

    fn unlink(&mut self, id: usize) {
        let Some(parent) = self.nodes[id].parent else {
            return;
        };
        if let Some(position) = self.position_in(parent, id) {
            self.nodes[parent].children.remove(position);
        }
        self.nodes[id].parent = None;
    }

    fn position_in(&self, parent: usize, child: usize) -> Option<usize> {
        self.nodes[parent]
            .children
            .iter()
            .position(|c| matches!(c, Child::Element(id) if *id == child))
    }

    fn merge_adjacent_text(&mut self) {
        for element in &mut self.nodes {
            let mut merged: Vec<Child> = Vec::with_capacity(element.children.len());
            for child in element.children.drain(..) {
                match (merged.last_mut(), child) {
                    (Some(Child::Text(previous)), Child::Text(text)) => previous.push_str(&text),
                    (_, child) => merged.push(child),
                }
            }
            element.children = merged;
        }
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Resolve character references and XML/HTML5 named entities. Unknown or
/// broken references are kept verbatim.
fn unescape_lenient(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    if let Ok(text) = unescape_with(raw, resolve_html5_entity) {
        return text;
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let end = tail.find(';').filter(|&end| {
            end > 1 && !tail[1..end].contains(|c: char| c.is_whitespace() || c == '&')
        });
        match end {
            Some(end) => {
                let reference = &tail[..=end];
                match unescape_with(reference, resolve_html5_entity) {
                    Ok(resolved) => out.push_str(&resolved),
                    Err(_) => out.push_str(reference),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
