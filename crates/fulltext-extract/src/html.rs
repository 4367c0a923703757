//! HTML articles, optionally with tables published as separate files.
//!
//! The primary file is read from the introduction onward. The references
//! heading and the list right after it are dropped, and every link to an
//! auxiliary table file is replaced by the content of that table.

use std::path::Path;

use fulltext_core::ExtractedContent;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::normalize::TextNormalizer;
use crate::rules::{HtmlRules, MarkerRule};

/// Extract an HTML article. Auxiliary sources whose name matches the table
/// pattern are its tables.
pub fn extract_files(
    primary: &str,
    auxiliary: &[String],
    rules: &HtmlRules,
    normalizer: &TextNormalizer,
) -> Result<ExtractedContent> {
    let document = Html::parse_document(&read_lossy(Path::new(primary))?);

    let mut tables = Vec::new();
    for source in auxiliary {
        if !rules.table_name_pattern.is_match(source) {
            continue;
        }
        let path = Path::new(source);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone());
        let table_document = Html::parse_document(&read_lossy(path)?);
        match table_text(&table_document, rules) {
            Some(text) => tables.push((name, text)),
            None => warn!(table = %source, "no table element in table file, skipping"),
        }
    }
    debug!(source = %primary, tables = tables.len(), "collated HTML tables");

    let intro = find_marker(&document, &rules.introduction);
    if intro.is_none() {
        warn!(source = %primary, "introduction not found, keeping the whole document");
    }

    let mut removed = Vec::new();
    if let Some(heading) = find_marker(&document, &rules.references) {
        removed.push(heading);
        if let Some(list) = heading.next_siblings().find_map(ElementRef::wrap) {
            removed.push(list);
        }
    } else {
        debug!(source = %primary, "references heading not found");
    }

    let mut spliced = Vec::new();
    for (name, text) in tables {
        let mut links = document.select(&rules.table_link).filter(|link| {
            link.value()
                .attr(&rules.table_link_attribute)
                .is_some_and(|target| target.contains(name.as_str()))
        });
        match links.next() {
            Some(first) => {
                spliced.push((first, Some(text)));
                spliced.extend(links.map(|other| (other, None)));
            }
            None => debug!(table = %name, "no link to table"),
        }
    }

    let mut flattener = Flattener {
        skip: rules.skip.as_ref(),
        intro,
        started: intro.is_none(),
        removed,
        spliced,
        parts: Vec::new(),
    };
    flattener.visit(document.root_element());

    Ok(ExtractedContent::from_text(
        normalizer.normalize(&flattener.parts.join(" ")),
    ))
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// First element, over the markers in order, whose text contains the marker text.
fn find_marker<'a>(document: &'a Html, markers: &[MarkerRule]) -> Option<ElementRef<'a>> {
    markers.iter().find_map(|marker| {
        document
            .select(&marker.selector)
            .find(|element| element.text().collect::<String>().contains(&marker.contains))
    })
}

/// Text of the element enclosing the first table of a table file.
fn table_text(document: &Html, rules: &HtmlRules) -> Option<String> {
    let table = document.select(&rules.table).next()?;
    let container = table
        .parent()
        .and_then(ElementRef::wrap)
        .unwrap_or(table);
    let mut flattener = Flattener {
        skip: rules.skip.as_ref(),
        intro: None,
        started: true,
        removed: Vec::new(),
        spliced: Vec::new(),
        parts: Vec::new(),
    };
    flattener.visit(container);
    Some(flattener.parts.join(" "))
}

struct Flattener<'a, 'r> {
    skip: Option<&'r Selector>,
    intro: Option<ElementRef<'a>>,
    /// Text before the introduction marker is dropped.
    started: bool,
    removed: Vec<ElementRef<'a>>,
    /// Links replaced by table text. `None` drops a duplicate link.
    spliced: Vec<(ElementRef<'a>, Option<String>)>,
    parts: Vec<String>,
}

/// Pending work of a [`Flattener`] walk, in document order.
enum Step<'a> {
    Element(ElementRef<'a>),
    Text(&'a str),
}

impl<'a> Flattener<'a, '_> {
    /// Collect the text below `root`. Iterative, nesting depth is unbounded.
    fn visit(&mut self, root: ElementRef<'a>) {
        let mut stack = vec![Step::Element(root)];
        while let Some(step) = stack.pop() {
            let element = match step {
                Step::Element(element) => element,
                Step::Text(text) => {
                    let text = text.trim();
                    if self.started && !text.is_empty() {
                        self.parts.push(text.to_string());
                    }
                    continue;
                }
            };

            if self.intro == Some(element) {
                self.started = true;
            }
            if self.removed.contains(&element) {
                continue;
            }
            if self.skip.is_some_and(|skip| skip.matches(&element)) {
                continue;
            }
            if let Some((_, replacement)) = self.spliced.iter().find(|(link, _)| *link == element) {
                if self.started
                    && let Some(text) = replacement
                    && !text.is_empty()
                {
                    self.parts.push(text.clone());
                }
                continue;
            }

            let children: Vec<Step<'a>> = element
                .children()
                .filter_map(|child| match ElementRef::wrap(child) {
                    Some(element) => Some(Step::Element(element)),
                    None => match child.value() {
                        Node::Text(text) => Some(Step::Text(&**text)),
                        _ => None,
                    },
                })
                .collect();
            stack.extend(children.into_iter().rev());
        }
    }
}
