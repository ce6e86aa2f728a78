//! Plain-data capture of one record container.
//!
//! A [`ContainerSnapshot`] is taken once per container and is all the extractor
//! ever sees, so extraction never holds a live DOM handle.

use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};

/// Anchors that lead to a single quote's own page, most specific first.
pub const VIEW_LINK_SELECTORS: &[&str] = &[r#"a[title="view quote"]"#, r#"a[href*="/quotes/"]"#];

/// Narrow text-bearing nodes read when the view link carries no usable text.
pub const TEXT_NODES: &[&str] = &[".qtext", ".quote-text", ".quotestext", "p"];

/// Attribution nodes read alongside [`TEXT_NODES`].
pub const AUTHOR_NODES: &[&str] = &[".qauth", ".author", "cite", ".citation"];

/// Tags that introduce a line break in rendered text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "li", "main", "nav", "ol", "p", "pre",
    "section", "table", "tr", "ul",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageRef {
    pub src: Option<String>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ViewLink {
    pub href: Option<String>,
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerSnapshot {
    /// Visible text with block boundaries rendered as newlines.
    pub inner_text: String,
    pub view_link: Option<ViewLink>,
    /// Inner text of the first match of each text node selector, in order.
    pub text_nodes: Vec<String>,
    /// Inner text of the first match of each author node selector, in order.
    pub author_nodes: Vec<String>,
}

impl ContainerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.inner_text.trim().is_empty()
            && self.view_link.is_none()
            && self.text_nodes.is_empty()
            && self.author_nodes.is_empty()
    }
}

/// Capture a container element as a [`ContainerSnapshot`].
pub fn capture(container: ElementRef<'_>) -> ContainerSnapshot {
    let view_link = VIEW_LINK_SELECTORS
        .iter()
        .find_map(|css| select_first(container, css))
        .map(|anchor| ViewLink {
            href: anchor.value().attr("href").map(str::to_string),
            image: select_first(anchor, "img").map(|img| ImageRef {
                src: img
                    .value()
                    .attr("src")
                    .or_else(|| img.value().attr("data-src"))
                    .map(str::to_string),
                alt: img.value().attr("alt").map(str::to_string),
            }),
        });

    ContainerSnapshot {
        inner_text: inner_text(container),
        view_link,
        text_nodes: first_texts(container, TEXT_NODES),
        author_nodes: first_texts(container, AUTHOR_NODES),
    }
}

fn first_texts(container: ElementRef<'_>, selectors: &[&str]) -> Vec<String> {
    selectors
        .iter()
        .filter_map(|css| select_first(container, css))
        .map(inner_text)
        .filter(|text| !text.trim().is_empty())
        .collect()
}

fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    scope.select(&selector).next()
}

/// Approximate browser `innerText`: text nodes in document order, with line
/// breaks around block elements and at `<br>`.
pub fn inner_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);

    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            // Source newlines are layout, not line breaks.
            out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            match name {
                "br" => out.push('\n'),
                "script" | "style" | "noscript" | "template" => {}
                _ => {
                    let block = BLOCK_TAGS.contains(&name);
                    if block {
                        out.push('\n');
                    }
                    collect_text(child_element, out);
                    if block {
                        out.push('\n');
                    }
                }
            }
        }
    }
}
