//! Record extraction from container snapshots.
//!
//! Three tiers run in order and the first one that yields usable text wins:
//! 1. structured: the "view quote" anchor's image alt-text (`text - author`)
//! 2. secondary: dedicated text / attribution nodes
//! 3. raw: the container's visible text, line by line
//!
//! Every candidate goes through the same cleaning rules and validation gate.

use url::Url;

use crate::models::quote::{Record, RejectReason};
use crate::services::snapshot::ContainerSnapshot;

/// Minimum cleaned text length is strictly greater than this.
pub const MIN_TEXT_LEN: usize = 10;

/// Author value meaning "could not be determined".
pub const UNRESOLVED_AUTHOR: &str = "Unknown";

/// Phrases that mark share/view prompts rather than content.
pub const DEFAULT_PLACEHOLDERS: &[&str] = &["share this quote", "view quote", "view this quote"];

/// Path prefix of a single quote's page: `/quotes/<author-slug>_<id>`.
pub const DEFAULT_SOURCE_PATH: &str = "/quotes/";

const ATTRIBUTION_SEPARATOR: &str = " - ";

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
    ('\u{00AB}', '\u{00BB}'),
];

/// Result of cleaning one raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleaned {
    Value(String),
    Placeholder,
    Empty,
}

impl Cleaned {
    fn value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Raw values produced by one tier, before cleaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub text: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecordExtractor {
    base_url: Url,
    source_path: String,
    placeholders: Vec<String>,
}

impl RecordExtractor {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            source_path: DEFAULT_SOURCE_PATH.to_string(),
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Extract and validate one record. Never fails with an error: a container
    /// that does not yield a record is reported as a [`RejectReason`].
    pub fn extract(&self, snapshot: &ContainerSnapshot, index: u32) -> Result<Record, RejectReason> {
        if snapshot.is_empty() {
            return Err(RejectReason::NoContainer);
        }

        let link = snapshot.view_link.as_ref();
        let source_link = link
            .and_then(|l| l.href.as_deref())
            .and_then(|href| self.absolute(href));
        let image_url = link
            .and_then(|l| l.image.as_ref())
            .and_then(|img| img.src.as_deref())
            .and_then(|src| self.absolute(src));

        let tiers: [fn(&Self, &ContainerSnapshot) -> Candidate; 3] =
            [Self::structured_tier, Self::secondary_tier, Self::raw_text_tier];

        let mut placeholder_seen = false;
        let mut short_text_seen = false;
        let mut earlier_author: Option<String> = None;
        let mut chosen: Option<(String, Option<String>)> = None;

        for tier in tiers {
            let candidate = tier(self, snapshot);

            let text = candidate.text.as_deref().map(|t| self.clean_text(t));
            let author = candidate.author.as_deref().map(|a| self.clean_author(a));

            placeholder_seen |= matches!(text, Some(Cleaned::Placeholder))
                || matches!(author, Some(Cleaned::Placeholder));
            let author = author.as_ref().and_then(Cleaned::value).map(str::to_string);

            match text.as_ref().and_then(Cleaned::value) {
                Some(t) if t.chars().count() > MIN_TEXT_LEN => {
                    chosen = Some((t.to_string(), author));
                    break;
                }
                Some(_) => short_text_seen = true,
                None => {}
            }
            if earlier_author.is_none() {
                earlier_author = author;
            }
        }

        let Some((text, tier_author)) = chosen else {
            return Err(if placeholder_seen && !short_text_seen {
                RejectReason::PlaceholderOnly
            } else {
                RejectReason::TooShort
            });
        };

        let author = tier_author
            .or(earlier_author)
            .or_else(|| source_link.as_deref().and_then(|l| self.author_from_link(l)))
            .filter(|a| !a.eq_ignore_ascii_case(UNRESOLVED_AUTHOR))
            .ok_or(RejectReason::AuthorUnresolved)?;

        if text.eq_ignore_ascii_case(&author) {
            return Err(RejectReason::PlaceholderOnly);
        }

        Ok(Record {
            text,
            author,
            source_link,
            image_url,
            image_blob_ref: None,
            extraction_index: index,
        })
    }

    /// Tier 1: alt-text of the image inside the "view quote" anchor.
    fn structured_tier(&self, snapshot: &ContainerSnapshot) -> Candidate {
        let alt = snapshot
            .view_link
            .as_ref()
            .and_then(|l| l.image.as_ref())
            .and_then(|img| img.alt.as_deref())
            .map(str::trim)
            .filter(|alt| !alt.is_empty());

        match alt {
            Some(alt) => {
                let (text, author) = split_attribution(alt);
                Candidate {
                    text: Some(text.to_string()),
                    author: author.map(str::to_string),
                }
            }
            None => Candidate::default(),
        }
    }

    /// Tier 2: dedicated text and attribution nodes, read independently.
    fn secondary_tier(&self, snapshot: &ContainerSnapshot) -> Candidate {
        let mut candidate = Candidate::default();
        let mut second_line = None;

        for node in &snapshot.text_nodes {
            let lines: Vec<&str> = non_empty_lines(node).collect();
            let Some(first) = lines.first() else { continue };
            if self.is_placeholder(first) {
                continue;
            }
            candidate.text = Some(first.to_string());
            second_line = lines.get(1).map(|l| l.to_string());
            break;
        }

        candidate.author = snapshot
            .author_nodes
            .iter()
            .filter_map(|node| non_empty_lines(node).next())
            .find(|line| !self.is_placeholder(line))
            .map(str::to_string)
            .or(second_line);

        candidate
    }

    /// Tier 3: visible text, first line is the quote, second the author.
    fn raw_text_tier(&self, snapshot: &ContainerSnapshot) -> Candidate {
        let mut lines = non_empty_lines(&snapshot.inner_text);
        let text = lines.next().map(str::to_string);
        let author = lines.next().map(str::to_string);
        Candidate { text, author }
    }

    pub fn is_placeholder(&self, value: &str) -> bool {
        let lowered = value.to_lowercase();
        self.placeholders.iter().any(|p| lowered.contains(p.as_str()))
    }

    /// Trim, drop a trailing ellipsis and one layer of wrapping quotes.
    pub fn clean_text(&self, raw: &str) -> Cleaned {
        let trimmed = raw.trim();
        if self.is_placeholder(trimmed) {
            return Cleaned::Placeholder;
        }

        // The ellipsis may sit inside or outside the quotes.
        let text = strip_ellipsis(trimmed);
        let text = strip_ellipsis(strip_wrapping_quotes(text).trim());

        if text.is_empty() {
            Cleaned::Empty
        } else {
            Cleaned::Value(text.to_string())
        }
    }

    /// Clean an author name and normalize it to title case.
    pub fn clean_author(&self, raw: &str) -> Cleaned {
        match self.clean_text(raw) {
            Cleaned::Value(name) if name.eq_ignore_ascii_case(UNRESOLVED_AUTHOR) => Cleaned::Empty,
            Cleaned::Value(name) => Cleaned::Value(title_case(&name)),
            other => other,
        }
    }

    /// Derive an author from a `/quotes/<author-slug>_<id>` link.
    pub fn author_from_link(&self, link: &str) -> Option<String> {
        let url = Url::parse(link).ok()?;
        let rest = url.path().strip_prefix(self.source_path.as_str())?;
        let segment = rest.split('/').next().filter(|s| !s.is_empty())?;

        let slug = match segment.rsplit_once('_') {
            Some((head, id)) if !head.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => head,
            _ => segment,
        };
        let name = slug.replace(['_', '-'], " ");
        let name = name.trim();
        (!name.is_empty()).then(|| title_case(name))
    }

    fn absolute(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        let url = self.base_url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }
}

/// Split `text - author` on the last separator so hyphens inside the text survive.
pub fn split_attribution(alt: &str) -> (&str, Option<&str>) {
    match alt.rsplit_once(ATTRIBUTION_SEPARATOR) {
        Some((head, tail)) => (head, Some(tail)),
        None => (alt, None),
    }
}

fn strip_ellipsis(text: &str) -> &str {
    text.strip_suffix("...")
        .or_else(|| text.strip_suffix('\u{2026}'))
        .unwrap_or(text)
        .trim_end()
}

fn strip_wrapping_quotes(text: &str) -> &str {
    for (open, close) in QUOTE_PAIRS {
        if let Some(inner) = text.strip_prefix(*open).and_then(|t| t.strip_suffix(*close)) {
            return inner;
        }
    }
    text
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Title-case each word. Words that already mix cases with a leading capital
/// (`McCartney`) are left alone.
pub fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mixed = word.chars().any(char::is_lowercase) && word.chars().any(char::is_uppercase);
            let leading_upper = word.chars().find(|c| c.is_alphabetic()).is_some_and(char::is_uppercase);
            if mixed && leading_upper {
                return word.to_string();
            }

            let mut out = String::with_capacity(word.len());
            let mut prev: Option<char> = None;
            for c in word.chars() {
                let word_start = prev.map_or(true, |p| !(p.is_alphabetic() || p == '\''));
                if word_start {
                    out.extend(c.to_uppercase());
                } else {
                    out.extend(c.to_lowercase());
                }
                prev = Some(c);
            }
            out
        })
        .collect::<Vec<_>>()
        .join(" ")
}
