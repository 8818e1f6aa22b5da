//! Structural perception: distill raw page candidates into element descriptors.

use serde::{Deserialize, Serialize};

use super::ElementDescriptor;

/// Elements narrower or shorter than this (px) are ignored.
pub const MIN_ELEMENT_SIZE: f64 = 10.0;
/// Elements further down than this many viewport heights are ignored.
pub const MAX_VIEWPORT_DEPTH: f64 = 3.0;
/// DIV/SPAN containers with more text than this are treated as layout, not controls.
pub const CONTAINER_TEXT_LIMIT: usize = 50;
/// Descriptor text is truncated to this many characters.
pub const TEXT_LIMIT: usize = 60;
/// At most this many descriptors per snapshot.
pub const MAX_ELEMENTS: usize = 100;

/// One candidate as enumerated by the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawElement {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    pub width: f64,
    pub height: f64,
    pub top: f64,
}

/// Everything the page reports for a structural snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPageData {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub viewport_height: f64,
    #[serde(default)]
    pub elements: Vec<RawElement>,
}

/// A filtered, compact view of the interactive parts of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<ElementDescriptor>,
}

/// Filter and compact raw candidates, in document order.
pub fn distill(page: RawPageData) -> StructuralSnapshot {
    let viewport_height = page.viewport_height;
    let elements = page
        .elements
        .iter()
        .filter_map(|raw| describe(raw, viewport_height))
        .take(MAX_ELEMENTS)
        .collect();

    StructuralSnapshot {
        url: page.url,
        title: page.title,
        elements,
    }
}

fn describe(raw: &RawElement, viewport_height: f64) -> Option<ElementDescriptor> {
    if raw.width < MIN_ELEMENT_SIZE || raw.height < MIN_ELEMENT_SIZE {
        return None;
    }
    if raw.top > viewport_height * MAX_VIEWPORT_DEPTH {
        return None;
    }

    let tag = raw.tag.to_ascii_uppercase();
    let text = collapse_whitespace(&raw.text);
    let length = text.chars().count();

    if text.is_empty() && tag != "INPUT" {
        return None;
    }
    if (tag == "DIV" || tag == "SPAN") && length > CONTAINER_TEXT_LIMIT {
        return None;
    }

    let selector = derive_selector(&tag, &raw.id, &raw.class_name);
    Some(ElementDescriptor {
        tag,
        text: text.chars().take(TEXT_LIMIT).collect(),
        selector,
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `tag#id`, else `tag.firstClass`, else `tag`; the tag is lowercased.
pub fn derive_selector(tag: &str, id: &str, class_name: &str) -> String {
    let tag = tag.to_ascii_lowercase();
    let id = id.trim();
    if !id.is_empty() {
        return format!("{}#{}", tag, id);
    }
    match class_name.split_whitespace().next() {
        Some(class) => format!("{}.{}", tag, class),
        None => tag,
    }
}
