//! Head-element metadata fragments contributed by loaders.
//!
//! Loaders emit `<head>` fragments through their response proxy; after the
//! merge, the renderer (out of scope here) receives them split into title,
//! meta, and everything else, with duplicates collapsed.
use std::collections::BTreeMap;

use serde::Serialize;

/// A single head element, e.g. a `<meta>` or `<link>` tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadEl {
    pub tag: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_text: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub self_closing: bool,
}

impl HeadEl {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.inner_text = Some(text.into());
        self
    }

    pub fn self_closing(mut self) -> Self {
        self.self_closing = true;
        self
    }

    pub fn title(text: impl Into<String>) -> Self {
        Self::new("title").text(text)
    }

    pub fn meta(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new("meta")
            .attr("name", name)
            .attr("content", content)
            .self_closing()
    }
}

/// An ordered collection of head elements.
#[derive(Debug, Clone, Default)]
pub struct HeadEls {
    els: Vec<HeadEl>,
}

impl HeadEls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, el: HeadEl) -> &mut Self {
        self.els.push(el);
        self
    }

    pub fn extend(&mut self, other: &HeadEls) {
        self.els.extend(other.els.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.els.is_empty()
    }

    pub fn collect(&self) -> &[HeadEl] {
        &self.els
    }

    pub fn into_vec(self) -> Vec<HeadEl> {
        self.els
    }
}

/// Head elements grouped for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SortedHeadEls {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<HeadEl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<HeadEl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rest: Vec<HeadEl>,
}

/// Split a merged element list into title / meta / rest.
///
/// The last title wins. Meta tags are unique per `name` attribute, later
/// contributions overriding earlier ones in place (inner segments override
/// outer defaults). Exact duplicates elsewhere are dropped.
pub fn sort_head_els(els: Vec<HeadEl>) -> SortedHeadEls {
    let mut sorted = SortedHeadEls::default();

    for el in els {
        match el.tag.as_str() {
            "title" => sorted.title = Some(el),
            "meta" => {
                let name = el.attributes.get("name").cloned();
                let existing = sorted.meta.iter().position(|have| match &name {
                    Some(name) => have.attributes.get("name") == Some(name),
                    None => have == &el,
                });
                match existing {
                    Some(i) if name.is_some() => sorted.meta[i] = el,
                    Some(_) => {}
                    None => sorted.meta.push(el),
                }
            }
            _ => {
                if !sorted.rest.contains(&el) {
                    sorted.rest.push(el);
                }
            }
        }
    }

    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_title_wins() {
        let els = vec![HeadEl::title("Outer"), HeadEl::title("Inner")];
        let sorted = sort_head_els(els);
        assert_eq!(sorted.title, Some(HeadEl::title("Inner")));
    }

    #[test]
    fn test_meta_overrides_by_name_in_place() {
        let els = vec![
            HeadEl::meta("description", "outer"),
            HeadEl::meta("og:type", "article"),
            HeadEl::meta("description", "inner"),
        ];
        let sorted = sort_head_els(els);
        assert_eq!(
            sorted.meta,
            vec![
                HeadEl::meta("description", "inner"),
                HeadEl::meta("og:type", "article"),
            ]
        );
    }

    #[test]
    fn test_rest_drops_exact_duplicates() {
        let link = HeadEl::new("link")
            .attr("rel", "stylesheet")
            .attr("href", "/a.css")
            .self_closing();
        let els = vec![link.clone(), link.clone(), HeadEl::new("script")];
        let sorted = sort_head_els(els);
        assert_eq!(sorted.rest.len(), 2);
    }
}
