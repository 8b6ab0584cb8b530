//! The minimal DOM surface the patcher needs.
//!
//! A real page implements [`Dom`] over its document; [`MemoryDom`] is an
//! arena of elements matched by exact selector strings, used by tests and by
//! the CLI `watch` command to show what a page would receive.

use std::collections::BTreeMap;

/// Handle to an element inside a [`Dom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Element lookup and mutation.
pub trait Dom: Send {
    /// All attached elements matching `selector`, in document order.
    fn select_all(&self, selector: &str) -> Vec<NodeId>;

    /// Descendants of `scope` matching `selector`, in document order.
    fn select_within(&self, scope: NodeId, selector: &str) -> Vec<NodeId>;

    /// Replace the element's text content.
    fn set_text(&mut self, node: NodeId, text: &str);

    /// Replace the element's inner HTML.
    fn set_html(&mut self, node: NodeId, html: &str);

    /// Set an attribute.
    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

    /// Remove all children.
    fn clear_children(&mut self, node: NodeId);

    /// Append an HTML fragment as new children.
    fn append_html(&mut self, node: NodeId, html: &str);

    /// First match for `selector`.
    fn select_first(&self, selector: &str) -> Option<NodeId> {
        self.select_all(selector).into_iter().next()
    }
}

#[derive(Debug, Clone, Default)]
struct Element {
    selectors: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attached: bool,
    text: String,
    html: String,
    attributes: BTreeMap<String, String>,
}

/// An in-memory element arena.
#[derive(Debug, Clone, Default)]
pub struct MemoryDom {
    nodes: Vec<Element>,
}

impl MemoryDom {
    /// An empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level element matched by each of `selectors`.
    pub fn add(&mut self, selectors: &[&str]) -> NodeId {
        self.push(None, selectors)
    }

    /// Add a child element under `parent`.
    pub fn add_child(&mut self, parent: NodeId, selectors: &[&str]) -> NodeId {
        let id = self.push(Some(parent), selectors);
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    fn push(&mut self, parent: Option<NodeId>, selectors: &[&str]) -> NodeId {
        let attached = parent.is_none_or(|p| self.nodes.get(p.0).is_some_and(|e| e.attached));
        let id = NodeId(self.nodes.len());
        self.nodes.push(Element {
            selectors: selectors.iter().map(|s| (*s).to_owned()).collect(),
            parent,
            attached,
            ..Element::default()
        });
        id
    }

    /// Text content of an element.
    #[must_use]
    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|e| e.text.as_str())
    }

    /// Inner HTML of an element.
    #[must_use]
    pub fn html(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|e| e.html.as_str())
    }

    /// An attribute value.
    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes
            .get(node.0)
            .and_then(|e| e.attributes.get(name))
            .map(String::as_str)
    }

    /// Attached children of an element.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node.0)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    fn detach(&mut self, node: NodeId) {
        let children = match self.nodes.get_mut(node.0) {
            Some(e) => {
                e.attached = false;
                e.children.clone()
            }
            None => return,
        };
        for child in children {
            self.detach(child);
        }
    }

    fn is_descendant(&self, node: NodeId, scope: NodeId) -> bool {
        let mut current = self.nodes.get(node.0).and_then(|e| e.parent);
        while let Some(p) = current {
            if p == scope {
                return true;
            }
            current = self.nodes.get(p.0).and_then(|e| e.parent);
        }
        false
    }

    fn matches(element: &Element, selector: &str) -> bool {
        element.attached && element.selectors.iter().any(|s| s == selector)
    }
}

impl Dom for MemoryDom {
    fn select_all(&self, selector: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, e)| Self::matches(e, selector))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    fn select_within(&self, scope: NodeId, selector: &str) -> Vec<NodeId> {
        self.select_all(selector)
            .into_iter()
            .filter(|n| self.is_descendant(*n, scope))
            .collect()
    }

    fn set_text(&mut self, node: NodeId, text: &str) {
        if let Some(e) = self.nodes.get_mut(node.0) {
            text.clone_into(&mut e.text);
        }
    }

    fn set_html(&mut self, node: NodeId, html: &str) {
        if let Some(e) = self.nodes.get_mut(node.0) {
            html.clone_into(&mut e.html);
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(e) = self.nodes.get_mut(node.0) {
            e.attributes.insert(name.to_owned(), value.to_owned());
        }
    }

    fn clear_children(&mut self, node: NodeId) {
        let children = match self.nodes.get_mut(node.0) {
            Some(e) => {
                e.html.clear();
                std::mem::take(&mut e.children)
            }
            None => return,
        };
        for child in children {
            self.detach(child);
        }
    }

    fn append_html(&mut self, node: NodeId, html: &str) {
        if let Some(e) = self.nodes.get_mut(node.0) {
            e.html.push_str(html);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn selects_by_any_registered_selector() {
        let mut dom = MemoryDom::new();
        let title = dom.add(&["#hero-title", ".hero h1"]);
        assert_eq!(dom.select_all(".hero h1"), vec![title]);
        assert_eq!(dom.select_first("#hero-title"), Some(title));
        assert!(dom.select_all(".missing").is_empty());
    }

    #[test]
    fn scoped_selection_only_sees_descendants() {
        let mut dom = MemoryDom::new();
        let a = dom.add(&[".card"]);
        let b = dom.add(&[".card"]);
        let a_title = dom.add_child(a, &[".card-title"]);
        let _b_title = dom.add_child(b, &[".card-title"]);
        assert_eq!(dom.select_within(a, ".card-title"), vec![a_title]);
    }

    #[test]
    fn clearing_detaches_the_subtree() {
        let mut dom = MemoryDom::new();
        let list = dom.add(&["#list"]);
        let item = dom.add_child(list, &[".item"]);
        dom.add_child(item, &[".item-title"]);
        dom.append_html(list, "<li>old</li>");

        dom.clear_children(list);
        assert!(dom.select_all(".item").is_empty());
        assert!(dom.select_all(".item-title").is_empty());
        assert_eq!(dom.html(list), Some(""));
        assert!(dom.children(list).is_empty());
    }
}
