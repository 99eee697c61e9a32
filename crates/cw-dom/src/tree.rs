//! The reference-counted node tree and its `Dom` implementation.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use cw_core::dom::Dom;

use crate::select::{parse_compound, parse_selector_list, Compound, SimpleSelector};

/// The kinds of nodes the simulator needs.
#[derive(Debug)]
pub enum NodeData {
    Document,
    Element {
        /// Lowercase tag name.
        tag: String,
        attrs: RefCell<BTreeMap<String, String>>,
    },
    Text {
        contents: RefCell<String>,
    },
}

#[derive(Debug)]
pub struct TreeNode {
    data: NodeData,
    parent: RefCell<Weak<TreeNode>>,
    children: RefCell<Vec<Rc<TreeNode>>>,
    /// Marker backing `Dom::mark_known_first_party`. Nodes dropped with the
    /// tree take the marker with them; unlike the browser's `WeakSet` the
    /// marker keeps nothing alive, so there is nothing to leak.
    known_first_party: Cell<bool>,
}

/// A cheap, clonable reference to a node.
#[derive(Debug, Clone)]
pub struct NodeHandle(Rc<TreeNode>);

impl NodeHandle {
    fn new(data: NodeData) -> Self {
        Self(Rc::new(TreeNode {
            data,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            known_first_party: Cell::new(false),
        }))
    }

    #[inline]
    pub fn ptr_eq(&self, other: &NodeHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(self.0.data, NodeData::Element { .. })
    }

    /// Lowercase tag name, for elements.
    pub fn tag(&self) -> Option<String> {
        match &self.0.data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.0.parent.borrow().upgrade().map(NodeHandle)
    }

    pub fn children(&self) -> Vec<NodeHandle> {
        self.0
            .children
            .borrow()
            .iter()
            .cloned()
            .map(NodeHandle)
            .collect()
    }

    /// Append `child`, detaching it from any previous parent first.
    pub fn append(&self, child: &NodeHandle) {
        child.detach();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(Rc::clone(&child.0));
    }

    /// Remove this node from its parent's child list.
    pub fn detach(&self) {
        if let Some(parent) = self.parent() {
            parent
                .0
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, &self.0));
        }
        *self.0.parent.borrow_mut() = Weak::new();
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        match &self.0.data {
            NodeData::Element { attrs, .. } => attrs.borrow().get(name).cloned(),
            _ => None,
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        match &self.0.data {
            NodeData::Element { attrs, .. } => attrs.borrow().contains_key(name),
            _ => false,
        }
    }

    /// Set an attribute. Ignored on non-elements.
    pub fn set_attr(&self, name: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &self.0.data {
            attrs.borrow_mut().insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attr(&self, name: &str) {
        if let NodeData::Element { attrs, .. } = &self.0.data {
            attrs.borrow_mut().remove(name);
        }
    }

    /// The class list, in attribute order.
    pub fn classes(&self) -> Vec<String> {
        self.attr("class")
            .map(|value| value.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Replace all children with a single text node.
    pub fn set_text(&self, text: &str) {
        self.0.children.borrow_mut().clear();
        if !text.is_empty() {
            self.append(&NodeHandle::new(NodeData::Text {
                contents: RefCell::new(text.to_string()),
            }));
        }
    }

    pub fn append_text(&self, text: &str) {
        self.append(&NodeHandle::new(NodeData::Text {
            contents: RefCell::new(text.to_string()),
        }));
    }

    pub fn prepend_text(&self, text: &str) {
        let node = NodeHandle::new(NodeData::Text {
            contents: RefCell::new(text.to_string()),
        });
        *node.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().insert(0, node.0);
    }

    /// Concatenated text of the subtree, in document order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if let NodeData::Text { contents } = &self.0.data {
            out.push_str(&contents.borrow());
        }
        for child in self.0.children.borrow().iter() {
            NodeHandle(Rc::clone(child)).collect_text(out);
        }
    }

    /// Pre-order walk over this node's descendants (not the node itself).
    fn walk_descendants(&self, visit: &mut impl FnMut(&NodeHandle)) {
        for child in self.children() {
            visit(&child);
            child.walk_descendants(visit);
        }
    }

    fn matches_compound(&self, compound: &Compound) -> bool {
        if !self.is_element() {
            return false;
        }
        compound.parts.iter().all(|part| match part {
            SimpleSelector::Tag(tag) => self.tag().as_deref() == Some(tag),
            SimpleSelector::Id(id) => self.attr("id").as_deref() == Some(id.as_str()),
            SimpleSelector::Class(class) => self.classes().iter().any(|c| c == class),
            SimpleSelector::AttrPresent(name) => self.has_attr(name),
            SimpleSelector::AttrEquals(name, value) => {
                self.attr(name).as_deref() == Some(value.as_str())
            }
            SimpleSelector::Not(inner) => !self.matches_compound(inner),
        })
    }
}

/// The document, pre-seeded with `html > (head, body)`.
#[derive(Debug)]
pub struct TreeDom {
    document: NodeHandle,
    html: NodeHandle,
    head: NodeHandle,
    body: NodeHandle,
}

impl TreeDom {
    pub fn new() -> Self {
        let document = NodeHandle::new(NodeData::Document);
        let html = NodeHandle::new(NodeData::Element {
            tag: "html".to_string(),
            attrs: RefCell::new(BTreeMap::new()),
        });
        let head = NodeHandle::new(NodeData::Element {
            tag: "head".to_string(),
            attrs: RefCell::new(BTreeMap::new()),
        });
        let body = NodeHandle::new(NodeData::Element {
            tag: "body".to_string(),
            attrs: RefCell::new(BTreeMap::new()),
        });
        document.append(&html);
        html.append(&head);
        html.append(&body);
        Self {
            document,
            html,
            head,
            body,
        }
    }

    #[inline]
    pub fn document(&self) -> NodeHandle {
        self.document.clone()
    }

    #[inline]
    pub fn html(&self) -> NodeHandle {
        self.html.clone()
    }

    #[inline]
    pub fn head(&self) -> NodeHandle {
        self.head.clone()
    }

    #[inline]
    pub fn body(&self) -> NodeHandle {
        self.body.clone()
    }

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeHandle {
        NodeHandle::new(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: RefCell::new(BTreeMap::new()),
        })
    }

    /// Create a detached text node.
    pub fn create_text(&self, text: &str) -> NodeHandle {
        NodeHandle::new(NodeData::Text {
            contents: RefCell::new(text.to_string()),
        })
    }

    fn query_scope(&self, scope: &NodeHandle, selector: &str) -> Vec<NodeHandle> {
        let groups: Vec<Compound> = selector
            .split(',')
            .filter_map(|group| match parse_compound(group) {
                Ok(compound) => Some(compound),
                Err(error) => {
                    log::debug!("skipping selector group: {error}");
                    None
                }
            })
            .collect();
        if groups.is_empty() {
            return Vec::new();
        }

        let mut found = Vec::new();
        scope.walk_descendants(&mut |node| {
            if groups.iter().any(|group| node.matches_compound(group)) {
                found.push(node.clone());
            }
        });
        found
    }
}

impl Default for TreeDom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom for TreeDom {
    type Node = NodeHandle;

    fn query_all(&self, selector: &str) -> Vec<NodeHandle> {
        self.query_scope(&self.document, selector)
    }

    fn query_all_in(&self, scope: &NodeHandle, selector: &str) -> Vec<NodeHandle> {
        self.query_scope(scope, selector)
    }

    fn matches(&self, node: &NodeHandle, selector: &str) -> bool {
        match parse_selector_list(selector) {
            Ok(groups) => groups.iter().any(|group| node.matches_compound(group)),
            Err(_) => false,
        }
    }

    fn selector_is_valid(&self, selector: &str) -> bool {
        parse_selector_list(selector).is_ok()
    }

    fn attribute(&self, node: &NodeHandle, name: &str) -> Option<String> {
        node.attr(name)
    }

    fn has_attribute(&self, node: &NodeHandle, name: &str) -> bool {
        node.has_attr(name)
    }

    fn classes(&self, node: &NodeHandle) -> Vec<String> {
        node.classes()
    }

    fn first_child(&self, node: &NodeHandle) -> Option<NodeHandle> {
        node.children().into_iter().next()
    }

    fn next_sibling(&self, node: &NodeHandle) -> Option<NodeHandle> {
        let parent = node.parent()?;
        let siblings = parent.children();
        let index = siblings.iter().position(|s| s.ptr_eq(node))?;
        siblings.get(index + 1).cloned()
    }

    fn inner_text(&self, node: &NodeHandle) -> Option<String> {
        if node.is_element() {
            Some(node.text())
        } else {
            None
        }
    }

    fn tag_texts(&self, node: &NodeHandle, tag: &str) -> Vec<String> {
        let mut texts = Vec::new();
        node.walk_descendants(&mut |descendant| {
            if descendant.tag().as_deref() == Some(tag) {
                texts.push(descendant.text());
            }
        });
        texts
    }

    fn is_known_first_party(&self, node: &NodeHandle) -> bool {
        node.0.known_first_party.get()
    }

    fn mark_known_first_party(&self, node: &NodeHandle) {
        node.0.known_first_party.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_starts_with_html_scaffold() {
        let dom = TreeDom::new();
        assert_eq!(dom.html().tag().as_deref(), Some("html"));
        assert_eq!(dom.body().parent().unwrap().tag().as_deref(), Some("html"));
    }

    #[test]
    fn test_append_moves_nodes_between_parents() {
        let dom = TreeDom::new();
        let a = dom.create_element("div");
        let b = dom.create_element("div");
        dom.body().append(&a);
        a.append(&b);
        dom.body().append(&b);
        assert_eq!(a.children().len(), 0);
        assert!(b.parent().unwrap().ptr_eq(&dom.body()));
    }

    #[test]
    fn test_query_all_returns_document_order() {
        let dom = TreeDom::new();
        let first = dom.create_element("div");
        first.set_attr("class", "hit");
        let second = dom.create_element("span");
        second.set_attr("class", "hit");
        dom.body().append(&first);
        first.append(&second);

        let hits = dom.query_all(".hit");
        assert_eq!(hits.len(), 2);
        assert!(hits[0].ptr_eq(&first));
        assert!(hits[1].ptr_eq(&second));
    }

    #[test]
    fn test_query_scope_excludes_scope_itself() {
        let dom = TreeDom::new();
        let outer = dom.create_element("div");
        outer.set_attr("class", "hit");
        let inner = dom.create_element("div");
        inner.set_attr("class", "hit");
        dom.body().append(&outer);
        outer.append(&inner);

        let hits = dom.query_all_in(&outer, ".hit");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].ptr_eq(&inner));
    }

    #[test]
    fn test_class_id_sweep_selector_skips_html_and_body() {
        let dom = TreeDom::new();
        dom.body().set_attr("class", "page");
        let div = dom.create_element("div");
        div.set_attr("id", "x");
        dom.body().append(&div);

        let hits = dom.query_all("[id]:not(html):not(body),[class]:not(html):not(body)");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].ptr_eq(&div));
    }

    #[test]
    fn test_matches_rejects_invalid_selectors() {
        let dom = TreeDom::new();
        let div = dom.create_element("div");
        dom.body().append(&div);
        assert!(!dom.matches(&div, "div["));
        assert!(dom.matches(&div, "div"));
        assert!(!dom.selector_is_valid("div["));
    }

    #[test]
    fn test_text_concatenates_in_document_order() {
        let dom = TreeDom::new();
        let div = dom.create_element("div");
        dom.body().append(&div);
        div.append_text("Hello ");
        let span = dom.create_element("span");
        div.append(&span);
        span.set_text("world");
        assert_eq!(div.text(), "Hello world");
    }

    #[test]
    fn test_first_child_and_next_sibling() {
        let dom = TreeDom::new();
        let a = dom.create_element("div");
        let b = dom.create_element("div");
        dom.body().append(&a);
        dom.body().append(&b);

        let first = dom.first_child(&dom.body()).unwrap();
        assert!(first.ptr_eq(&a));
        let next = dom.next_sibling(&a).unwrap();
        assert!(next.ptr_eq(&b));
        assert!(dom.next_sibling(&b).is_none());
    }

    #[test]
    fn test_known_first_party_marker() {
        let dom = TreeDom::new();
        let div = dom.create_element("div");
        dom.body().append(&div);
        assert!(!dom.is_known_first_party(&div));
        dom.mark_known_first_party(&div);
        assert!(dom.is_known_first_party(&div));
    }
}
