//! `Dom` over the browser's real document.

use js_sys::Object;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, NodeList};

use cw_core::dom::Dom;

/// The live page. Node handles are `web_sys::Element` references; the
/// known-first-party set is a JS `WeakSet`, so entries vanish with their
/// elements and no cleanup is ever needed.
pub struct WebDom {
    document: Document,
    known_first_party: js_sys::WeakSet,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            known_first_party: js_sys::WeakSet::new(),
        }
    }

    #[inline]
    pub fn document(&self) -> &Document {
        &self.document
    }
}

fn elements_of(list: NodeList) -> Vec<Element> {
    let mut elements = Vec::with_capacity(list.length() as usize);
    for index in 0..list.length() {
        if let Some(node) = list.get(index) {
            if let Ok(element) = node.dyn_into::<Element>() {
                elements.push(element);
            }
        }
    }
    elements
}

impl Dom for WebDom {
    type Node = Element;

    fn query_all(&self, selector: &str) -> Vec<Element> {
        match self.document.query_selector_all(selector) {
            Ok(list) => elements_of(list),
            Err(_) => Vec::new(),
        }
    }

    fn query_all_in(&self, scope: &Element, selector: &str) -> Vec<Element> {
        match scope.query_selector_all(selector) {
            Ok(list) => elements_of(list),
            Err(_) => Vec::new(),
        }
    }

    fn matches(&self, node: &Element, selector: &str) -> bool {
        node.matches(selector).unwrap_or(false)
    }

    fn selector_is_valid(&self, selector: &str) -> bool {
        // querySelector throws a SyntaxError on selectors the page's engine
        // cannot parse; that is exactly the check we need.
        self.document.query_selector(selector).is_ok()
    }

    fn attribute(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    fn has_attribute(&self, node: &Element, name: &str) -> bool {
        node.has_attribute(name)
    }

    fn classes(&self, node: &Element) -> Vec<String> {
        let list = node.class_list();
        let mut classes = Vec::with_capacity(list.length() as usize);
        for index in 0..list.length() {
            if let Some(class) = list.get(index) {
                classes.push(class);
            }
        }
        classes
    }

    // The party walk only inspects attributes and structure, so skipping
    // text/comment nodes by walking element pointers changes nothing.
    fn first_child(&self, node: &Element) -> Option<Element> {
        node.first_element_child()
    }

    fn next_sibling(&self, node: &Element) -> Option<Element> {
        node.next_element_sibling()
    }

    fn inner_text(&self, node: &Element) -> Option<String> {
        node.dyn_ref::<HtmlElement>().map(|html| html.inner_text())
    }

    fn tag_texts(&self, node: &Element, tag: &str) -> Vec<String> {
        let collection = node.get_elements_by_tag_name(tag);
        let mut texts = Vec::with_capacity(collection.length() as usize);
        for index in 0..collection.length() {
            if let Some(element) = collection.item(index) {
                if let Some(html) = element.dyn_ref::<HtmlElement>() {
                    texts.push(html.inner_text());
                }
            }
        }
        texts
    }

    fn is_known_first_party(&self, node: &Element) -> bool {
        let object: &Object = node.unchecked_ref();
        self.known_first_party.has(object)
    }

    fn mark_known_first_party(&self, node: &Element) {
        let object: &Object = node.unchecked_ref();
        self.known_first_party.add(object);
    }
}
