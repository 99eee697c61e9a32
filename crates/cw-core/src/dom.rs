//! The DOM abstraction the poller runs against.
//!
//! The classification heuristic runs against arbitrary, possibly hostile
//! page markup, so every accessor is total: absent attributes, detached
//! nodes, and non-HTML elements all come back as `None`/empty rather than
//! panicking.

/// A document the poller can observe and query.
///
/// `Node` handles are cheap to clone (an `Rc` in the tree implementation, a
/// JS reference in the browser). No ordering or hashing is required of them;
/// identity-keyed state (the known-first-party set) lives behind
/// [`Dom::mark_known_first_party`] so the browser host can keep it in a JS
/// `WeakSet` and let entries vanish with their nodes.
pub trait Dom {
    type Node: Clone;

    /// All elements in the document matching `selector`, in document order.
    /// Unknown or invalid selector groups match nothing.
    fn query_all(&self, selector: &str) -> Vec<Self::Node>;

    /// All descendants of `scope` matching `selector`, in document order.
    fn query_all_in(&self, scope: &Self::Node, selector: &str) -> Vec<Self::Node>;

    /// Whether `node` matches `selector`. Invalid selectors report `false`.
    fn matches(&self, node: &Self::Node, selector: &str) -> bool;

    /// Whether `selector` parses as a valid selector on this host.
    fn selector_is_valid(&self, selector: &str) -> bool;

    /// Current value of the attribute, if the node carries it.
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Whether the node carries the attribute at all.
    fn has_attribute(&self, node: &Self::Node, name: &str) -> bool;

    /// The node's class list, in attribute order. Empty for classless nodes.
    fn classes(&self, node: &Self::Node) -> Vec<String>;

    fn first_child(&self, node: &Self::Node) -> Option<Self::Node>;

    fn next_sibling(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Rendered text of the subtree. `None` when the node cannot render
    /// text (e.g. a non-HTML element).
    fn inner_text(&self, node: &Self::Node) -> Option<String>;

    /// Rendered text of every descendant with the given tag name.
    fn tag_texts(&self, node: &Self::Node, tag: &str) -> Vec<String>;

    /// Whether this subtree was already classified first-party.
    fn is_known_first_party(&self, node: &Self::Node) -> bool;

    /// Record a first-party verdict for this subtree so later pump cycles
    /// skip it. Implementations use interior mutability; the browser host
    /// backs this with a `WeakSet`.
    fn mark_known_first_party(&self, node: &Self::Node);
}
