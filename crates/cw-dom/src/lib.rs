//! CloakWork Tree DOM
//!
//! A simple reference-counted DOM, just big enough to run the selector
//! poller against in tests and in the CLI simulator. Nodes own their
//! children and reference their parents weakly; handles are cheap clones of
//! the underlying `Rc`, matching the cost model of a real DOM reference.
//!
//! Selector support is intentionally limited to the forms the poller
//! actually emits and consumes: `tag`, `#id`, `.class`, `[attr]`,
//! `[attr=value]`, `:not(...)`, compounds thereof, and comma-separated
//! groups. No combinators.

pub mod select;
mod tree;

pub use select::{parse_selector_list, Compound, SelectorParseError, SimpleSelector};
pub use tree::{NodeData, NodeHandle, TreeDom};
