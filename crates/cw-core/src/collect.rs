//! Attribute collection.
//!
//! Maintains the live, deduplicated inventory of `id`/`class` values seen on
//! the page. Values are collected either from mutation records (the default)
//! or from periodic full-document sweeps when the page mutates too heavily
//! for per-event processing; [`ObserveModeMachine`] decides which.

use std::collections::HashSet;

use crate::config::{RETURN_TO_OBSERVER_MS, SCORE_CALC_INTERVAL_MS};
use crate::dom::Dom;
use crate::timing::{Millis, RollingScore};

/// Query for every element carrying a `class` or `id`, excluding the page
/// chrome elements that never identify ad content.
pub const CLASS_ID_WITHOUT_HTML_OR_BODY: &str =
    "[id]:not(html):not(body),[class]:not(html):not(body)";

/// Which attribute a mutation record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Id,
    Class,
}

/// A pre-filtered DOM mutation, as delivered by the host's observer.
///
/// Hosts only forward `id`/`class` attribute changes and element additions;
/// text nodes and other attributes never reach the collector.
#[derive(Debug, Clone)]
pub enum Mutation<N> {
    Attribute { target: N, kind: AttrKind },
    ChildList { added: Vec<N> },
}

/// Attribute values collected since the last fetch dispatch.
#[derive(Debug, Clone, Default)]
pub struct PendingAttributes {
    pub ids: Vec<String>,
    pub classes: Vec<String>,
}

impl PendingAttributes {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.classes.is_empty()
    }

    /// Swap the buffers out, leaving them empty. Called synchronously at
    /// dispatch time, before any engine round trip is in flight.
    #[inline]
    pub fn take(&mut self) -> PendingAttributes {
        std::mem::take(self)
    }
}

/// The deduplicating `id`/`class` inventory.
///
/// Each attribute value is forwarded to the fetch gate at most once for the
/// lifetime of the page, no matter how many elements carry it or how often
/// it reappears in mutation batches.
#[derive(Debug, Default)]
pub struct AttributeCollector {
    queried_ids: HashSet<String>,
    queried_classes: HashSet<String>,
    pending: PendingAttributes,
}

impl AttributeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn pending(&self) -> &PendingAttributes {
        &self.pending
    }

    #[inline]
    pub fn pending_mut(&mut self) -> &mut PendingAttributes {
        &mut self.pending
    }

    /// Collect the element's `id` if it has one we have not seen before.
    pub fn collect_id<D: Dom>(&mut self, dom: &D, node: &D::Node) -> bool {
        let Some(id) = dom.attribute(node, "id") else {
            return false;
        };
        if id.is_empty() || self.queried_ids.contains(&id) {
            return false;
        }
        self.queried_ids.insert(id.clone());
        self.pending.ids.push(id);
        true
    }

    /// Collect any class names on the element we have not seen before.
    pub fn collect_classes<D: Dom>(&mut self, dom: &D, node: &D::Node) -> bool {
        let mut found_new = false;
        for class in dom.classes(node) {
            if class.is_empty() || self.queried_classes.contains(&class) {
                continue;
            }
            self.queried_classes.insert(class.clone());
            self.pending.classes.push(class);
            found_new = true;
        }
        found_new
    }

    /// Collect the element's own `id` and classes.
    pub fn collect_element<D: Dom>(&mut self, dom: &D, node: &D::Node) -> bool {
        let mut found_new = false;
        if dom.has_attribute(node, "id") {
            found_new = self.collect_id(dom, node);
        }
        if self.collect_classes(dom, node) {
            found_new = true;
        }
        found_new
    }

    /// Ingest one observer batch and return its mutation score: +1 per `id`
    /// change, +class-list length per `class` change, and for added elements
    /// +1 for the element plus +1 per attribute-carrying descendant.
    ///
    /// Descendants of added elements are queried here because the observer
    /// delivers no separate records for nodes inserted as part of a subtree.
    pub fn record_mutations<D: Dom>(&mut self, dom: &D, batch: &[Mutation<D::Node>]) -> u32 {
        let mut score: u32 = 0;
        for mutation in batch {
            match mutation {
                Mutation::Attribute { target, kind } => match kind {
                    AttrKind::Id => {
                        score += 1;
                        self.collect_id(dom, target);
                    }
                    AttrKind::Class => {
                        score += dom.classes(target).len() as u32;
                        self.collect_classes(dom, target);
                    }
                },
                Mutation::ChildList { added } => {
                    for node in added {
                        self.collect_element(dom, node);
                        score += 1;
                        if dom.first_child(node).is_some() {
                            let descendants = dom.query_all_in(node, CLASS_ID_WITHOUT_HTML_OR_BODY);
                            score += descendants.len() as u32;
                            for descendant in &descendants {
                                self.collect_element(dom, descendant);
                            }
                        }
                    }
                }
            }
        }
        score
    }

    /// Full-document pass: collect every attribute-carrying element. Used to
    /// seed pre-existing content before observation starts, and as the
    /// polling-mode sweep.
    pub fn sweep<D: Dom>(&mut self, dom: &D) {
        for node in dom.query_all(CLASS_ID_WITHOUT_HTML_OR_BODY) {
            self.collect_element(dom, &node);
        }
    }
}

// =============================================================================
// Observe / poll mode machine
// =============================================================================

/// Transition the host must act on: connect/disconnect its observer, start/
/// stop its polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    SwitchToPolling,
    ResumeObserving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserveMode {
    Observing,
    Polling { revert_at: Millis },
}

/// Two-state machine choosing between mutation observation and polling.
///
/// While observing, the mutation score accumulated in a rolling window is
/// compared against the configured threshold; exceeding it switches to
/// polling. Polling reverts to observation after a fixed duration, on the
/// theory that the page's mutation storm has subsided.
#[derive(Debug)]
pub struct ObserveModeMachine {
    mode: ObserveMode,
    threshold: Option<u32>,
    window: RollingScore,
    revert_after: Millis,
}

impl ObserveModeMachine {
    pub fn new(threshold: Option<u32>) -> Self {
        Self {
            mode: ObserveMode::Observing,
            threshold,
            window: RollingScore::new(SCORE_CALC_INTERVAL_MS),
            revert_after: RETURN_TO_OBSERVER_MS,
        }
    }

    #[inline]
    pub fn is_polling(&self) -> bool {
        matches!(self.mode, ObserveMode::Polling { .. })
    }

    /// Feed one batch's mutation score. May switch to polling mode.
    pub fn note_score(&mut self, score: u32, now: Millis) -> Option<ModeChange> {
        let threshold = self.threshold?;
        if self.is_polling() {
            return None;
        }
        if self.window.add(score, now) > threshold {
            self.mode = ObserveMode::Polling {
                revert_at: now + self.revert_after,
            };
            log::debug!("mutation score exceeded {threshold}, switching to selector polling");
            return Some(ModeChange::SwitchToPolling);
        }
        None
    }

    /// Called on every polling-mode sweep tick. May revert to observation.
    pub fn on_poll_tick(&mut self, now: Millis) -> Option<ModeChange> {
        match self.mode {
            ObserveMode::Polling { revert_at } if now >= revert_at => {
                self.mode = ObserveMode::Observing;
                log::debug!("returning to mutation observation");
                Some(ModeChange::ResumeObserving)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_dom::TreeDom;

    fn element_with<'a>(
        dom: &TreeDom,
        parent: &cw_dom::NodeHandle,
        tag: &str,
        attrs: &[(&'a str, &'a str)],
    ) -> cw_dom::NodeHandle {
        let node = dom.create_element(tag);
        for (name, value) in attrs {
            node.set_attr(name, value);
        }
        parent.append(&node);
        node
    }

    #[test]
    fn test_sweep_seeds_existing_content() {
        let dom = TreeDom::new();
        let body = dom.body();
        element_with(&dom, &body, "div", &[("id", "hero"), ("class", "wrap main")]);

        let mut collector = AttributeCollector::new();
        collector.sweep(&dom);

        assert_eq!(collector.pending().ids, vec!["hero".to_string()]);
        assert_eq!(
            collector.pending().classes,
            vec!["wrap".to_string(), "main".to_string()]
        );
    }

    #[test]
    fn test_values_are_collected_at_most_once() {
        let dom = TreeDom::new();
        let body = dom.body();
        let first = element_with(&dom, &body, "div", &[("class", "ad")]);
        let second = element_with(&dom, &body, "div", &[("class", "ad")]);

        let mut collector = AttributeCollector::new();
        collector.record_mutations(
            &dom,
            &[Mutation::ChildList {
                added: vec![first.clone(), second],
            }],
        );
        assert_eq!(collector.pending().classes, vec!["ad".to_string()]);

        // Even after the buffer is shipped, the value is never re-collected.
        collector.pending_mut().take();
        collector.record_mutations(
            &dom,
            &[Mutation::Attribute {
                target: first,
                kind: AttrKind::Class,
            }],
        );
        assert!(collector.pending().is_empty());
    }

    #[test]
    fn test_mutation_score_counts_class_list_length() {
        let dom = TreeDom::new();
        let body = dom.body();
        let node = element_with(&dom, &body, "div", &[("class", "a b c")]);

        let mut collector = AttributeCollector::new();
        let score = collector.record_mutations(
            &dom,
            &[
                Mutation::Attribute {
                    target: node.clone(),
                    kind: AttrKind::Class,
                },
                Mutation::Attribute {
                    target: node,
                    kind: AttrKind::Id,
                },
            ],
        );
        assert_eq!(score, 4);
    }

    #[test]
    fn test_added_subtree_descendants_are_collected() {
        let dom = TreeDom::new();
        let body = dom.body();
        let wrapper = element_with(&dom, &body, "div", &[("id", "outer")]);
        element_with(&dom, &wrapper, "span", &[("class", "inner")]);

        let mut collector = AttributeCollector::new();
        let score = collector.record_mutations(
            &dom,
            &[Mutation::ChildList {
                added: vec![wrapper],
            }],
        );

        assert_eq!(score, 2);
        assert_eq!(collector.pending().ids, vec!["outer".to_string()]);
        assert_eq!(collector.pending().classes, vec!["inner".to_string()]);
    }

    #[test]
    fn test_empty_attribute_values_are_skipped() {
        let dom = TreeDom::new();
        let body = dom.body();
        let node = element_with(&dom, &body, "div", &[("id", ""), ("class", "")]);

        let mut collector = AttributeCollector::new();
        collector.record_mutations(&dom, &[Mutation::ChildList { added: vec![node] }]);
        assert!(collector.pending().is_empty());
    }

    #[test]
    fn test_mode_switches_to_polling_above_threshold() {
        let mut mode = ObserveModeMachine::new(Some(400));
        assert_eq!(mode.note_score(300, 0), None);
        assert_eq!(mode.note_score(201, 400), Some(ModeChange::SwitchToPolling));
        assert!(mode.is_polling());
    }

    #[test]
    fn test_mode_score_resets_between_windows() {
        let mut mode = ObserveModeMachine::new(Some(400));
        assert_eq!(mode.note_score(300, 0), None);
        // The window rolled over, so the earlier 300 no longer counts.
        assert_eq!(mode.note_score(201, 1_500), None);
        assert!(!mode.is_polling());
    }

    #[test]
    fn test_mode_reverts_after_polling_duration() {
        let mut mode = ObserveModeMachine::new(Some(400));
        mode.note_score(500, 0);
        assert!(mode.is_polling());
        assert_eq!(mode.on_poll_tick(9_999), None);
        assert_eq!(mode.on_poll_tick(10_000), Some(ModeChange::ResumeObserving));
        assert!(!mode.is_polling());
    }

    #[test]
    fn test_mode_without_threshold_never_switches() {
        let mut mode = ObserveModeMachine::new(None);
        assert_eq!(mode.note_score(u32::MAX / 2, 0), None);
        assert!(!mode.is_polling());
    }
}
