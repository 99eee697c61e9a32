//! The multi-stage unhiding scheduler.
//!
//! Hiding is deliberately eager; this module bounds the false-positive rate
//! by re-testing hidden selectors against the live DOM and retracting hides
//! that match first-party content. Selectors move through three run queues:
//! a fresh selector is evaluated from the first queue, requeued into the
//! second and then the final queue while its matches stay third-party, and
//! dropped for good after the final evaluation. Three evaluations is the
//! lifetime cap for any selector.

use std::collections::HashSet;

use indexmap::IndexSet;

use crate::config::MAX_WORK_SIZE;
use crate::dom::Dom;
use crate::party::{classify, shows_significant_text, Party, TextSignificance};
use crate::style::StyleRegistry;

const QUEUE_COUNT: usize = 3;

/// Result of one pump cycle.
#[derive(Debug, Default)]
pub struct PumpOutcome {
    /// Whether any queue had selectors to evaluate.
    pub did_work: bool,
    /// Selectors proven first-party this cycle, already retracted from the
    /// style registry.
    pub unhidden: Vec<String>,
}

#[derive(Debug)]
pub struct UnhideScheduler {
    /// First, second, and final run queues. A selector lives in at most one
    /// of them at a time.
    run_queues: [IndexSet<String>; QUEUE_COUNT],
    /// Selectors that reached a first-party verdict once; never hidden or
    /// requeued again.
    already_unhidden: HashSet<String>,
    text_gate: TextSignificance,
}

impl Default for UnhideScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl UnhideScheduler {
    pub fn new() -> Self {
        Self {
            run_queues: Default::default(),
            already_unhidden: HashSet::new(),
            text_gate: TextSignificance::default(),
        }
    }

    /// Register freshly hidden selectors for re-evaluation. Exempted
    /// selectors and selectors already queued anywhere are not re-added.
    pub fn enqueue_new<'a, I>(&mut self, selectors: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for selector in selectors {
            if self.already_unhidden.contains(selector) || self.is_queued(selector) {
                continue;
            }
            self.run_queues[0].insert(selector.clone());
        }
    }

    /// The permanent exemption set, for the style registry's hide filter.
    #[inline]
    pub fn exemptions(&self) -> &HashSet<String> {
        &self.already_unhidden
    }

    #[inline]
    pub fn is_exempt(&self, selector: &str) -> bool {
        self.already_unhidden.contains(selector)
    }

    /// Whether the selector sits in any run queue.
    pub fn is_queued(&self, selector: &str) -> bool {
        self.run_queues.iter().any(|queue| queue.contains(selector))
    }

    /// Whether any queue has work left.
    pub fn has_work(&self) -> bool {
        self.run_queues.iter().any(|queue| !queue.is_empty())
    }

    /// Drop a selector from every queue and exempt it from future hiding.
    /// Used to quarantine selectors the host cannot evaluate.
    pub fn purge(&mut self, selector: &str) {
        for queue in &mut self.run_queues {
            queue.shift_remove(selector);
        }
        self.already_unhidden.insert(selector.to_string());
    }

    /// Run one pump cycle.
    ///
    /// Only the first non-empty queue is processed: queues behind it starve
    /// until it drains, which both bounds per-cycle cost and gives newly
    /// hidden selectors priority. Up to [`MAX_WORK_SIZE`] selectors are
    /// taken, matched in one combined query, and each matching element is
    /// classified once; elements already known first-party are skipped.
    pub fn pump<D: Dom>(&mut self, dom: &D, style: &mut StyleRegistry) -> PumpOutcome {
        let mut outcome = PumpOutcome::default();

        for queue_index in 0..QUEUE_COUNT {
            if self.run_queues[queue_index].is_empty() {
                continue;
            }

            let workload: Vec<String> = self.run_queues[queue_index]
                .iter()
                .take(MAX_WORK_SIZE)
                .cloned()
                .collect();
            let combined = workload.join(",");
            let matched = dom.query_all(&combined);
            log::debug!(
                "pump: queue {} evaluating {} selectors against {} elements",
                queue_index,
                workload.len(),
                matched.len()
            );

            let mut newly_unhidden: Vec<String> = Vec::new();
            for element in &matched {
                if dom.is_known_first_party(element) {
                    continue;
                }

                match classify(dom, element) {
                    Party::KnownThirdPartyAd | Party::ThirdParty => continue,
                    Party::FirstParty => {}
                }
                if !shows_significant_text(dom, element, self.text_gate) {
                    continue;
                }

                // The subtree is first-party; retract every workload
                // selector that actually matches it.
                for selector in &workload {
                    if !dom.matches(element, selector) {
                        continue;
                    }
                    if self.already_unhidden.insert(selector.clone()) {
                        newly_unhidden.push(selector.clone());
                    }
                }
                dom.mark_known_first_party(element);
            }

            style.unhide_selectors(&newly_unhidden);

            for selector in &workload {
                self.run_queues[queue_index].shift_remove(selector);
                if queue_index + 1 < QUEUE_COUNT && !self.already_unhidden.contains(selector) {
                    self.run_queues[queue_index + 1].insert(selector.clone());
                }
            }

            outcome.did_work = true;
            outcome.unhidden = newly_unhidden;
            break;
        }

        outcome
    }

    #[cfg(test)]
    fn queue_len(&self, index: usize) -> usize {
        self.run_queues[index].len()
    }
}
