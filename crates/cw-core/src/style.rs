//! The hide/style rule registry backing the injected stylesheet.
//!
//! Owns the CSS text of exactly one `<style>` element. Rules live in an
//! append-only vector where removal leaves a hole (`None`) so that the
//! indices recorded for every other selector stay valid; slots are never
//! reused.

use std::collections::{HashMap, HashSet};

use crate::config::StyleSelector;

#[derive(Debug, Default)]
pub struct StyleRegistry {
    /// Ordered rule texts; holes mark removed rules.
    rules: Vec<Option<String>>,
    /// Hide selector -> index of its rule. Every value points at a `Some`
    /// slot; map entry and slot are cleared together.
    hide_index: HashMap<String, usize>,
    dirty: bool,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append hide rules for every selector not yet mapped and not in the
    /// exemption set. Returns the selectors actually added, in order, for
    /// the caller to register with the unhiding scheduler (or not, for
    /// selectors that must stay hidden permanently).
    pub fn process_hide_selectors(
        &mut self,
        selectors: &[String],
        exempt: &HashSet<String>,
    ) -> Vec<String> {
        let mut added = Vec::new();
        for selector in selectors {
            if exempt.contains(selector) || self.hide_index.contains_key(selector) {
                continue;
            }
            let index = self.push_rule(format!("{selector}{{display:none!important}}"));
            self.hide_index.insert(selector.clone(), index);
            added.push(selector.clone());
        }
        if !added.is_empty() {
            self.dirty = true;
        }
        added
    }

    /// Append custom style rules. These carry no map entry and are never
    /// subject to unhiding.
    pub fn process_style_selectors(&mut self, entries: &[StyleSelector]) {
        for entry in entries {
            if entry.rules.is_empty() {
                continue;
            }
            let declarations = entry.rules.join(";");
            self.push_rule(format!("{}{{{declarations};}}", entry.selector));
            self.dirty = true;
        }
    }

    /// Remove the hide rules for the given selectors. Slots become holes;
    /// no other selector's index moves.
    pub fn unhide_selectors<'a, I>(&mut self, selectors: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for selector in selectors {
            if let Some(index) = self.hide_index.remove(selector) {
                self.rules[index] = None;
                self.dirty = true;
            }
        }
    }

    /// Whether a hide rule for this selector is currently active.
    #[inline]
    pub fn is_hidden(&self, selector: &str) -> bool {
        self.hide_index.contains_key(selector)
    }

    /// All currently hidden selectors, sorted for stable reporting.
    pub fn hidden_selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = self.hide_index.keys().cloned().collect();
        selectors.sort();
        selectors
    }

    /// Index of the selector's rule slot, for invariant checks.
    #[inline]
    pub fn rule_index(&self, selector: &str) -> Option<usize> {
        self.hide_index.get(selector).copied()
    }

    /// Render the full rule list as stylesheet text, skipping holes and any
    /// rule text beginning with `:` (a malformed selector would take the
    /// whole sheet down with it).
    pub fn stylesheet_text(&self) -> String {
        self.rules
            .iter()
            .flatten()
            .filter(|rule| !rule.starts_with(':'))
            .cloned()
            .collect()
    }

    /// Whether the stylesheet changed since the last render, clearing the
    /// flag.
    #[inline]
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn push_rule(&mut self, rule: String) -> usize {
        let index = self.rules.len();
        self.rules.push(Some(rule));
        index
    }
}
