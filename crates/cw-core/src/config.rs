//! Configuration surface and tuning constants.
//!
//! [`PollerConfig`] is handed to the content script once at injection time.
//! All fields are optional on the wire; the constants below are the fixed
//! cadences of the poller itself and are not exposed to the injector.

use serde::{Deserialize, Serialize};

/// Width of the rolling window used to accumulate the mutation score.
pub const SCORE_CALC_INTERVAL_MS: u64 = 1_000;

/// How long polling mode runs before switching back to mutation observation.
pub const RETURN_TO_OBSERVER_MS: u64 = 10_000;

/// Default interval between full-document attribute sweeps in polling mode.
pub const SELECTORS_POLLING_INTERVAL_MS: u64 = 500;

/// Minimum sleep between two unhiding pump cycles.
pub const PUMP_INTERVAL_MIN_MS: u64 = 40;

/// Maximum latency before a scheduled pump runs even on a busy thread.
pub const PUMP_INTERVAL_MAX_MS: u64 = 1_000;

/// Maximum number of selectors evaluated per pump cycle.
pub const MAX_WORK_SIZE: usize = 60;

/// Interval of the host-side guard that keeps the injected style element the
/// last child of `<body>`.
pub const STYLE_GUARD_INTERVAL_MS: u64 = 1_000;

/// Interval of the host-side poll that waits for `document.body` to exist.
pub const WAIT_FOR_BODY_INTERVAL_MS: u64 = 500;

/// A custom (non-hiding) style rule supplied at injection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct StyleSelector {
    /// CSS selector the declarations apply to.
    pub selector: String,
    /// Raw CSS declarations, one per entry, without trailing `;`.
    pub rules: Vec<String>,
}

/// Injection-time configuration of the selector poller.
///
/// Mirrors the argument object the browser passes to the content script, so
/// field names serialize in camelCase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct PollerConfig {
    /// When set, every hide is permanent: no unhide bookkeeping at all.
    pub hide_first_party_content: bool,
    /// When set, skip attribute collection entirely; only the static
    /// selectors below apply.
    pub generic_hide: bool,
    /// Delay before the first DOM observation starts.
    pub first_selectors_polling_delay_ms: Option<u64>,
    /// Mutation score per rolling window above which the collector falls
    /// back to polling mode. Unset disables the fallback.
    pub switch_to_selectors_polling_threshold: Option<u32>,
    /// Minimum interval between calls to the native engine. Unset disables
    /// fetch throttling.
    pub fetch_new_class_id_rules_throttling_ms: Option<u64>,
    /// Interval between full-document sweeps while in polling mode.
    pub selectors_polling_interval_ms: Option<u64>,
    /// Selectors hidden unconditionally at startup.
    pub hide_selectors: Vec<String>,
    /// Custom style rules injected at startup, never subject to unhiding.
    pub style_selectors: Vec<StyleSelector>,
}

impl PollerConfig {
    /// Effective polling-mode sweep interval.
    #[inline]
    pub fn polling_interval_ms(&self) -> u64 {
        self.selectors_polling_interval_ms
            .unwrap_or(SELECTORS_POLLING_INTERVAL_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_permissive() {
        let cfg = PollerConfig::default();
        assert!(!cfg.hide_first_party_content);
        assert!(!cfg.generic_hide);
        assert!(cfg.switch_to_selectors_polling_threshold.is_none());
        assert!(cfg.fetch_new_class_id_rules_throttling_ms.is_none());
        assert_eq!(cfg.polling_interval_ms(), SELECTORS_POLLING_INTERVAL_MS);
    }

    #[test]
    fn test_config_wire_names_are_camel_case() {
        let json = r#"{
            "hideFirstPartyContent": true,
            "switchToSelectorsPollingThreshold": 400,
            "fetchNewClassIdRulesThrottlingMs": 1000,
            "hideSelectors": [".ad"],
            "styleSelectors": [{"selector": ".promo", "rules": ["opacity: 0.5"]}]
        }"#;
        let cfg: PollerConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.hide_first_party_content);
        assert_eq!(cfg.switch_to_selectors_polling_threshold, Some(400));
        assert_eq!(cfg.fetch_new_class_id_rules_throttling_ms, Some(1000));
        assert_eq!(cfg.hide_selectors, vec![".ad".to_string()]);
        assert_eq!(cfg.style_selectors[0].rules, vec!["opacity: 0.5".to_string()]);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let cfg: PollerConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.hide_selectors.is_empty());
        assert!(cfg.first_selectors_polling_delay_ms.is_none());
    }
}
