//! The throttled fetch gate in front of the native engine.
//!
//! Converts pending attribute values into a [`SelectorRequest`] and bounds
//! the call volume the engine sees. The pending buffers are swapped out
//! synchronously at dispatch time, so attributes collected while a round
//! trip is in flight accumulate in a fresh buffer and are never re-sent.

use crate::collect::PendingAttributes;
use crate::engine::SelectorRequest;
use crate::timing::Millis;

/// Outcome of a fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// Nothing pending; no call was made.
    Idle,
    /// Perform the round trip for this request now.
    Dispatch(SelectorRequest),
    /// Throttled: the host must retry at `retry_at`.
    Defer { retry_at: Millis },
    /// Throttled, and a deferred retry is already scheduled.
    Absorbed,
}

/// Enforces at most one engine call per configured interval.
///
/// When unconfigured (`throttle_ms == None`), every attempt with pending
/// work dispatches immediately.
#[derive(Debug)]
pub struct FetchGate {
    throttle_ms: Option<Millis>,
    last_dispatch_at: Option<Millis>,
    retry_scheduled: bool,
}

impl FetchGate {
    pub fn new(throttle_ms: Option<Millis>) -> Self {
        Self {
            throttle_ms,
            last_dispatch_at: None,
            retry_scheduled: false,
        }
    }

    /// Attempt a fetch at time `now`.
    ///
    /// On `Dispatch`, `pending` has been cleared and its contents captured
    /// into the returned request. On `Defer`/`Absorbed`, `pending` is left
    /// intact for the retry.
    pub fn try_fetch(
        &mut self,
        now: Millis,
        source_url: &str,
        pending: &mut PendingAttributes,
    ) -> FetchDecision {
        if pending.is_empty() {
            return FetchDecision::Idle;
        }

        if let Some(throttle) = self.throttle_ms {
            if let Some(last) = self.last_dispatch_at {
                let ready_at = last + throttle;
                if now < ready_at {
                    if self.retry_scheduled {
                        return FetchDecision::Absorbed;
                    }
                    self.retry_scheduled = true;
                    return FetchDecision::Defer { retry_at: ready_at };
                }
            }
        }

        self.last_dispatch_at = Some(now);
        let batch = pending.take();
        log::debug!(
            "dispatching selector fetch: {} ids, {} classes",
            batch.ids.len(),
            batch.classes.len()
        );
        FetchDecision::Dispatch(SelectorRequest {
            source_url: source_url.to_string(),
            ids: batch.ids,
            classes: batch.classes,
        })
    }

    /// The host's deferred-retry timer fired; the next `try_fetch` is the
    /// retry itself.
    #[inline]
    pub fn retry_due(&mut self) {
        self.retry_scheduled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(ids: &[&str], classes: &[&str]) -> PendingAttributes {
        PendingAttributes {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            classes: classes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_pending_is_a_noop() {
        let mut gate = FetchGate::new(Some(1_000));
        let mut buffer = PendingAttributes::default();
        assert_eq!(
            gate.try_fetch(0, "https://example.com/", &mut buffer),
            FetchDecision::Idle
        );
    }

    #[test]
    fn test_dispatch_captures_and_clears_pending() {
        let mut gate = FetchGate::new(None);
        let mut buffer = pending(&["banner"], &["ad", "promo"]);

        match gate.try_fetch(5, "https://example.com/", &mut buffer) {
            FetchDecision::Dispatch(request) => {
                assert_eq!(request.source_url, "https://example.com/");
                assert_eq!(request.ids, vec!["banner".to_string()]);
                assert_eq!(request.classes, vec!["ad".to_string(), "promo".to_string()]);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_unthrottled_gate_always_dispatches() {
        let mut gate = FetchGate::new(None);
        let mut buffer = pending(&["a"], &[]);
        assert!(matches!(
            gate.try_fetch(0, "u", &mut buffer),
            FetchDecision::Dispatch(_)
        ));
        let mut buffer = pending(&["b"], &[]);
        assert!(matches!(
            gate.try_fetch(1, "u", &mut buffer),
            FetchDecision::Dispatch(_)
        ));
    }

    #[test]
    fn test_throttle_defers_then_absorbs() {
        let mut gate = FetchGate::new(Some(1_000));

        let mut buffer = pending(&["a"], &[]);
        assert!(matches!(
            gate.try_fetch(0, "u", &mut buffer),
            FetchDecision::Dispatch(_)
        ));

        // Second attempt 100ms later: one deferred retry at the 1000ms mark.
        let mut buffer = pending(&["b"], &[]);
        assert_eq!(
            gate.try_fetch(100, "u", &mut buffer),
            FetchDecision::Defer { retry_at: 1_000 }
        );
        assert!(!buffer.is_empty());

        // Further attempts while the retry is pending are absorbed.
        assert_eq!(gate.try_fetch(150, "u", &mut buffer), FetchDecision::Absorbed);

        // The retry itself goes through.
        gate.retry_due();
        assert!(matches!(
            gate.try_fetch(1_000, "u", &mut buffer),
            FetchDecision::Dispatch(_)
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_throttle_allows_dispatch_after_interval() {
        let mut gate = FetchGate::new(Some(1_000));
        let mut buffer = pending(&["a"], &[]);
        assert!(matches!(
            gate.try_fetch(0, "u", &mut buffer),
            FetchDecision::Dispatch(_)
        ));

        let mut buffer = pending(&["b"], &[]);
        assert!(matches!(
            gate.try_fetch(1_000, "u", &mut buffer),
            FetchDecision::Dispatch(_)
        ));
    }
}
