//! The per-page poller session.
//!
//! One `PollerSession` is instantiated per page context and owns all poller
//! state: the collector, the fetch gate, the style registry, and the
//! unhiding scheduler. Hosts drive it from their event loop and pass every
//! timestamp in; the session never reads a clock and never blocks.
//!
//! # Host protocol
//!
//! - `start(now)` once `document.body` exists (after the configured
//!   first-observation delay, if any), then install the mutation observer.
//! - Feed observer batches to `on_mutations`, polling sweeps to
//!   `on_poll_tick`, and act on the returned [`SessionUpdate`]: perform the
//!   engine round trip for `fetch`, arm a timer for `fetch_retry_at`
//!   (calling `on_fetch_retry` when it fires), apply `mode_change` to the
//!   observer/interval, and arm the pump timer for `pump_at` (the host may
//!   also run the pump earlier when idle).
//! - Hand engine responses to `apply_fetch_response`.
//! - Call `pump` when the pump timer fires (or on idle), `cooldown_over`
//!   when the returned cooldown deadline passes, and re-render the style
//!   element whenever `take_stylesheet_dirty` reports a change.

use crate::collect::{AttributeCollector, ModeChange, Mutation, ObserveModeMachine};
use crate::config::{PollerConfig, PUMP_INTERVAL_MAX_MS, PUMP_INTERVAL_MIN_MS};
use crate::dom::Dom;
use crate::engine::{SelectorRequest, SelectorResponse};
use crate::gate::{FetchDecision, FetchGate};
use crate::style::StyleRegistry;
use crate::timing::{IdleDebounce, Millis};
use crate::unhide::UnhideScheduler;

/// What the host must do after feeding the session.
#[derive(Debug, Default)]
pub struct SessionUpdate {
    /// Perform this engine round trip and feed the response back.
    pub fetch: Option<SelectorRequest>,
    /// Arm a one-shot timer; call `on_fetch_retry` when it fires.
    pub fetch_retry_at: Option<Millis>,
    /// Reconfigure observation (observer vs. polling interval).
    pub mode_change: Option<ModeChange>,
    /// Run the pump no later than this (earlier if the thread goes idle).
    pub pump_at: Option<Millis>,
}

/// Result of a pump call.
#[derive(Debug, Default)]
pub struct PumpSchedule {
    pub did_work: bool,
    /// When set, call `cooldown_over` at this time to resume pumping.
    pub cooldown_until: Option<Millis>,
}

pub struct PollerSession<D: Dom> {
    dom: D,
    config: PollerConfig,
    source_url: String,
    collector: AttributeCollector,
    mode: ObserveModeMachine,
    gate: FetchGate,
    style: StyleRegistry,
    scheduler: UnhideScheduler,
    pump_idle: IdleDebounce,
    pump_sleeping: bool,
}

impl<D: Dom> PollerSession<D> {
    /// Create the session and apply the static configuration selectors.
    pub fn new(dom: D, source_url: impl Into<String>, config: PollerConfig) -> Self {
        let mut session = Self {
            mode: ObserveModeMachine::new(config.switch_to_selectors_polling_threshold),
            gate: FetchGate::new(config.fetch_new_class_id_rules_throttling_ms),
            collector: AttributeCollector::new(),
            style: StyleRegistry::new(),
            scheduler: UnhideScheduler::new(),
            pump_idle: IdleDebounce::new(PUMP_INTERVAL_MAX_MS),
            pump_sleeping: false,
            source_url: source_url.into(),
            config,
            dom,
        };

        let static_hides = session.config.hide_selectors.clone();
        session.apply_hide_selectors(&static_hides);
        let static_styles = session.config.style_selectors.clone();
        session.style.process_style_selectors(&static_styles);
        session
    }

    #[inline]
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    #[inline]
    pub fn dom(&self) -> &D {
        &self.dom
    }

    #[inline]
    pub fn style(&self) -> &StyleRegistry {
        &self.style
    }

    #[inline]
    pub fn scheduler(&self) -> &UnhideScheduler {
        &self.scheduler
    }

    #[inline]
    pub fn is_polling(&self) -> bool {
        self.mode.is_polling()
    }

    /// Seed the collector from the existing document and attempt the first
    /// fetch. With `generic_hide` set, collection is skipped entirely and
    /// only the static selectors apply.
    pub fn start(&mut self, now: Millis) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        if !self.config.generic_hide {
            self.collector.sweep(&self.dom);
            self.try_fetch(now, &mut update);
        }
        update.pump_at = self.request_pump(now);
        update
    }

    /// Ingest one mutation-observer batch.
    pub fn on_mutations(&mut self, records: &[Mutation<D::Node>], now: Millis) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        if self.config.generic_hide {
            return update;
        }

        let score = self.collector.record_mutations(&self.dom, records);
        if score > 0 {
            self.try_fetch(now, &mut update);
        }
        update.mode_change = self.mode.note_score(score, now);
        update
    }

    /// One polling-mode sweep tick.
    pub fn on_poll_tick(&mut self, now: Millis) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        if self.config.generic_hide {
            return update;
        }

        self.collector.sweep(&self.dom);
        self.try_fetch(now, &mut update);
        update.mode_change = self.mode.on_poll_tick(now);
        update
    }

    /// The deferred fetch-retry timer fired.
    pub fn on_fetch_retry(&mut self, now: Millis) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        self.gate.retry_due();
        self.try_fetch(now, &mut update);
        update
    }

    /// Apply an engine response. `None` (transport failure or falsy
    /// response) means "no new selectors this round".
    pub fn apply_fetch_response(
        &mut self,
        response: Option<SelectorResponse>,
        now: Millis,
    ) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        let Some(response) = response else {
            log::warn!("selector fetch yielded no response; keeping current rules");
            return update;
        };
        if response.is_empty() {
            return update;
        }

        let standard = self.vet_selectors(&response.standard_selectors);
        let aggressive = self.vet_selectors(&response.aggressive_selectors);

        let newly_hidden = self.apply_hide_selectors(&standard);
        self.style
            .process_hide_selectors(&aggressive, self.scheduler.exemptions());

        if !newly_hidden.is_empty() {
            update.pump_at = self.request_pump(now);
        }
        update
    }

    /// Arm the idle-biased pump debounce. Returns the max-latency deadline
    /// when newly armed.
    pub fn request_pump(&mut self, now: Millis) -> Option<Millis> {
        if self.config.hide_first_party_content {
            return None;
        }
        self.pump_idle.schedule(now)
    }

    /// Whether an armed pump reached its max-latency deadline.
    #[inline]
    pub fn pump_is_due(&self, now: Millis) -> bool {
        self.pump_idle.due(now)
    }

    /// Run one pump cycle. Refused while the previous cycle's cooldown is
    /// pending, so at most one DOM scan runs at a time.
    pub fn pump(&mut self, now: Millis) -> PumpSchedule {
        if self.pump_sleeping {
            return PumpSchedule::default();
        }
        self.pump_idle.disarm();

        let outcome = self.scheduler.pump(&self.dom, &mut self.style);
        let mut schedule = PumpSchedule {
            did_work: outcome.did_work,
            cooldown_until: None,
        };
        if outcome.did_work {
            self.pump_sleeping = true;
            schedule.cooldown_until = Some(now + PUMP_INTERVAL_MIN_MS);
        }
        schedule
    }

    /// The cooldown deadline passed; pumping may resume. Returns the next
    /// pump deadline.
    pub fn cooldown_over(&mut self, now: Millis) -> Option<Millis> {
        self.pump_sleeping = false;
        self.request_pump(now)
    }

    /// Current text for the injected style element.
    pub fn stylesheet_text(&self) -> String {
        self.style.stylesheet_text()
    }

    /// Whether the stylesheet changed since the host last rendered it.
    pub fn take_stylesheet_dirty(&mut self) -> bool {
        self.style.take_dirty()
    }

    fn try_fetch(&mut self, now: Millis, update: &mut SessionUpdate) {
        match self
            .gate
            .try_fetch(now, &self.source_url, self.collector.pending_mut())
        {
            FetchDecision::Dispatch(request) => update.fetch = Some(request),
            FetchDecision::Defer { retry_at } => update.fetch_retry_at = Some(retry_at),
            FetchDecision::Absorbed | FetchDecision::Idle => {}
        }
    }

    /// Hide the given selectors and register them for re-evaluation unless
    /// unhiding is disabled. Returns the selectors newly hidden.
    fn apply_hide_selectors(&mut self, selectors: &[String]) -> Vec<String> {
        let added = self
            .style
            .process_hide_selectors(selectors, self.scheduler.exemptions());
        if !self.config.hide_first_party_content {
            self.scheduler.enqueue_new(&added);
        }
        added
    }

    /// Drop selectors this host cannot evaluate; they would break the
    /// combined pump queries and the stylesheet along with them.
    fn vet_selectors(&mut self, selectors: &[String]) -> Vec<String> {
        let mut vetted = Vec::with_capacity(selectors.len());
        for selector in selectors {
            if self.dom.selector_is_valid(selector) {
                vetted.push(selector.clone());
            } else {
                log::warn!("quarantining unparseable selector {selector:?}");
                self.scheduler.purge(selector);
                self.style.unhide_selectors(std::iter::once(selector));
            }
        }
        vetted
    }
}
