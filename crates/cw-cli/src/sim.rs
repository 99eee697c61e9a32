//! The deterministic simulator.
//!
//! Drives a [`PollerSession`] over a [`TreeDom`] on a virtual clock,
//! standing in for the browser's event loop: observer batches are
//! synthesized from timeline steps, and the session's returned deadlines
//! (fetch retries, pump runs, cooldowns, polling sweeps) become simulated
//! timers fired in timestamp order.

use serde::Serialize;

use cw_core::collect::{AttrKind, ModeChange, Mutation};
use cw_core::engine::SelectorSource;
use cw_core::session::{PollerSession, SessionUpdate};
use cw_core::timing::Millis;
use cw_dom::TreeDom;

use crate::scenario::{build_node, Scenario, ScenarioError, Step};

/// What a simulation run observed, for reporting.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimReport {
    /// Virtual time when the run settled.
    pub settled_at_ms: Millis,
    pub engine_calls: usize,
    /// Every id/class ever shipped to the engine, in order.
    pub queried_ids: Vec<String>,
    pub queried_classes: Vec<String>,
    /// Selectors with an active hide rule when the run settled.
    pub hidden: Vec<String>,
    /// Selectors proven first-party and permanently exempted.
    pub unhidden: Vec<String>,
    /// Mode transitions, as `"<ms>: polling"` / `"<ms>: observing"`.
    pub mode_log: Vec<String>,
    pub stylesheet: String,
}

pub struct Simulator {
    session: PollerSession<TreeDom>,
    engine: crate::scenario::EngineTable,
    now: Millis,
    poll_interval: Millis,
    // Pending one-shot timers.
    fetch_retry_at: Option<Millis>,
    pump_at: Option<Millis>,
    cooldown_at: Option<Millis>,
    next_poll_at: Option<Millis>,
    report: SimReport,
}

impl Simulator {
    pub fn new(scenario: Scenario) -> Self {
        let dom = scenario.build_dom();
        let poll_interval = scenario.config.polling_interval_ms();
        let session = PollerSession::new(dom, scenario.source_url.clone(), scenario.config);
        Self {
            session,
            engine: scenario.engine,
            now: 0,
            poll_interval,
            fetch_retry_at: None,
            pump_at: None,
            cooldown_at: None,
            next_poll_at: None,
            report: SimReport::default(),
        }
    }

    pub fn start(&mut self) {
        let update = self.session.start(self.now);
        self.handle_update(update);
    }

    /// Execute one timeline step.
    pub fn apply_step(&mut self, step: &Step) -> Result<(), ScenarioError> {
        match step {
            Step::AdvanceMs(ms) => self.advance(self.now + ms),
            Step::Append { parent, node } => {
                let parent_node = self
                    .query_first(parent)
                    .ok_or_else(|| ScenarioError::NoSuchElement(parent.clone()))?;
                let built = build_node(self.session.dom(), node);
                parent_node.append(&built);
                self.observe(Mutation::ChildList { added: vec![built] });
            }
            Step::SetAttribute {
                target,
                name,
                value,
            } => {
                let node = self
                    .query_first(target)
                    .ok_or_else(|| ScenarioError::NoSuchElement(target.clone()))?;
                node.set_attr(name, value);
                let kind = match name.as_str() {
                    "id" => Some(AttrKind::Id),
                    "class" => Some(AttrKind::Class),
                    // The observer filters on id/class; other attributes
                    // mutate silently.
                    _ => None,
                };
                if let Some(kind) = kind {
                    self.observe(Mutation::Attribute { target: node, kind });
                }
            }
        }
        Ok(())
    }

    /// Fire due timers until `deadline`, then set the clock to it.
    pub fn advance(&mut self, deadline: Millis) {
        while let Some((at, timer)) = self.next_timer() {
            if at > deadline {
                break;
            }
            self.now = at;
            self.fire(timer);
        }
        self.now = deadline;
    }

    /// Advance until no timers remain or the budget is exhausted.
    pub fn settle(&mut self, budget: Millis) {
        let limit = self.now + budget;
        while let Some((at, timer)) = self.next_timer() {
            if at > limit {
                break;
            }
            self.now = at;
            self.fire(timer);
        }
    }

    /// Finish the run and produce the report.
    pub fn into_report(mut self) -> SimReport {
        self.report.settled_at_ms = self.now;
        self.report.hidden = self.session.style().hidden_selectors();
        let mut unhidden: Vec<String> = self
            .session
            .scheduler()
            .exemptions()
            .iter()
            .cloned()
            .collect();
        unhidden.sort();
        self.report.unhidden = unhidden;
        self.report.stylesheet = self.session.stylesheet_text();
        self.report
    }

    fn observe(&mut self, mutation: Mutation<cw_dom::NodeHandle>) {
        // In polling mode the observer is disconnected; the sweep interval
        // picks the change up instead.
        if self.session.is_polling() {
            return;
        }
        let update = self.session.on_mutations(&[mutation], self.now);
        self.handle_update(update);
    }

    fn query_first(&self, selector: &str) -> Option<cw_dom::NodeHandle> {
        use cw_core::dom::Dom;
        if selector == "body" {
            return Some(self.session.dom().body());
        }
        self.session.dom().query_all(selector).into_iter().next()
    }

    fn handle_update(&mut self, update: SessionUpdate) {
        if let Some(request) = update.fetch {
            self.report.engine_calls += 1;
            self.report.queried_ids.extend(request.ids.iter().cloned());
            self.report
                .queried_classes
                .extend(request.classes.iter().cloned());

            let response = match self.engine.hide_selectors_for(&request) {
                Ok(response) => Some(response),
                Err(error) => {
                    log::warn!("engine call failed: {error}");
                    None
                }
            };
            let follow_up = self.session.apply_fetch_response(response, self.now);
            self.handle_update(follow_up);
        }

        if let Some(retry_at) = update.fetch_retry_at {
            self.fetch_retry_at = Some(retry_at);
        }

        match update.mode_change {
            Some(ModeChange::SwitchToPolling) => {
                self.report.mode_log.push(format!("{}: polling", self.now));
                self.next_poll_at = Some(self.now + self.poll_interval);
            }
            Some(ModeChange::ResumeObserving) => {
                self.report.mode_log.push(format!("{}: observing", self.now));
                self.next_poll_at = None;
            }
            None => {}
        }

        if let Some(pump_at) = update.pump_at {
            self.pump_at = Some(pump_at);
        }
    }

    fn next_timer(&self) -> Option<(Millis, Timer)> {
        let candidates = [
            (self.fetch_retry_at, Timer::FetchRetry),
            (self.pump_at, Timer::Pump),
            (self.cooldown_at, Timer::Cooldown),
            (self.next_poll_at, Timer::PollTick),
        ];
        candidates
            .into_iter()
            .filter_map(|(at, timer)| at.map(|at| (at, timer)))
            .min_by_key(|(at, _)| *at)
    }

    fn fire(&mut self, timer: Timer) {
        match timer {
            Timer::FetchRetry => {
                self.fetch_retry_at = None;
                let update = self.session.on_fetch_retry(self.now);
                self.handle_update(update);
            }
            Timer::Pump => {
                self.pump_at = None;
                let schedule = self.session.pump(self.now);
                if let Some(cooldown_until) = schedule.cooldown_until {
                    self.cooldown_at = Some(cooldown_until);
                }
            }
            Timer::Cooldown => {
                self.cooldown_at = None;
                if let Some(pump_at) = self.session.cooldown_over(self.now) {
                    self.pump_at = Some(pump_at);
                }
            }
            Timer::PollTick => {
                let update = self.session.on_poll_tick(self.now);
                self.next_poll_at = if self.session.is_polling() {
                    Some(self.now + self.poll_interval)
                } else {
                    None
                };
                self.handle_update(update);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    FetchRetry,
    Pump,
    Cooldown,
    PollTick,
}

/// Convenience wrapper: build, start, play the timeline, settle, report.
pub fn run_scenario(mut scenario: Scenario, settle_ms: Millis) -> Result<SimReport, ScenarioError> {
    let timeline = std::mem::take(&mut scenario.timeline);
    let mut simulator = Simulator::new(scenario);
    simulator.start();
    for step in &timeline {
        simulator.apply_step(step)?;
    }
    simulator.settle(settle_ms);
    Ok(simulator.into_report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;

    fn run(json: &str) -> SimReport {
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        run_scenario(scenario, 30_000).unwrap()
    }

    #[test]
    fn test_ad_is_hidden_and_stays_hidden() {
        let report = run(
            r#"{
                "engine": {"classes": {"ad": [".ad"]}},
                "page": [{
                    "classes": ["ad"],
                    "children": [{"tag": "img", "attrs": {"src": "https://ads.example.net/a.png"}}]
                }]
            }"#,
        );
        assert_eq!(report.engine_calls, 1);
        assert_eq!(report.queried_classes, vec!["ad".to_string()]);
        assert_eq!(report.hidden, vec![".ad".to_string()]);
        assert!(report.unhidden.is_empty());
        assert_eq!(report.stylesheet, ".ad{display:none!important}");
    }

    #[test]
    fn test_first_party_content_is_unhidden() {
        let report = run(
            r#"{
                "engine": {"classes": {"sidebar": [".sidebar"]}},
                "page": [{
                    "classes": ["sidebar"],
                    "text": "a rather long paragraph of genuine article text"
                }]
            }"#,
        );
        assert!(report.hidden.is_empty());
        assert_eq!(report.unhidden, vec![".sidebar".to_string()]);
        assert_eq!(report.stylesheet, "");
    }

    #[test]
    fn test_throttled_burst_produces_two_calls() {
        let report = run(
            r#"{
                "config": {"fetchNewClassIdRulesThrottlingMs": 1000},
                "engine": {},
                "page": [{"classes": ["one"]}],
                "timeline": [
                    {"advanceMs": 100},
                    {"append": {"parent": "body", "node": {"classes": ["two"]}}},
                    {"advanceMs": 2000}
                ]
            }"#,
        );
        assert_eq!(report.engine_calls, 2);
        assert_eq!(
            report.queried_classes,
            vec!["one".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn test_mutation_storm_switches_to_polling_and_back() {
        let mut steps = Vec::new();
        for i in 0..500 {
            steps.push(format!(
                r#"{{"append": {{"parent": "body", "node": {{"id": "gen-{i}"}}}}}}"#
            ));
        }
        steps.push(r#"{"advanceMs": 15000}"#.to_string());
        let json = format!(
            r#"{{
                "config": {{"switchToSelectorsPollingThreshold": 400}},
                "page": [],
                "timeline": [{}]
            }}"#,
            steps.join(",")
        );
        let report = run(&json);
        assert_eq!(report.mode_log.len(), 2);
        assert!(report.mode_log[0].ends_with("polling"));
        assert!(report.mode_log[1].ends_with("observing"));
        // Every id still reached the engine exactly once.
        assert_eq!(report.queried_ids.len(), 500);
    }

    #[test]
    fn test_polling_mode_picks_up_unobserved_changes() {
        let mut steps = Vec::new();
        for i in 0..401 {
            steps.push(format!(
                r#"{{"append": {{"parent": "body", "node": {{"id": "gen-{i}"}}}}}}"#
            ));
        }
        // While polling, the observer is off; this change is found by sweep.
        steps.push(
            r#"{"append": {"parent": "body", "node": {"classes": ["quiet"]}}}"#.to_string(),
        );
        steps.push(r#"{"advanceMs": 2000}"#.to_string());
        let json = format!(
            r#"{{
                "config": {{"switchToSelectorsPollingThreshold": 400}},
                "timeline": [{}]
            }}"#,
            steps.join(",")
        );
        let report = run(&json);
        assert!(report.queried_classes.contains(&"quiet".to_string()));
    }
}
