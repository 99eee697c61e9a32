//! Scenario files: a page, a scripted mutation timeline, and a table-driven
//! fake engine, all in one JSON document.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use cw_core::config::PollerConfig;
use cw_core::engine::{EngineError, SelectorRequest, SelectorResponse, SelectorSource};
use cw_dom::{NodeHandle, TreeDom};

/// Error type for scenario loading.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode scenario: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("no element matches {0:?}")]
    NoSuchElement(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scenario {
    pub source_url: String,
    pub config: PollerConfig,
    pub engine: EngineTable,
    /// Children of `<body>` present before the poller starts.
    pub page: Vec<NodeSpec>,
    pub timeline: Vec<Step>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            source_url: "https://example.com/".to_string(),
            config: PollerConfig::default(),
            engine: EngineTable::default(),
            page: Vec::new(),
            timeline: Vec::new(),
        }
    }
}

impl Scenario {
    pub fn load(path: &str) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Build the initial page into a fresh tree.
    pub fn build_dom(&self) -> TreeDom {
        let dom = TreeDom::new();
        for spec in &self.page {
            let node = build_node(&dom, spec);
            dom.body().append(&node);
        }
        dom
    }
}

/// The fake engine: attribute value -> hide selectors.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineTable {
    pub ids: HashMap<String, Vec<String>>,
    pub classes: HashMap<String, Vec<String>>,
    pub aggressive_ids: HashMap<String, Vec<String>>,
    pub aggressive_classes: HashMap<String, Vec<String>>,
}

impl SelectorSource for EngineTable {
    fn hide_selectors_for(
        &mut self,
        request: &SelectorRequest,
    ) -> Result<SelectorResponse, EngineError> {
        let mut response = SelectorResponse::default();
        for id in &request.ids {
            if let Some(selectors) = self.ids.get(id) {
                response.standard_selectors.extend(selectors.iter().cloned());
            }
            if let Some(selectors) = self.aggressive_ids.get(id) {
                response
                    .aggressive_selectors
                    .extend(selectors.iter().cloned());
            }
        }
        for class in &request.classes {
            if let Some(selectors) = self.classes.get(class) {
                response.standard_selectors.extend(selectors.iter().cloned());
            }
            if let Some(selectors) = self.aggressive_classes.get(class) {
                response
                    .aggressive_selectors
                    .extend(selectors.iter().cloned());
            }
        }
        Ok(response)
    }
}

/// An element to create, with optional text and children.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSpec {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<NodeSpec>,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            tag: "div".to_string(),
            id: None,
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            text: None,
            children: Vec::new(),
        }
    }
}

/// Build a (detached) element tree from its spec.
pub fn build_node(dom: &TreeDom, spec: &NodeSpec) -> NodeHandle {
    let node = dom.create_element(&spec.tag);
    if let Some(id) = &spec.id {
        node.set_attr("id", id);
    }
    if !spec.classes.is_empty() {
        node.set_attr("class", &spec.classes.join(" "));
    }
    for (name, value) in &spec.attrs {
        node.set_attr(name, value);
    }
    if let Some(text) = &spec.text {
        node.append_text(text);
    }
    for child in &spec.children {
        let built = build_node(dom, child);
        node.append(&built);
    }
    node
}

/// One scripted step of the timeline.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Let the virtual clock run forward, firing due timers in order.
    AdvanceMs(u64),
    /// Append a new element under the first match of `parent`.
    Append { parent: String, node: NodeSpec },
    /// Set an attribute on the first match of `target`.
    SetAttribute {
        target: String,
        name: String,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_decodes_from_json() {
        let json = r##"{
            "sourceUrl": "https://news.example/",
            "config": {"fetchNewClassIdRulesThrottlingMs": 1000},
            "engine": {"classes": {"ad": [".ad"]}},
            "page": [{"tag": "div", "classes": ["ad"], "text": "Advertisement"}],
            "timeline": [
                {"advanceMs": 500},
                {"append": {"parent": "body", "node": {"id": "late"}}},
                {"setAttribute": {"target": "#late", "name": "class", "value": "promo"}}
            ]
        }"##;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.source_url, "https://news.example/");
        assert_eq!(scenario.page.len(), 1);
        assert_eq!(scenario.timeline.len(), 3);
        assert!(matches!(scenario.timeline[0], Step::AdvanceMs(500)));
    }

    #[test]
    fn test_build_dom_places_page_under_body() {
        let scenario: Scenario = serde_json::from_str(
            r#"{"page": [{"id": "a", "children": [{"tag": "span", "classes": ["x", "y"]}]}]}"#,
        )
        .unwrap();
        let dom = scenario.build_dom();
        use cw_core::dom::Dom;
        assert_eq!(dom.query_all("#a").len(), 1);
        assert_eq!(dom.query_all("span.x.y").len(), 1);
    }

    #[test]
    fn test_engine_table_answers_by_attribute_value() {
        let mut engine = EngineTable::default();
        engine.classes.insert("ad".to_string(), vec![".ad".to_string()]);
        engine
            .aggressive_ids
            .insert("sticky".to_string(), vec!["#sticky".to_string()]);

        let response = engine
            .hide_selectors_for(&SelectorRequest {
                source_url: "u".to_string(),
                ids: vec!["sticky".to_string(), "other".to_string()],
                classes: vec!["ad".to_string()],
            })
            .unwrap();
        assert_eq!(response.standard_selectors, vec![".ad".to_string()]);
        assert_eq!(response.aggressive_selectors, vec!["#sticky".to_string()]);
    }
}
