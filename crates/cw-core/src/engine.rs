//! Message types for the native-engine boundary.
//!
//! The poller never talks to the filtering engine directly: it produces a
//! [`SelectorRequest`], the host performs the round trip (a native message
//! on the browser, a table lookup in the simulator), and the response comes
//! back through the session. Transport failures are not an error condition
//! for the poller; they degrade to "no new selectors this round".

use serde::{Deserialize, Serialize};

/// A batch of not-yet-queried attribute values for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequest {
    /// URL of the page the attributes were collected on.
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    /// `id` attribute values, in collection order.
    pub ids: Vec<String>,
    /// Class names, in collection order.
    pub classes: Vec<String>,
}

/// The full outbound message, tagged with the token the native bridge
/// requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SelectorQuery {
    pub security_token: String,
    pub data: SelectorRequest,
}

/// Hide selectors the engine matched against a request.
///
/// Standard selectors are eligible for later unhiding; aggressive selectors
/// are hidden permanently. A missing response is equivalent to both lists
/// being empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-bindings", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorResponse {
    pub standard_selectors: Vec<String>,
    pub aggressive_selectors: Vec<String>,
}

impl SelectorResponse {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.standard_selectors.is_empty() && self.aggressive_selectors.is_empty()
    }
}

/// Error type for engine round trips.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine transport failed: {0}")]
    Transport(String),
    #[error("engine returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// A synchronous source of hide selectors, for hosts that can answer
/// in-process (the simulator's table-driven engine, test doubles). The
/// browser host awaits a Promise instead and feeds the response straight
/// into the session.
pub trait SelectorSource {
    fn hide_selectors_for(
        &mut self,
        request: &SelectorRequest,
    ) -> Result<SelectorResponse, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_with_source_url_tag() {
        let query = SelectorQuery {
            security_token: "token".to_string(),
            data: SelectorRequest {
                source_url: "https://example.com/".to_string(),
                ids: vec!["banner".to_string()],
                classes: vec!["ad".to_string()],
            },
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["securityToken"], "token");
        assert_eq!(json["data"]["sourceURL"], "https://example.com/");
        assert_eq!(json["data"]["ids"][0], "banner");
    }

    #[test]
    fn test_empty_response_decodes_from_empty_object() {
        let response: SelectorResponse = serde_json::from_str("{}").unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_response_decodes_selector_lists() {
        let response: SelectorResponse = serde_json::from_str(
            r##"{"standardSelectors": [".ad"], "aggressiveSelectors": ["#promo"]}"##,
        )
        .unwrap();
        assert_eq!(response.standard_selectors, vec![".ad".to_string()]);
        assert_eq!(response.aggressive_selectors, vec!["#promo".to_string()]);
    }
}
