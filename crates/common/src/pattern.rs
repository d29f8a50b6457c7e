//! Expected-event patterns and match-strength classification
//!
//! A pattern describes the backend effect a UI action is expected to
//! produce. The correlator ranks candidate events by how strongly they
//! match: exact (every specified field agrees) beats partial (URL
//! substring only, method absent or disagreeing).

use serde::{Deserialize, Serialize};

use crate::types::{EventDescriptor, ObservedEvent};

/// How strongly an event matches a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrength {
    None,
    Partial,
    Exact,
}

/// Descriptor pattern for one expected observed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EventPattern {
    /// Network response whose URL contains `url_contains`; `method`
    /// narrows the match to exact when it agrees.
    Network {
        #[serde(default)]
        method: Option<String>,
        url_contains: String,
    },

    /// DOM text on `selector`. `text_contains` must be present in the
    /// observed text, `not_text_contains` must be absent; both are used
    /// together to express loading-marker transitions.
    Dom {
        selector: String,
        #[serde(default)]
        text_contains: Option<String>,
        #[serde(default)]
        not_text_contains: Option<String>,
    },

    /// Storage write to `key`.
    Storage {
        key: String,
        #[serde(default)]
        value_contains: Option<String>,
    },
}

impl EventPattern {
    /// Convenience constructor for the common network case.
    pub fn network(method: impl Into<String>, url_contains: impl Into<String>) -> Self {
        EventPattern::Network {
            method: Some(method.into()),
            url_contains: url_contains.into(),
        }
    }

    /// Classify how strongly `event` matches this pattern.
    ///
    /// Matching is descriptor-only: payloads are classified later by the
    /// correlator, so raw-bytes events still match here.
    pub fn match_strength(&self, event: &ObservedEvent) -> MatchStrength {
        match (self, &event.descriptor) {
            (
                EventPattern::Network { method, url_contains },
                EventDescriptor::Network { method: ev_method, url },
            ) => {
                if !url.contains(url_contains.as_str()) {
                    return MatchStrength::None;
                }
                match method {
                    Some(m) if m.eq_ignore_ascii_case(ev_method) => MatchStrength::Exact,
                    Some(_) => MatchStrength::Partial,
                    None => MatchStrength::Exact,
                }
            }
            (
                EventPattern::Dom { selector, text_contains, not_text_contains },
                EventDescriptor::Dom { selector: ev_selector, text },
            ) => {
                if selector != ev_selector {
                    return MatchStrength::None;
                }
                if let Some(needle) = text_contains {
                    if !text.contains(needle.as_str()) {
                        return MatchStrength::None;
                    }
                }
                if let Some(absent) = not_text_contains {
                    // A transition away from a marker needs content to
                    // transition to; an absent or empty element is not
                    // "populated".
                    if text.is_empty() || text.contains(absent.as_str()) {
                        return MatchStrength::None;
                    }
                }
                MatchStrength::Exact
            }
            (
                EventPattern::Storage { key, value_contains },
                EventDescriptor::Storage { key: ev_key },
            ) => {
                if key != ev_key {
                    return MatchStrength::None;
                }
                if let Some(needle) = value_contains {
                    let in_payload = match &event.payload {
                        crate::types::EventPayload::Text(value) => value.contains(needle.as_str()),
                        crate::types::EventPayload::Json(value) => {
                            value.to_string().contains(needle.as_str())
                        }
                        _ => false,
                    };
                    if !in_payload {
                        return MatchStrength::None;
                    }
                }
                MatchStrength::Exact
            }
            _ => MatchStrength::None,
        }
    }

    pub fn matches(&self, event: &ObservedEvent) -> bool {
        self.match_strength(event) > MatchStrength::None
    }
}

/// Best match among a pattern set: `(index, strength)` of the strongest
/// matching pattern, preferring the earliest listed on ties.
pub fn best_match(patterns: &[EventPattern], event: &ObservedEvent) -> Option<(usize, MatchStrength)> {
    let mut best: Option<(usize, MatchStrength)> = None;
    for (idx, pattern) in patterns.iter().enumerate() {
        let strength = pattern.match_strength(event);
        if strength == MatchStrength::None {
            continue;
        }
        match best {
            Some((_, s)) if s >= strength => {}
            _ => best = Some((idx, strength)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPayload, Timestamp};

    fn network_event(method: &str, url: &str) -> ObservedEvent {
        ObservedEvent {
            seq: 0,
            descriptor: EventDescriptor::Network {
                method: method.to_string(),
                url: url.to_string(),
            },
            payload: EventPayload::Empty,
            status: Some(200),
            observed_at: Timestamp::ZERO,
        }
    }

    fn dom_event(selector: &str, text: &str) -> ObservedEvent {
        ObservedEvent {
            seq: 0,
            descriptor: EventDescriptor::Dom {
                selector: selector.to_string(),
                text: text.to_string(),
            },
            payload: EventPayload::Empty,
            status: None,
            observed_at: Timestamp::ZERO,
        }
    }

    #[test]
    fn network_method_agreement_is_exact() {
        let pattern = EventPattern::network("POST", "/like");
        let event = network_event("POST", "http://localhost:3000/api/posts/42/like");
        assert_eq!(pattern.match_strength(&event), MatchStrength::Exact);
    }

    #[test]
    fn network_method_mismatch_degrades_to_partial() {
        let pattern = EventPattern::network("POST", "/like");
        let event = network_event("DELETE", "http://localhost:3000/api/posts/42/like");
        assert_eq!(pattern.match_strength(&event), MatchStrength::Partial);
    }

    #[test]
    fn network_url_mismatch_is_none() {
        let pattern = EventPattern::network("POST", "/like");
        let event = network_event("POST", "http://localhost:3000/api/auth/login");
        assert_eq!(pattern.match_strength(&event), MatchStrength::None);
    }

    #[test]
    fn dom_transition_requires_marker_gone() {
        let pattern = EventPattern::Dom {
            selector: ".comments".to_string(),
            text_contains: None,
            not_text_contains: Some("loading".to_string()),
        };
        assert_eq!(
            pattern.match_strength(&dom_event(".comments", "loading comments...")),
            MatchStrength::None
        );
        assert_eq!(
            pattern.match_strength(&dom_event(".comments", "first comment!")),
            MatchStrength::Exact
        );
        // An absent element reports empty text; that is not a transition.
        assert_eq!(
            pattern.match_strength(&dom_event(".comments", "")),
            MatchStrength::None
        );
    }

    #[test]
    fn cross_source_never_matches() {
        let pattern = EventPattern::network("POST", "/like");
        assert_eq!(
            pattern.match_strength(&dom_event("article", "anything")),
            MatchStrength::None
        );
    }

    #[test]
    fn best_match_prefers_exact_over_partial() {
        let patterns = vec![
            EventPattern::network("DELETE", "/like"),
            EventPattern::network("POST", "/like"),
        ];
        let event = network_event("POST", "/api/posts/1/like");
        assert_eq!(best_match(&patterns, &event), Some((1, MatchStrength::Exact)));
    }

    #[test]
    fn pattern_parses_from_tagged_yaml_shape() {
        let json = r#"{"source":"network","method":"POST","url_contains":"/like"}"#;
        let pattern: EventPattern = serde_json::from_str(json).unwrap();
        assert_eq!(pattern, EventPattern::network("POST", "/like"));
    }
}
