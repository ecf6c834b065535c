//! Progress events streamed to the caller
//!
//! Events are transport-agnostic. They serialize to the JSON wire shape
//! `{"type": "start" | "generating" | "end" | "usage" | "error" | "end-of-run", ...}`
//! and leave framing (server-sent events, NDJSON, ...) to the caller.

use crate::types::UsageRecord;
use serde::{Deserialize, Serialize};

/// Terminal output of one slide worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedItem {
    /// Plan index this item was generated for
    pub index: usize,
    /// Slide title
    pub title: String,
    /// Final rendered markup
    pub artifact: String,
    /// References to the sources the content was built from
    pub source_refs: Vec<String>,
}

/// A single progress event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Event {
    /// A worker has been started for this item
    Start { index: usize, title: String },

    /// Partial artifact preview while content is being generated
    Generating {
        index: usize,
        title: String,
        partial_artifact: String,
    },

    /// A worker finished (successfully or with a degraded artifact)
    End {
        index: usize,
        title: String,
        artifact: String,
        source_refs: Vec<String>,
    },

    /// Resource usage recorded for a pipeline step
    Usage {
        step: String,
        prompt_units: u64,
        completion_units: u64,
    },

    /// Run-fatal error; nothing follows it
    Error { message: String },

    /// Aggregate completion; always the last event of a successful run
    EndOfRun { items: Vec<GeneratedItem> },
}

impl Event {
    /// Create a start event
    pub fn start(index: usize, title: impl Into<String>) -> Self {
        Self::Start {
            index,
            title: title.into(),
        }
    }

    /// Create a generating event
    pub fn generating(index: usize, title: impl Into<String>, partial_artifact: String) -> Self {
        Self::Generating {
            index,
            title: title.into(),
            partial_artifact,
        }
    }

    /// Create an end event from a generated item
    pub fn end(item: &GeneratedItem) -> Self {
        Self::End {
            index: item.index,
            title: item.title.clone(),
            artifact: item.artifact.clone(),
            source_refs: item.source_refs.clone(),
        }
    }

    /// Create a usage event
    pub fn usage(record: UsageRecord) -> Self {
        Self::Usage {
            step: record.step,
            prompt_units: record.prompt_units,
            completion_units: record.completion_units,
        }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Item index for per-item events
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Start { index, .. } | Self::Generating { index, .. } | Self::End { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Short name of the event variant, as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Generating { .. } => "generating",
            Self::End { .. } => "end",
            Self::Usage { .. } => "usage",
            Self::Error { .. } => "error",
            Self::EndOfRun { .. } => "end-of-run",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_wire_shape() {
        let value = serde_json::to_value(Event::start(2, "Transit")).unwrap();
        assert_eq!(value, json!({"type": "start", "index": 2, "title": "Transit"}));
    }

    #[test]
    fn test_end_and_end_of_run_wire_shape() {
        let item = GeneratedItem {
            index: 0,
            title: "Cover".to_string(),
            artifact: "<section></section>".to_string(),
            source_refs: vec!["flyer:a.png".to_string()],
        };

        let end = serde_json::to_value(Event::end(&item)).unwrap();
        assert_eq!(end["type"], "end");
        assert_eq!(end["sourceRefs"], json!(["flyer:a.png"]));

        let done = serde_json::to_value(Event::EndOfRun { items: vec![item] }).unwrap();
        assert_eq!(done["type"], "end-of-run");
        assert_eq!(done["items"][0]["sourceRefs"], json!(["flyer:a.png"]));
    }

    #[test]
    fn test_generating_and_usage_field_names() {
        let generating = serde_json::to_value(Event::generating(1, "Map", "<p>".into())).unwrap();
        assert_eq!(generating["partialArtifact"], "<p>");

        let usage = serde_json::to_value(Event::usage(UsageRecord {
            step: "extract_facts".into(),
            prompt_units: 7,
            completion_units: 3,
        }))
        .unwrap();
        assert_eq!(
            usage,
            json!({"type": "usage", "step": "extract_facts", "promptUnits": 7, "completionUnits": 3})
        );
    }

    #[test]
    fn test_round_trip_error() {
        let raw = r#"{"type":"error","message":"bad input"}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event, Event::error("bad input"));
        assert_eq!(event.kind(), "error");
        assert_eq!(event.index(), None);
    }
}
