//! Opaque-cursor log continuation.
//!
//! A cluster's log endpoint returns one chunk of log text (flat string or
//! pod-name map) plus an optional cursor. The gateway forwards the cursor
//! verbatim on the next request and never inspects it. An empty chunk means
//! there is no (more) log: at the protocol level it is indistinguishable
//! from "nothing exists yet", and callers must stop polling, so the HTTP
//! layer turns it into 404.

use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogChunk {
    #[serde(default)]
    pub log: Value,
    #[serde(default)]
    pub cursor: Option<Value>,
}

impl LogChunk {
    /// Whether this chunk carries no log data at all.
    pub fn is_empty(&self) -> bool {
        match &self.log {
            Value::Null => true,
            Value::String(text) => text.is_empty(),
            Value::Object(pods) => pods.is_empty(),
            _ => false,
        }
    }

    /// The cursor as a query-parameter value, if any.
    pub fn cursor_param(&self) -> Option<String> {
        match self.cursor.as_ref()? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// `Link` response header pointing at the next chunk of a job's log.
pub fn next_link(cluster_id: &str, job_id: &str, cursor: &str) -> String {
    let encoded: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("cursor", cursor)
        .finish();
    format!("</clusters/{cluster_id}/jobs/{job_id}/log?{encoded}>; rel=\"next\"")
}
