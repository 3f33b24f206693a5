//! Relay of page console output into the agent's log.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

/// Parameters of `Runtime.consoleAPICalled`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    /// Console method (`log`, `warning`, `error`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Call arguments.
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    /// Call time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: f64,
}

/// Mirror of a page object, as much of it as the relay prints.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// Object type (`string`, `number`, `object`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Primitive value, when the browser sent it by value.
    #[serde(default)]
    pub value: Option<Value>,
    /// Human-readable rendering for non-primitives.
    #[serde(default)]
    pub description: Option<String>,
    /// `NaN`, `-0`, bigints and the like.
    #[serde(default)]
    pub unserializable_value: Option<String>,
}

impl RemoteObject {
    /// The best human-readable text for this argument.
    pub fn describe(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self
                .unserializable_value
                .clone()
                .unwrap_or_else(|| self.kind.clone()),
        }
    }
}

/// Render a protocol timestamp (epoch milliseconds) as RFC 3339.
#[allow(clippy::cast_possible_truncation)]
fn format_timestamp(millis: f64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64).map_or_else(
        || millis.to_string(),
        |t| t.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Relays console calls for one session.
#[derive(Clone, Debug)]
pub struct ConsoleRelay {
    task_name: String,
}

impl ConsoleRelay {
    /// Relay tagging lines with `task_name`.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
        }
    }

    /// Log one line per console argument.
    ///
    /// Returns the number of lines emitted, or `None` when the parameters
    /// did not decode.
    pub fn on_console_api_called(&self, params: &str) -> Option<usize> {
        let event: ConsoleApiCalled = match serde_json::from_str(params) {
            Ok(event) => event,
            Err(e) => {
                error!(task = %self.task_name, error = %e, "unmarshal console api event failed");
                return None;
            }
        };

        let timestamp = format_timestamp(event.timestamp);
        for arg in &event.args {
            debug!(
                task = %self.task_name,
                timestamp = %timestamp,
                kind = %event.kind,
                "{}",
                arg.describe()
            );
        }
        Some(event.args.len())
    }
}
