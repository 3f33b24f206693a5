//! Protocol envelopes parsed out of transport debug lines.
//!
//! The transport reports every protocol message through a printf-style
//! debug hook. Each interpolation argument may be one JSON message; only
//! messages carrying a `method` (events) are envelopes. Command replies,
//! plain text and truncated JSON are skipped without complaint.

use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::trace;

/// `Page.loadEventFired`
pub const PAGE_LOAD_EVENT_FIRED: &str = "Page.loadEventFired";
/// `Page.screencastFrame`
pub const PAGE_SCREENCAST_FRAME: &str = "Page.screencastFrame";
/// `Runtime.consoleAPICalled`
pub const RUNTIME_CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";

/// One protocol event: a method name and its still-encoded parameters.
#[derive(Clone, Debug, Deserialize)]
pub struct ProtocolEnvelope {
    /// Method name, the dispatch discriminator.
    pub method: String,
    /// Raw parameter payload. Shape depends on `method`.
    #[serde(default)]
    pub params: Option<Box<RawValue>>,
}

/// The methods the dispatcher acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// The page finished loading.
    LoadEventFired,
    /// A screencast image is available.
    ScreencastFrame,
    /// Page code called a `console` method.
    ConsoleApiCalled,
    /// Anything else.
    Other,
}

impl ProtocolEnvelope {
    /// Which handler this envelope belongs to.
    pub fn kind(&self) -> EventKind {
        match self.method.as_str() {
            PAGE_LOAD_EVENT_FIRED => EventKind::LoadEventFired,
            PAGE_SCREENCAST_FRAME => EventKind::ScreencastFrame,
            RUNTIME_CONSOLE_API_CALLED => EventKind::ConsoleApiCalled,
            _ => EventKind::Other,
        }
    }

    /// Parameters as JSON text, `null` when absent.
    pub fn params_json(&self) -> &str {
        self.params.as_deref().map_or("null", RawValue::get)
    }
}

/// Parse every argument of one debug line that holds an envelope.
///
/// Best effort: a malformed argument is skipped and does not stop the
/// others from being parsed.
pub fn parse_debug_line(format: &str, args: &[String]) -> Vec<ProtocolEnvelope> {
    trace!(format, args = args.len(), "cdp debug line");
    args.iter()
        .filter_map(|arg| serde_json::from_str::<ProtocolEnvelope>(arg).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| (*a).to_string()).collect()
    }

    #[test]
    fn parses_event_without_params() {
        let envs = parse_debug_line("<- %s", &line(&[r#"{"method":"Page.loadEventFired"}"#]));
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].kind(), EventKind::LoadEventFired);
        assert_eq!(envs[0].params_json(), "null");
    }

    #[test]
    fn keeps_params_verbatim() {
        let envs = parse_debug_line(
            "<- %s",
            &line(&[r#"{"method":"Page.screencastFrame","params":{"data":"AAEC","sessionId":1}}"#]),
        );
        assert_eq!(envs[0].kind(), EventKind::ScreencastFrame);
        assert_eq!(envs[0].params_json(), r#"{"data":"AAEC","sessionId":1}"#);
    }

    #[test]
    fn skips_malformed_arguments_but_keeps_the_rest() {
        let envs = parse_debug_line(
            "%s %s %s %s",
            &line(&[
                "not json",
                r#"{"method":"Runtime.consoleAPICalled","params":{"type":"log","args":[]}}"#,
                r#"{"method": 5}"#,
                r#"{"method":"Network.requestWillBeSent"}"#,
            ]),
        );
        let kinds: Vec<_> = envs.iter().map(ProtocolEnvelope::kind).collect();
        assert_eq!(kinds, vec![EventKind::ConsoleApiCalled, EventKind::Other]);
    }

    #[test]
    fn command_replies_are_not_envelopes() {
        let envs = parse_debug_line("<- %s", &line(&[r#"{"id":3,"result":{}}"#]));
        assert!(envs.is_empty());
    }

    #[test]
    fn empty_line_yields_nothing() {
        assert!(parse_debug_line("connected", &[]).is_empty());
    }

    #[test]
    fn unknown_method_is_other() {
        let envs = parse_debug_line("<- %s", &line(&[r#"{"method":"Network.requestWillBeSent","params":{}}"#]));
        assert_eq!(envs[0].kind(), EventKind::Other);
        assert_eq!(envs[0].method, "Network.requestWillBeSent");
    }
}
