//! Wire format of messages posted by the render surface.
//!
//! Every message is a JSON object with a `type` and, since version 1, a `v`:
//!
//! ```json
//! {"v":1,"type":"page_failed","page":7,"reason":"bad xref"}
//! ```
//!
//! Messages without `v` come from older viewers that only knew `log` and
//! `error`; they are read as version 1.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter, Result as FmtResult};

pub const PROTOCOL_VERSION: u64 = 1;

const KNOWN_TYPES: &[&str] = &[
    "log",
    "error",
    "document_loaded",
    "document_failed",
    "page_rendered",
    "page_failed",
    "batch_started",
    "batch_complete",
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    #[serde(alias = "log")]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

/// A typed diagnostic from the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Console output inside the surface.
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
    },
    /// An uncaught error inside the surface.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
    DocumentLoaded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pages: Option<u32>,
    },
    DocumentFailed {
        reason: String,
    },
    PageRendered {
        page: u32,
    },
    PageFailed {
        page: u32,
        reason: String,
    },
    /// Placeholders are in place for these pages; rendering is about to start.
    /// For documents of unknown length `last` may overshoot the real end.
    BatchStarted {
        first: u32,
        last: u32,
    },
    BatchComplete {
        first: u32,
        last: u32,
    },
}

impl Event {
    /// The `type` tag this event is sent under.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Error { .. } => "error",
            Self::DocumentLoaded { .. } => "document_loaded",
            Self::DocumentFailed { .. } => "document_failed",
            Self::PageRendered { .. } => "page_rendered",
            Self::PageFailed { .. } => "page_failed",
            Self::BatchStarted { .. } => "batch_started",
            Self::BatchComplete { .. } => "batch_complete",
        }
    }

    /// Encode with the current protocol version.
    pub fn to_json(&self) -> String {
        let mut object = match serde_json::to_value(self) {
            Ok(Value::Object(object)) => object,
            // Every variant is a struct variant of strings and integers.
            _ => Map::new(),
        };
        object.insert("v".to_string(), Value::from(PROTOCOL_VERSION));
        Value::Object(object).to_string()
    }

    /// Decode a message, rejecting anything that isn't a known, well-formed
    /// event of a supported version.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| ErrorKind::NotJson(e.to_string()))?;
        let Value::Object(object) = value else {
            exn::bail!(ErrorKind::NotAnObject);
        };
        match object.get("v") {
            None => {},
            Some(v) if v.as_u64() == Some(PROTOCOL_VERSION) => {},
            Some(v) => exn::bail!(ErrorKind::UnsupportedVersion(v.to_string())),
        }
        let kind = match object.get("type") {
            Some(Value::String(kind)) if KNOWN_TYPES.contains(&kind.as_str()) => kind.clone(),
            Some(Value::String(kind)) => exn::bail!(ErrorKind::UnknownType(kind.clone())),
            Some(other) => exn::bail!(ErrorKind::UnknownType(other.to_string())),
            None => exn::bail!(ErrorKind::InvalidEvent { kind: "untyped".to_string(), reason: "missing `type`".to_string() }),
        };
        let event = serde_json::from_value(Value::Object(object))
            .map_err(|e| ErrorKind::InvalidEvent { kind, reason: e.to_string() })?;
        Ok(event)
    }
}

/// A message as received by the host: either understood, or kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(Event),
    /// Text that failed to parse. Kept so that nothing the surface says is
    /// silently lost.
    Raw { text: String, error: ErrorKind },
}

impl Inbound {
    pub fn from_text(text: &str) -> Self {
        match Event::parse(text) {
            Ok(event) => Self::Event(event),
            Err(err) => Self::Raw { text: text.to_string(), error: (*err).clone() },
        }
    }

    pub fn event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            Self::Raw { .. } => None,
        }
    }
}

impl From<Event> for Inbound {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Log { message, .. } => f.write_str(message),
            Self::Error { message, source: Some(source), line: Some(line) } => write!(f, "{message} ({source}:{line})"),
            Self::Error { message, .. } => f.write_str(message),
            Self::DocumentLoaded { pages: Some(pages) } => write!(f, "document loaded ({pages} pages)"),
            Self::DocumentLoaded { pages: None } => f.write_str("document loaded (unknown length)"),
            Self::DocumentFailed { reason } => write!(f, "document failed: {reason}"),
            Self::PageRendered { page } => write!(f, "page {page} rendered"),
            Self::PageFailed { page, reason } => write!(f, "page {page} failed: {reason}"),
            Self::BatchStarted { first, last } => write!(f, "pages {first}-{last} reserved"),
            Self::BatchComplete { first, last } => write!(f, "pages {first}-{last} rendered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::legacy_log(r#"{"type":"log","message":"hello"}"#, Event::Log { level: LogLevel::Info, message: "hello".into() })]
    #[case::legacy_error(
        r#"{"type":"error","message":"boom","source":"viewer.js","line":12}"#,
        Event::Error { message: "boom".into(), source: Some("viewer.js".into()), line: Some(12) }
    )]
    #[case::versioned(r#"{"v":1,"type":"page_failed","page":3,"reason":"bad xref"}"#, Event::PageFailed { page: 3, reason: "bad xref".into() })]
    #[case::warning_alias(r#"{"v":1,"type":"log","level":"warning","message":"slow"}"#, Event::Log { level: LogLevel::Warn, message: "slow".into() })]
    #[case::unknown_length(r#"{"v":1,"type":"document_loaded"}"#, Event::DocumentLoaded { pages: None })]
    #[case::batch_started(r#"{"v":1,"type":"batch_started","first":21,"last":40}"#, Event::BatchStarted { first: 21, last: 40 })]
    fn parses(#[case] text: &str, #[case] expected: Event) {
        assert_eq!(Event::parse(text).unwrap(), expected);
    }

    #[rstest]
    #[case::not_json("console.log(1)", ErrorKind::NotJson(String::new()))]
    #[case::array("[1,2]", ErrorKind::NotAnObject)]
    #[case::future_version(r#"{"v":2,"type":"log","message":"x"}"#, ErrorKind::UnsupportedVersion("2".into()))]
    #[case::unknown_type(r#"{"type":"telemetry","message":"x"}"#, ErrorKind::UnknownType("telemetry".into()))]
    fn rejects(#[case] text: &str, #[case] expected: ErrorKind) {
        let err = Event::parse(text).unwrap_err();
        assert_eq!(std::mem::discriminant(&*err), std::mem::discriminant(&expected));
    }

    #[test]
    fn missing_field_is_invalid_event() {
        let err = Event::parse(r#"{"type":"page_rendered"}"#).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidEvent { kind, .. } if kind == "page_rendered"));
    }

    #[test]
    fn encodes_with_version() {
        let event = Event::BatchComplete { first: 1, last: 20 };
        let json = event.to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["type"], "batch_complete");
        assert_eq!(Event::parse(&json).unwrap(), event);
    }

    #[test]
    fn unparseable_text_is_kept_verbatim() {
        let inbound = Inbound::from_text("not json");
        assert!(matches!(&inbound, Inbound::Raw { text, .. } if text == "not json"));
        assert_eq!(inbound.event(), None);
    }
}
