//! One persisted record of the DNA memory log

use super::result::clamp_confidence;
use super::verdict::Verdict;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Field names of the record itself; extras may not shadow them
const RESERVED_KEYS: &[&str] = &["sequence", "input", "verdict", "confidence", "timestamp"];

/// When a record was written.
///
/// RFC 3339 first, then a zone-less ISO-8601 time read as UTC. Anything else
/// is kept verbatim so the record stays readable.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTime {
    At(DateTime<Utc>),
    Raw(String),
}

impl EventTime {
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
            return EventTime::At(t.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(trimmed, format) {
                return EventTime::At(t.and_utc());
            }
        }
        EventTime::Raw(s.to_string())
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::At(t) => Some(*t),
            EventTime::Raw(_) => None,
        }
    }
}

impl Default for EventTime {
    fn default() -> Self {
        EventTime::Raw(String::new())
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::At(t) => f.pad(&t.format("%Y-%m-%d %H:%M:%S").to_string()),
            EventTime::Raw(s) => f.pad(s),
        }
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EventTime::At(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            EventTime::Raw(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => EventTime::parse(&s),
            Value::Null => EventTime::default(),
            other => EventTime::Raw(other.to_string()),
        })
    }
}

/// A routed command and its sanitized verdict.
///
/// Built once by the command loop, then only read. The `with_*` builders
/// consume the event so nothing can change it after it is handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEvent {
    /// Intake sequence number (arrival order); 0 for records without one
    #[serde(default)]
    sequence: u64,
    input: String,
    verdict: Verdict,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    timestamp: EventTime,
    /// model, reason, threat_id, src_ip, plugins, alert, ...
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ThreatEvent {
    pub fn new(sequence: u64, input: impl Into<String>, verdict: Verdict, confidence: f64) -> Self {
        Self {
            sequence,
            input: input.into(),
            verdict: verdict.canonical(),
            confidence: clamp_confidence(confidence),
            timestamp: EventTime::At(Utc::now()),
            extra: Map::new(),
        }
    }

    /// Attach an extra field. A key naming a record field is stored as
    /// `extra_<key>` so the line keeps one value per key.
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        let key = if RESERVED_KEYS.contains(&key) {
            format!("extra_{}", key)
        } else {
            key.to_string()
        };
        self.extra.insert(key, value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = EventTime::At(timestamp);
        self
    }

    /// Copy of this event with the verdict run through `sanitize` again
    pub(crate) fn sanitized(mut self) -> Self {
        self.verdict = self.verdict.canonical();
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn timestamp(&self) -> &EventTime {
        &self.timestamp
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}
