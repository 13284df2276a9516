//! Classification and routing results

use super::verdict::Verdict;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Verdict + confidence returned by a classifier.
///
/// Confidence is a percentage in [0, 100], not a probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub verdict: Verdict,
    pub confidence: f64,
    /// Why the classifier reached this verdict, if it says
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ClassificationResult {
    pub fn new(verdict: Verdict, confidence: f64) -> Self {
        Self {
            verdict,
            confidence: clamp_confidence(confidence),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Clamp to [0, 100]; NaN counts as no confidence
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 100.0)
    }
}

/// Outcome of one plugin run: a report or an error, never both, never neither
#[derive(Debug, Clone, PartialEq)]
pub struct PluginOutcome {
    plugin_name: String,
    result: Result<String, String>,
}

impl PluginOutcome {
    pub fn report(plugin_name: impl Into<String>, report: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            result: Ok(report.into()),
        }
    }

    pub fn error(plugin_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            result: Err(error.into()),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn report_text(&self) -> Option<&str> {
        self.result.as_ref().ok().map(String::as_str)
    }

    pub fn error_text(&self) -> Option<&str> {
        self.result.as_ref().err().map(String::as_str)
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl Serialize for PluginOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PluginOutcome", 2)?;
        s.serialize_field("plugin", &self.plugin_name)?;
        match &self.result {
            Ok(report) => s.serialize_field("report", report)?,
            Err(error) => s.serialize_field("error", error)?,
        }
        s.end()
    }
}

/// Result of routing one command. Immutable after construction.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    model_name: String,
    verdict: Verdict,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    plugin_reports: Vec<PluginOutcome>,
}

/// Model name reported when no dispatch rule matched
pub const UNMATCHED_MODEL: &str = "none";

impl RoutingResult {
    pub fn new(
        model_name: impl Into<String>,
        classification: ClassificationResult,
        plugin_reports: Vec<PluginOutcome>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            verdict: classification.verdict.canonical(),
            confidence: clamp_confidence(classification.confidence),
            reason: classification.reason,
            plugin_reports,
        }
    }

    /// Terminal result for input no rule matched
    pub fn unmatched() -> Self {
        Self {
            model_name: UNMATCHED_MODEL.to_string(),
            verdict: Verdict::Unknown,
            confidence: 0.0,
            reason: None,
            plugin_reports: Vec::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn plugin_reports(&self) -> &[PluginOutcome] {
        &self.plugin_reports
    }

    pub fn is_matched(&self) -> bool {
        self.model_name != UNMATCHED_MODEL
    }

    /// Same result with the verdict replaced after classification
    pub(crate) fn overridden(
        mut self,
        verdict: Verdict,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        self.verdict = verdict.canonical();
        self.confidence = clamp_confidence(confidence);
        self.reason = Some(reason.into());
        self
    }
}
