//! Router — keyword dispatch to a classifier, then plugin enrichment
//!
//! Rules are evaluated in declaration order and the first rule with any
//! keyword contained in the (lower-cased) input wins. Input no rule matches
//! short-circuits to an `Unknown` result; plugins never see it.

pub mod registry;

pub use registry::{Classifier, ClassifierError, ClassifierRegistry};

use crate::model::{RoutingResult, Verdict};
use crate::plugin::{PluginInput, PluginRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Plugin target used when the input carries no source IP
pub const DEFAULT_TARGET: &str = "127.0.0.1";

/// Text to route, optionally with the address it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteInput {
    Text(String),
    Structured {
        text: String,
        #[serde(default)]
        src_ip: Option<String>,
    },
}

impl RouteInput {
    pub fn with_source(text: impl Into<String>, src_ip: Option<String>) -> Self {
        RouteInput::Structured {
            text: text.into(),
            src_ip,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            RouteInput::Text(text) | RouteInput::Structured { text, .. } => text,
        }
    }

    pub fn src_ip(&self) -> Option<&str> {
        match self {
            RouteInput::Text(_) => None,
            RouteInput::Structured { src_ip, .. } => src_ip.as_deref(),
        }
    }
}

impl From<&str> for RouteInput {
    fn from(text: &str) -> Self {
        RouteInput::Text(text.to_string())
    }
}

impl From<String> for RouteInput {
    fn from(text: String) -> Self {
        RouteInput::Text(text)
    }
}

/// Keyword set → classifier tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRule {
    pub keywords: Vec<String>,
    pub tag: String,
}

impl DispatchRule {
    pub fn new(keywords: &[&str], tag: &str) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            tag: tag.to_string(),
        }
    }

    /// True when any keyword is a substring of the normalized text
    pub fn matches(&self, normalized: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && normalized.contains(k.as_str()))
    }
}

pub struct Router {
    rules: Vec<DispatchRule>,
    classifiers: Arc<ClassifierRegistry>,
    plugins: Arc<Mutex<PluginRegistry>>,
}

impl Router {
    pub fn new(
        rules: Vec<DispatchRule>,
        classifiers: Arc<ClassifierRegistry>,
        plugins: Arc<Mutex<PluginRegistry>>,
    ) -> Self {
        Self {
            rules,
            classifiers,
            plugins,
        }
    }

    /// Stock rule table, most specific attack families first
    pub fn default_rules() -> Vec<DispatchRule> {
        vec![
            DispatchRule::new(&["select", "drop", "union", "insert", "--", "1=1"], "sql"),
            DispatchRule::new(&["syn", "tcp flood", "ddos", "packet blast"], "syn"),
            DispatchRule::new(
                &["malware", "payload", "inject", "syscall", "memory thread"],
                "malware",
            ),
            DispatchRule::new(
                &["login", "credential", "reset", "verify", "email", "phishing", "click here"],
                "phishing",
            ),
            DispatchRule::new(&["ftp", "http", "dos", "brute", "slowloris"], "intrusion"),
            DispatchRule::new(&["anomaly", "weird", "unexpected", "unknown thread"], "anomaly"),
        ]
    }

    pub fn rules(&self) -> &[DispatchRule] {
        &self.rules
    }

    /// Shared handle to the plugin registry (operator `scan` goes through it)
    pub fn plugins(&self) -> Arc<Mutex<PluginRegistry>> {
        self.plugins.clone()
    }

    /// Classify, then enrich with every registered plugin
    pub fn route(&self, input: impl Into<RouteInput>) -> Result<RoutingResult, ClassifierError> {
        let input = input.into();
        let normalized = input.text().to_lowercase();

        let rule = match self.rules.iter().find(|rule| rule.matches(&normalized)) {
            Some(rule) => rule,
            None => return Ok(RoutingResult::unmatched()),
        };

        let classifier = self
            .classifiers
            .get(&rule.tag)
            .ok_or_else(|| ClassifierError::NotRegistered(rule.tag.clone()))?;

        let mut classification = classifier.predict(&normalized).map_err(|e| match e {
            ClassifierError::Failed { reason, .. } => ClassifierError::Failed {
                model: rule.tag.clone(),
                reason,
            },
            other => other,
        })?;
        classification.verdict = Verdict::sanitize(classification.verdict.label());

        let plugin_input = PluginInput::new(input.src_ip().unwrap_or(DEFAULT_TARGET));
        // One routed command at a time per plugin instance
        let plugin_reports = self.plugins.lock().run_all(&plugin_input);

        Ok(RoutingResult::new(rule.tag.clone(), classification, plugin_reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassificationResult;
    use crate::plugin::testing::StubPlugin;
    use crate::plugin::PluginConfig;
    use std::sync::atomic::Ordering;

    fn fixed(verdict: &'static str, confidence: f64) -> Arc<dyn Classifier> {
        Arc::new(
            move |_: &str| -> Result<ClassificationResult, ClassifierError> {
                Ok(ClassificationResult::new(Verdict::sanitize(verdict), confidence))
            },
        )
    }

    fn router_with(plugins: PluginRegistry) -> Router {
        let mut classifiers = ClassifierRegistry::new();
        classifiers.register("sql", fixed("malicious", 92.0));
        classifiers.register("syn", fixed("syn", 70.0));
        classifiers.register(
            "broken",
            Arc::new(|_: &str| -> Result<ClassificationResult, ClassifierError> {
                Err(ClassifierError::Failed {
                    model: String::new(),
                    reason: "model file missing".into(),
                })
            }),
        );
        Router::new(
            vec![
                DispatchRule::new(&["select", "union"], "sql"),
                DispatchRule::new(&["syn", "flood"], "syn"),
                DispatchRule::new(&["boom"], "broken"),
                DispatchRule::new(&["orphan"], "unregistered"),
            ],
            Arc::new(classifiers),
            Arc::new(Mutex::new(plugins)),
        )
    }

    fn empty_plugins() -> PluginRegistry {
        PluginRegistry::new(PluginConfig::default())
    }

    #[test]
    fn test_first_match_wins() {
        let router = router_with(empty_plugins());
        let result = router.route("select union syn flood").unwrap();
        assert_eq!(result.model_name(), "sql");
        assert_eq!(result.verdict(), &Verdict::Malicious);
        assert_eq!(result.confidence(), 92.0);
    }

    #[test]
    fn test_case_folded() {
        let router = router_with(empty_plugins());
        assert_eq!(router.route("SYN FLOOD on :80").unwrap().model_name(), "syn");
    }

    #[test]
    fn test_unmatched_short_circuits_plugins() {
        let stub = StubPlugin::ok("scanner");
        let runs = stub.runs.clone();
        let mut plugins = empty_plugins();
        plugins.register(Box::new(stub)).unwrap();
        let router = router_with(plugins);

        let result = router.route("ping google.com").unwrap();
        assert_eq!(result.verdict(), &Verdict::Unknown);
        assert_eq!(result.confidence(), 0.0);
        assert!(result.plugin_reports().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plugin_failure_isolated() {
        let mut plugins = empty_plugins();
        plugins.register(Box::new(StubPlugin::failing("first"))).unwrap();
        plugins.register(Box::new(StubPlugin::ok("second"))).unwrap();
        let router = router_with(plugins);

        let result = router
            .route(RouteInput::with_source("union select", Some("203.0.113.5".into())))
            .unwrap();
        assert_eq!(result.verdict(), &Verdict::Malicious);
        assert_eq!(result.confidence(), 92.0);

        let reports = result.plugin_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].plugin_name(), "first");
        assert!(reports[0].error_text().is_some());
        assert_eq!(reports[1].plugin_name(), "second");
        assert_eq!(reports[1].report_text(), Some("second scanned 203.0.113.5"));
    }

    #[test]
    fn test_default_target_without_source() {
        let mut plugins = empty_plugins();
        plugins.register(Box::new(StubPlugin::ok("p"))).unwrap();
        let router = router_with(plugins);
        let result = router.route("select 1").unwrap();
        assert_eq!(result.plugin_reports()[0].report_text(), Some("p scanned 127.0.0.1"));
    }

    #[test]
    fn test_classifier_failure_propagates() {
        let router = router_with(empty_plugins());
        match router.route("boom") {
            Err(ClassifierError::Failed { model, reason }) => {
                assert_eq!(model, "broken");
                assert_eq!(reason, "model file missing");
            }
            other => panic!("unexpected {:?}", other.map(|r| r.model_name().to_string())),
        }
        assert!(matches!(
            router.route("orphan"),
            Err(ClassifierError::NotRegistered(tag)) if tag == "unregistered"
        ));
    }

    #[test]
    fn test_structured_input_json() {
        let input: RouteInput =
            serde_json::from_str(r#"{"text":"UNION select","src_ip":"10.1.1.1"}"#).unwrap();
        assert_eq!(input.src_ip(), Some("10.1.1.1"));
        let plain: RouteInput = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(plain.text(), "hello");
    }

    #[test]
    fn test_default_rules_order() {
        let rules = Router::default_rules();
        assert_eq!(rules[0].tag, "sql");
        let normalized = "' or 1=1--";
        assert_eq!(
            rules.iter().find(|r| r.matches(normalized)).map(|r| r.tag.as_str()),
            Some("sql")
        );
    }
}
