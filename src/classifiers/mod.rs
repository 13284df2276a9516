//! Signature classifiers, deterministic stand-ins for the trained detectors
//!
//! Each classifier scores the input by summing the weights of the signatures
//! it contains. Scores of 70 and up are `Malicious`, any hit is `Suspicious`,
//! no hit is `Benign`. The first matching signature supplies the reason.

use crate::model::{ClassificationResult, Verdict};
use crate::router::{Classifier, ClassifierError, ClassifierRegistry};
use std::sync::Arc;

pub const MALICIOUS_SCORE: f64 = 70.0;
const BENIGN_CONFIDENCE: f64 = 90.0;

/// One weighted pattern
#[derive(Debug, Clone)]
pub struct Signature {
    pub pattern: &'static str,
    pub weight: f64,
    pub reason: &'static str,
}

const fn sig(pattern: &'static str, weight: f64, reason: &'static str) -> Signature {
    Signature {
        pattern,
        weight,
        reason,
    }
}

#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    tag: String,
    signatures: Vec<Signature>,
}

impl SignatureClassifier {
    pub fn new(tag: impl Into<String>, signatures: Vec<Signature>) -> Self {
        Self {
            tag: tag.into(),
            signatures,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Pure scoring; never fails
    pub fn score(&self, text: &str) -> ClassificationResult {
        let normalized = text.to_lowercase();
        let hits: Vec<&Signature> = self
            .signatures
            .iter()
            .filter(|s| normalized.contains(s.pattern))
            .collect();

        let score: f64 = hits.iter().map(|s| s.weight).sum::<f64>().min(100.0);
        let verdict = if score >= MALICIOUS_SCORE {
            Verdict::Malicious
        } else if score > 0.0 {
            Verdict::Suspicious
        } else {
            Verdict::Benign
        };
        let confidence = if hits.is_empty() { BENIGN_CONFIDENCE } else { score };

        let result = ClassificationResult::new(verdict, confidence);
        match hits.first() {
            Some(first) => result.with_reason(first.reason),
            None => result,
        }
    }

    /// One classifier per stock dispatch tag
    pub fn default_set() -> Vec<SignatureClassifier> {
        vec![
            Self::new(
                "sql",
                vec![
                    sig("' or 1=1", 70.0, "SQL Injection Detected"),
                    sig("or 1=1", 50.0, "SQL Injection Detected"),
                    sig("drop table", 75.0, "Database Destruction Attempt"),
                    sig("union select", 60.0, "SQL Union-Based Injection"),
                    sig("select * from", 25.0, "SQL Injection Detected"),
                    sig("insert into", 25.0, "SQL Injection Detected"),
                    sig("--", 20.0, "SQL comment truncation"),
                    sig("information_schema", 40.0, "SQL schema enumeration"),
                ],
            ),
            Self::new(
                "syn",
                vec![
                    sig("syn flood", 80.0, "SYN Flood / TCP Overflow Attack"),
                    sig("tcp overflow", 70.0, "SYN Flood / TCP Overflow Attack"),
                    sig("tcp flood", 70.0, "SYN Flood / TCP Overflow Attack"),
                    sig("ddos", 60.0, "Distributed Denial of Service"),
                    sig("packet blast", 50.0, "Packet Blast Flood"),
                    sig("syn", 15.0, "SYN packet pattern"),
                ],
            ),
            Self::new(
                "malware",
                vec![
                    sig("shell.php", 80.0, "Web Shell or Backdoor Upload"),
                    sig("backdoor", 70.0, "Web Shell or Backdoor Upload"),
                    sig("reverse shell", 75.0, "Reverse Shell Payload"),
                    sig("malware", 50.0, "Malware Reference"),
                    sig("inject", 40.0, "Code Injection Attempt"),
                    sig("memory thread", 35.0, "Remote Thread Injection"),
                    sig("syscall", 25.0, "Suspicious Syscall Usage"),
                    sig("payload", 25.0, "Payload Delivery"),
                ],
            ),
            Self::new(
                "phishing",
                vec![
                    sig("phishing", 60.0, "Phishing Attempt Detected"),
                    sig("click here", 45.0, "Phishing Attempt Detected"),
                    sig("verify your", 40.0, "Phishing Attempt Detected"),
                    sig("reset your password", 40.0, "Credential Reset Lure"),
                    sig("credential", 30.0, "Credential Harvesting"),
                    sig("http", 15.0, "Malicious HTTP Phishing URL"),
                    sig("login", 20.0, "Phishing Attempt Detected"),
                ],
            ),
            Self::new(
                "intrusion",
                vec![
                    sig("slowloris", 80.0, "Slowloris Denial of Service"),
                    sig("brute force", 70.0, "Brute-Force Login Attempt"),
                    sig("anonymous", 50.0, "Anonymous FTP Login Exploit"),
                    sig("password", 20.0, "Credential Guessing"),
                    sig("ftp", 20.0, "FTP Access Attempt"),
                    sig("dos", 30.0, "Denial of Service Pattern"),
                ],
            ),
            Self::new(
                "anomaly",
                vec![
                    sig("unknown thread", 55.0, "Anomaly Pattern Detected"),
                    sig("anomaly", 40.0, "Anomaly Pattern Detected"),
                    sig("unexpected", 30.0, "Anomaly Pattern Detected"),
                    sig("weird", 20.0, "Anomaly Pattern Detected"),
                ],
            ),
        ]
    }
}

impl Classifier for SignatureClassifier {
    fn predict(&self, text: &str) -> Result<ClassificationResult, ClassifierError> {
        Ok(self.score(text))
    }
}

/// Registry holding [`SignatureClassifier::default_set`]
pub fn default_registry() -> ClassifierRegistry {
    let mut registry = ClassifierRegistry::new();
    for classifier in SignatureClassifier::default_set() {
        let tag = classifier.tag().to_string();
        registry.register(tag, Arc::new(classifier));
    }
    registry
}

/// Fallback explanation for a verdict whose classifier gave no reason
pub fn reason_for_input(text: &str) -> &'static str {
    let t = text.to_lowercase();
    if t.contains("select * from users") && t.contains("or") {
        "SQL Injection Detected"
    } else if t.contains("drop table") {
        "Database Destruction Attempt"
    } else if t.contains("ftp") && t.contains("anonymous") {
        "Anonymous FTP Login Exploit"
    } else if t.contains("union select") {
        "SQL Union-Based Injection"
    } else if t.contains("phish") || t.contains("login") || t.contains("verify") {
        "Phishing Attempt Detected"
    } else if t.contains("syn flood") || t.contains("tcp overflow") {
        "SYN Flood / TCP Overflow Attack"
    } else if t.contains("shell.php") || t.contains("backdoor") {
        "Web Shell or Backdoor Upload"
    } else {
        "Anomaly Pattern Detected"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;

    fn classifier(tag: &str) -> SignatureClassifier {
        SignatureClassifier::default_set()
            .into_iter()
            .find(|c| c.tag() == tag)
            .unwrap()
    }

    #[test]
    fn test_sql_tautology_is_malicious() {
        let r = classifier("sql").score("' OR 1=1--");
        assert_eq!(r.verdict, Verdict::Malicious);
        assert_eq!(r.confidence, 100.0);
        assert_eq!(r.reason.as_deref(), Some("SQL Injection Detected"));
    }

    #[test]
    fn test_weak_hit_is_suspicious() {
        let r = classifier("anomaly").score("something weird happened");
        assert_eq!(r.verdict, Verdict::Suspicious);
        assert_eq!(r.confidence, 20.0);
    }

    #[test]
    fn test_no_hit_is_benign() {
        let r = classifier("syn").score("firewall status");
        assert_eq!(r.verdict, Verdict::Benign);
        assert_eq!(r.confidence, 90.0);
        assert!(r.reason.is_none());
    }

    #[test]
    fn test_malformed_input_never_fails() {
        for c in SignatureClassifier::default_set() {
            assert!(c.predict("\u{0}\u{fffd}\t\n").is_ok());
            assert!(c.predict("").is_ok());
        }
    }

    #[test]
    fn test_default_registry_covers_default_rules() {
        let registry = default_registry();
        for rule in Router::default_rules() {
            assert!(registry.contains(&rule.tag), "missing classifier for {}", rule.tag);
        }
    }

    #[test]
    fn test_reason_for_input() {
        assert_eq!(reason_for_input("DROP TABLE users"), "Database Destruction Attempt");
        assert_eq!(reason_for_input("exploit ftp anonymous login"), "Anonymous FTP Login Exploit");
        assert_eq!(reason_for_input("list connections"), "Anomaly Pattern Detected");
    }
}
