//! End-to-end: operator text through seal → open → route → plugins → DNA memory

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use threatloop_core::config::Config;
use threatloop_core::memory::DnaMemory;
use threatloop_core::model::{ClassificationResult, Verdict};
use threatloop_core::pipeline::{CommandReport, Pipeline};
use threatloop_core::plugin::{Plugin, PluginConfig, PluginError, PluginInput, PluginRegistry};
use threatloop_core::router::{ClassifierError, ClassifierRegistry, DispatchRule, Router};

struct EchoPlugin {
    last: Option<String>,
}

impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }

    fn run(&mut self, input: &PluginInput) -> Result<String, PluginError> {
        let report = format!("echo {}", input.target);
        self.last = Some(report.clone());
        Ok(report)
    }

    fn report(&self) -> Option<&str> {
        self.last.as_deref()
    }

    fn cleanup(&mut self) {
        self.last = None;
    }
}

fn temp_log() -> PathBuf {
    std::env::temp_dir()
        .join(format!("threatloop-e2e-{}", uuid::Uuid::new_v4()))
        .join("threat_log.jsonl")
}

fn build(log: &PathBuf) -> Pipeline {
    let mut classifiers = ClassifierRegistry::new();
    classifiers.register(
        "sql",
        Arc::new(|_: &str| -> Result<ClassificationResult, ClassifierError> {
            Ok(ClassificationResult::new(Verdict::Malicious, 92.0))
        }),
    );

    let mut plugins = PluginRegistry::new(PluginConfig::default());
    plugins.register(Box::new(EchoPlugin { last: None })).unwrap();

    let router = Router::new(
        vec![DispatchRule::new(&["1=1", "select", "drop"], "sql")],
        Arc::new(classifiers),
        Arc::new(Mutex::new(plugins)),
    );
    let config = Config {
        log_path: log.clone(),
        ..Default::default()
    };
    let memory = Arc::new(DnaMemory::open(log).unwrap());
    Pipeline::new(config, router, memory)
}

#[test]
fn test_sql_tautology_end_to_end() {
    let log = temp_log();
    let pipeline = build(&log);

    let analysis = match pipeline.process("' OR 1=1--", None) {
        CommandReport::Analyzed(a) => a,
        other => panic!("unexpected report {:?}", other),
    };
    assert_eq!(analysis.result.verdict().label(), "MALICIOUS");
    assert_eq!(analysis.result.confidence(), 92.0);
    assert_eq!(analysis.result.model_name(), "sql");
    assert!(analysis.alert);

    let reports = analysis.result.plugin_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].report_text(), Some("echo 127.0.0.1"));

    let hits = pipeline.memory().search_memory("1=1");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].input(), "' OR 1=1--");
    assert_eq!(hits[0].verdict(), &Verdict::Malicious);
    assert_eq!(hits[0].confidence(), 92.0);

    // Records survive a reopen
    let reopened = DnaMemory::open(&log).unwrap();
    assert_eq!(reopened.count_logs(), 1);
    assert_eq!(reopened.stats().get("MALICIOUS"), Some(&1));

    let _ = std::fs::remove_dir_all(log.parent().unwrap());
}

#[test]
fn test_tampered_message_never_routed() {
    let log = temp_log();
    let pipeline = build(&log);

    let mut sealed = pipeline.envelope().seal("drop table users").unwrap();
    let last = sealed.ciphertext.len() - 1;
    sealed.ciphertext[last] ^= 0x80;

    assert!(matches!(
        pipeline.process_sealed(&sealed, Some("198.51.100.7")),
        CommandReport::Tampered { .. }
    ));
    let events = pipeline.memory().full_dump();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verdict(), &Verdict::Suspicious);
    assert!(events[0].extra_str("model").is_some());
    assert!(pipeline.memory().search_memory("drop table").is_empty());

    let _ = std::fs::remove_dir_all(log.parent().unwrap());
}

#[test]
fn test_transported_message_from_wire() {
    let log = temp_log();
    let pipeline = build(&log);

    let wire = pipeline.envelope().seal("select * from accounts").unwrap().to_json().unwrap();
    let received = threatloop_core::envelope::SealedMessage::from_json(&wire).unwrap();
    match pipeline.process_sealed(&received, Some("10.1.2.3")) {
        CommandReport::Analyzed(a) => {
            assert_eq!(a.input, "select * from accounts");
            assert_eq!(a.result.plugin_reports()[0].report_text(), Some("echo 10.1.2.3"));
        }
        other => panic!("unexpected report {:?}", other),
    }

    let _ = std::fs::remove_dir_all(log.parent().unwrap());
}
