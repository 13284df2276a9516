//! Command loop — seal → open → route → remember, one command at a time
//!
//! Nothing in here returns an error to the caller for a single command:
//! tampering, classifier failures and storage failures are all folded into a
//! [`CommandReport`] (and logged) so the terminal keeps serving.

pub mod command;

pub use command::Command;

use crate::classifiers::{self, reason_for_input};
use crate::config::Config;
use crate::envelope::{Envelope, SealedMessage};
use crate::memory::{DnaMemory, MemoryError};
use crate::model::{RoutingResult, ThreatEvent, Verdict};
use crate::plugin::{geolocate, port_audit, PluginError, PluginInput, PluginRegistry};
use crate::router::{RouteInput, Router};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Phrases that are never let through as benign
const FLOOD_PHRASES: &[&str] = &["syn flood", "tcp overflow"];
const FLOOD_CONFIDENCE_FLOOR: f64 = 88.0;
pub const FLOOD_OVERRIDE_REASON: &str = "SYN flood pattern override";

/// A routed command and what was made of it
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub sequence: u64,
    pub threat_id: String,
    pub input: String,
    pub src_ip: Option<String>,
    pub result: RoutingResult,
    pub reason: String,
    /// Threat verdict at or above the configured confidence threshold
    pub alert: bool,
    /// Whether the DNA memory append succeeded
    pub stored: bool,
    /// Verdict summary sealed for the trip back to the operator
    pub response: Option<SealedMessage>,
}

/// Outcome of one free-text command
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandReport {
    Analyzed(Analysis),
    /// The envelope rejected the message; nothing was routed
    Tampered { sequence: u64, error: String },
    /// The classifier failed; recorded as `UNKNOWN`
    ClassificationFailed {
        sequence: u64,
        input: String,
        error: String,
    },
}

impl CommandReport {
    pub fn sequence(&self) -> u64 {
        match self {
            CommandReport::Analyzed(a) => a.sequence,
            CommandReport::Tampered { sequence, .. }
            | CommandReport::ClassificationFailed { sequence, .. } => *sequence,
        }
    }
}

/// Session identity for `whoami`
#[derive(Debug, Clone, Serialize)]
pub struct Whoami {
    pub version: &'static str,
    pub session_id: String,
    pub key_preview: String,
    pub total_logs: usize,
}

pub struct Pipeline {
    envelope: Envelope,
    router: Router,
    memory: Arc<DnaMemory>,
    config: Config,
    intake: AtomicU64,
}

impl Pipeline {
    pub fn new(config: Config, router: Router, memory: Arc<DnaMemory>) -> Self {
        Self {
            envelope: Envelope::new(),
            router,
            memory,
            config,
            intake: AtomicU64::new(1),
        }
    }

    /// Stock pipeline: signature classifiers, built-in plugins, log at `config.log_path`
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        let memory = Arc::new(DnaMemory::open(&config.log_path)?);
        let plugins = PluginRegistry::with_builtins(config.plugin_config())?;
        let router = Router::new(
            Router::default_rules(),
            Arc::new(classifiers::default_registry()),
            Arc::new(Mutex::new(plugins)),
        );
        info!(
            "Pipeline ready: {} rules, {} plugins, log={}",
            router.rules().len(),
            router.plugins().lock().len(),
            config.log_path.display()
        );
        Ok(Self::new(config, router, memory))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &DnaMemory {
        &self.memory
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Seal the operator's text, pass it through the transport and analyze it
    pub fn process(&self, text: &str, src_ip: Option<&str>) -> CommandReport {
        match self.envelope.seal(text) {
            Ok(sealed) => self.process_sealed(&sealed, src_ip),
            Err(e) => {
                let sequence = self.next_sequence();
                error!("Envelope failed to seal command #{}: {}", sequence, e);
                CommandReport::Tampered {
                    sequence,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Analyze a message that already crossed the transport
    pub fn process_sealed(&self, msg: &SealedMessage, src_ip: Option<&str>) -> CommandReport {
        let sequence = self.next_sequence();

        let text = match self.envelope.open(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("Command #{} rejected at the envelope: {}", sequence, e);
                let preview = hex::encode(&msg.ciphertext[..msg.ciphertext.len().min(8)]);
                let event = ThreatEvent::new(
                    sequence,
                    format!("[tampered envelope] {}", preview),
                    Verdict::Suspicious,
                    100.0,
                )
                .with_extra("model", "envelope")
                .with_extra("reason", "envelope tamper detected")
                .with_extra("error", e.to_string());
                self.memory.log_event(event);
                return CommandReport::Tampered {
                    sequence,
                    error: e.to_string(),
                };
            }
        };

        let input = RouteInput::with_source(text.clone(), src_ip.map(str::to_string));
        let result = match self.router.route(input) {
            Ok(result) => apply_flood_override(&text, result),
            Err(e) => {
                error!("Classification of command #{} failed: {}", sequence, e);
                let mut event = ThreatEvent::new(sequence, text.clone(), Verdict::Unknown, 0.0)
                    .with_extra("reason", "classification failed")
                    .with_extra("error", e.to_string());
                if let Some(ip) = src_ip {
                    event = event.with_extra("src_ip", ip);
                }
                self.memory.log_event(event);
                return CommandReport::ClassificationFailed {
                    sequence,
                    input: text,
                    error: e.to_string(),
                };
            }
        };

        let reason = result
            .reason()
            .map(str::to_string)
            .unwrap_or_else(|| reason_for_input(&text).to_string());
        let alert = self.config.is_alert(result.verdict(), result.confidence());
        let threat_id = generate_threat_id();

        let verdict = result.verdict().clone();
        let mut event = ThreatEvent::new(sequence, text.clone(), verdict, result.confidence())
            .with_extra("model", result.model_name())
            .with_extra("reason", reason.clone())
            .with_extra("threat_id", threat_id.clone())
            .with_extra("alert", alert);
        if let Some(ip) = src_ip {
            event = event.with_extra("src_ip", ip);
        }
        if !result.plugin_reports().is_empty() {
            event = event.with_extra(
                "plugins",
                serde_json::to_value(result.plugin_reports()).unwrap_or_default(),
            );
        }
        let stored = self.memory.log_event(event);

        if alert {
            warn!(
                "[{}] {} ({:.1}%) via {}: {}",
                threat_id,
                result.verdict(),
                result.confidence(),
                result.model_name(),
                reason
            );
        } else {
            info!(
                "[{}] {} ({:.1}%) via {}",
                threat_id,
                result.verdict(),
                result.confidence(),
                result.model_name()
            );
        }

        let response = self.seal_response(&threat_id, &result, &reason, alert);

        CommandReport::Analyzed(Analysis {
            sequence,
            threat_id,
            input: text,
            src_ip: src_ip.map(str::to_string),
            result,
            reason,
            alert,
            stored,
            response,
        })
    }

    fn seal_response(
        &self,
        threat_id: &str,
        result: &RoutingResult,
        reason: &str,
        alert: bool,
    ) -> Option<SealedMessage> {
        let body = serde_json::json!({
            "threat_id": threat_id,
            "model": result.model_name(),
            "verdict": result.verdict(),
            "confidence": result.confidence(),
            "reason": reason,
            "alert": alert,
        });
        match self.envelope.seal(&body.to_string()) {
            Ok(sealed) => Some(sealed),
            Err(e) => {
                error!("Failed to seal response for {}: {}", threat_id, e);
                None
            }
        }
    }

    /// Intake sequence number; assigned on arrival, before routing
    pub fn next_sequence(&self) -> u64 {
        self.intake.fetch_add(1, Ordering::SeqCst)
    }

    pub fn whoami(&self) -> Whoami {
        Whoami {
            version: VERSION,
            session_id: self.config.session_id.clone(),
            key_preview: self.envelope.key_preview(),
            total_logs: self.memory.count_logs(),
        }
    }

    /// Wipe DNA memory. Callers confirm with the operator first.
    pub fn clear_memory(&self) -> Result<(), MemoryError> {
        self.memory.clear()
    }

    /// Operator `scan <target>`
    pub fn scan(&self, target: &str) -> Result<String, PluginError> {
        self.run_plugin(port_audit::PLUGIN_NAME, PluginInput::new(target))
    }

    /// Operator `geolocate <ip>`
    pub fn geolocate(&self, ip: &str) -> Result<String, PluginError> {
        self.run_plugin(geolocate::PLUGIN_NAME, PluginInput::new(ip))
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.router.plugins().lock().names()
    }

    fn run_plugin(&self, name: &str, input: PluginInput) -> Result<String, PluginError> {
        let plugins = self.router.plugins();
        let outcome = plugins.lock().run_named(name, &input);
        outcome
    }
}

/// A benign verdict on flood wording becomes `SUSPICIOUS`, confidence at least 88
fn apply_flood_override(text: &str, result: RoutingResult) -> RoutingResult {
    if result.verdict() != &Verdict::Benign {
        return result;
    }
    let lower = text.to_lowercase();
    if !FLOOD_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return result;
    }
    let confidence = result.confidence().max(FLOOD_CONFIDENCE_FLOOR);
    info!("Benign verdict on flood wording overridden to SUSPICIOUS");
    result.overridden(Verdict::Suspicious, confidence, FLOOD_OVERRIDE_REASON)
}

fn generate_threat_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("#TID{}", id[..6].to_uppercase())
}

/// Errors building a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("DNA memory unavailable: {0}")]
    Memory(#[from] MemoryError),

    #[error("Plugin setup failed: {0}")]
    Plugin(#[from] PluginError),
}
