//! Plugins — independently fallible enrichment steps run after classification
//!
//! - **Plugin**: the four-method capability set (`init`, `run`, `report`, `cleanup`)
//! - **PluginHandle**: owns one plugin instance and enforces its state machine
//! - **PluginRegistry**: ordered set of handles; one failing plugin never stops the rest
//!
//! Built-in plugins: [`PortAuditPlugin`] and [`GeolocatePlugin`].

pub mod geolocate;
pub mod port_audit;

pub use geolocate::GeolocatePlugin;
pub use port_audit::PortAuditPlugin;

use crate::model::PluginOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Settings handed to every plugin on `init`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Timeout for one socket probe
    pub probe_timeout: Duration,
    /// Timeout for one HTTP request
    pub http_timeout: Duration,
    /// Wall-clock budget for a whole `run`
    pub run_budget: Duration,
    /// Port list override for scanners
    pub ports: Option<Vec<u16>>,
    /// Base URL of the geolocation service; the IP is appended
    pub geo_endpoint: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(1000),
            http_timeout: Duration::from_millis(3000),
            run_budget: Duration::from_secs(10),
            ports: None,
            geo_endpoint: "http://ip-api.com/json/".to_string(),
        }
    }
}

/// Input for one plugin run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginInput {
    pub target: String,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl PluginInput {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }
}

/// The plugin capability set
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError>;

    /// Run against one target. Must bound every blocking sub-operation.
    fn run(&mut self, input: &PluginInput) -> Result<String, PluginError>;

    /// Last successful report, if any
    fn report(&self) -> Option<&str>;

    fn cleanup(&mut self);
}

/// Lifecycle of one plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginState {
    Uninitialized,
    Initialized,
    Ready,
    Running,
}

/// A plugin instance plus its lifecycle state
pub struct PluginHandle {
    plugin: Box<dyn Plugin>,
    state: PluginState,
}

impl PluginHandle {
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            plugin,
            state: PluginState::Uninitialized,
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        self.plugin.init(config)?;
        self.state = PluginState::Initialized;
        Ok(())
    }

    /// Run the plugin, catching panics. Always returns to `Ready`.
    pub fn run(&mut self, input: &PluginInput) -> Result<String, PluginError> {
        match self.state {
            PluginState::Uninitialized => return Err(PluginError::NotInitialized),
            PluginState::Running => {
                return Err(PluginError::Busy(self.plugin.name().to_string()))
            }
            PluginState::Initialized | PluginState::Ready => {}
        }

        self.state = PluginState::Running;
        let plugin = &mut self.plugin;
        let result = panic::catch_unwind(AssertUnwindSafe(|| plugin.run(input)))
            .unwrap_or_else(|payload| Err(PluginError::Panicked(panic_message(&payload))));
        self.state = PluginState::Ready;
        result
    }

    pub fn report(&self) -> Option<&str> {
        self.plugin.report()
    }

    pub fn cleanup(&mut self) {
        if matches!(self.state, PluginState::Ready | PluginState::Initialized) {
            self.plugin.cleanup();
            self.state = PluginState::Uninitialized;
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}

/// Ordered set of plugins, invoked in registration order
pub struct PluginRegistry {
    plugins: Vec<PluginHandle>,
    config: PluginConfig,
}

impl PluginRegistry {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            plugins: Vec::new(),
            config,
        }
    }

    /// Registry with the built-in port audit and geolocation plugins
    pub fn with_builtins(config: PluginConfig) -> Result<Self, PluginError> {
        let mut registry = Self::new(config);
        registry.register(Box::new(PortAuditPlugin::new()))?;
        registry.register(Box::new(GeolocatePlugin::new()))?;
        Ok(registry)
    }

    /// Initialize and append a plugin
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        let mut handle = PluginHandle::new(plugin);
        handle.init(&self.config)?;
        log::debug!("Registered plugin '{}'", handle.name());
        self.plugins.push(handle);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin once, in order. Failures become error outcomes.
    pub fn run_all(&mut self, input: &PluginInput) -> Vec<PluginOutcome> {
        self.plugins
            .iter_mut()
            .map(|handle| {
                let name = handle.name().to_string();
                match handle.run(input) {
                    Ok(report) => PluginOutcome::report(name, report),
                    Err(e) => {
                        log::warn!("Plugin '{}' failed: {}", name, e);
                        PluginOutcome::error(name, e.to_string())
                    }
                }
            })
            .collect()
    }

    /// Run a single plugin by name (operator `scan` / `geolocate`)
    pub fn run_named(&mut self, name: &str, input: &PluginInput) -> Result<String, PluginError> {
        let handle = self
            .plugins
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        handle.run(input)
    }

    pub fn cleanup_all(&mut self) {
        for handle in &mut self.plugins {
            handle.cleanup();
        }
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}

/// Plugin errors
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin not initialized")]
    NotInitialized,

    #[error("Plugin '{0}' is already running")]
    Busy(String),

    #[error("No plugin named '{0}'")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("Plugin panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Plugin returning a fixed report, or failing when `fail` is set
    pub struct StubPlugin {
        pub name: String,
        pub fail: bool,
        pub last: Option<String>,
        pub runs: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl StubPlugin {
        pub fn ok(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail: false,
                last: None,
                runs: Default::default(),
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name)
            }
        }
    }

    impl Plugin for StubPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
            Ok(())
        }

        fn run(&mut self, input: &PluginInput) -> Result<String, PluginError> {
            self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                return Err(PluginError::Remote(format!("{} unreachable", input.target)));
            }
            let report = format!("{} scanned {}", self.name, input.target);
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

    pub struct PanickingPlugin;

    impl Plugin for PanickingPlugin {
        fn name(&self) -> &str {
            "panicky"
        }
        fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
            Ok(())
        }
        fn run(&mut self, _input: &PluginInput) -> Result<String, PluginError> {
            panic!("probe exploded")
        }
        fn report(&self) -> Option<&str> {
            None
        }
        fn cleanup(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_state_machine() {
        let mut handle = PluginHandle::new(Box::new(StubPlugin::ok("a")));
        assert_eq!(handle.state(), PluginState::Uninitialized);
        assert!(matches!(
            handle.run(&PluginInput::new("10.0.0.1")),
            Err(PluginError::NotInitialized)
        ));

        handle.init(&PluginConfig::default()).unwrap();
        assert_eq!(handle.state(), PluginState::Initialized);

        handle.run(&PluginInput::new("10.0.0.1")).unwrap();
        assert_eq!(handle.state(), PluginState::Ready);
        assert_eq!(handle.report(), Some("a scanned 10.0.0.1"));

        handle.cleanup();
        assert_eq!(handle.state(), PluginState::Uninitialized);
        assert_eq!(handle.report(), None);
    }

    #[test]
    fn test_failed_run_returns_to_ready() {
        let mut handle = PluginHandle::new(Box::new(StubPlugin::failing("b")));
        handle.init(&PluginConfig::default()).unwrap();
        assert!(handle.run(&PluginInput::new("x")).is_err());
        assert_eq!(handle.state(), PluginState::Ready);
    }

    #[test]
    fn test_failure_isolation_and_order() {
        let mut registry = PluginRegistry::new(PluginConfig::default());
        registry.register(Box::new(StubPlugin::failing("first"))).unwrap();
        registry.register(Box::new(PanickingPlugin)).unwrap();
        registry.register(Box::new(StubPlugin::ok("last"))).unwrap();

        let outcomes = registry.run_all(&PluginInput::new("192.0.2.7"));
        let names: Vec<&str> = outcomes.iter().map(|o| o.plugin_name()).collect();
        assert_eq!(names, vec!["first", "panicky", "last"]);

        assert!(outcomes[0].error_text().unwrap().contains("unreachable"));
        assert!(outcomes[1].error_text().unwrap().contains("probe exploded"));
        assert_eq!(outcomes[2].report_text(), Some("last scanned 192.0.2.7"));
    }

    #[test]
    fn test_run_named() {
        let mut registry = PluginRegistry::new(PluginConfig::default());
        registry.register(Box::new(StubPlugin::ok("port-audit"))).unwrap();
        assert!(registry.run_named("port-audit", &PluginInput::new("h")).is_ok());
        assert!(matches!(
            registry.run_named("missing", &PluginInput::new("h")),
            Err(PluginError::NotFound(_))
        ));
        assert_eq!(registry.names(), vec!["port-audit".to_string()]);
    }
}
