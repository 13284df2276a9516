//! Port Audit — open ports, service versions, known-vulnerable versions, config flaws
//!
//! Every network step is time-bounded: name resolution runs on a helper thread
//! and is abandoned after the probe timeout, socket probes use
//! `connect_timeout`, banner reads use a read timeout, HTTP header fetches use
//! an agent timeout, and the whole run stops probing once its budget is spent. Sockets are
//! scoped to the probe that opened them, so an abandoned probe still closes.

use super::{Plugin, PluginConfig, PluginError, PluginInput};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::Read;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub const PLUGIN_NAME: &str = "port-audit";

pub const DEFAULT_PORTS: &[u16] = &[
    20, 21, 22, 23, 25, 53, 69, 80, 123, 143, 161, 169, 179, 443, 500, 587, 8080, 8081, 3306,
    3389,
];

const HTTP_PORTS: &[u16] = &[80, 8080, 8081];
const HTTPS_PORTS: &[u16] = &[443, 8443];

/// Service product → (vulnerable version strings, CVEs)
const VULNERABILITY_DB: &[(&str, &[&str], &[&str])] = &[
    (
        "Apache",
        &["2.4.41", "2.4.39", "2.4.38", "2.4.37"],
        &["CVE-2021-42013", "CVE-2021-41773"],
    ),
    (
        "nginx",
        &["1.16.0", "1.15.12", "1.14.2"],
        &["CVE-2021-23017", "CVE-2020-12440"],
    ),
    (
        "OpenSSH",
        &["8.4p1", "8.3p1", "7.9p1"],
        &["CVE-2021-41617", "CVE-2020-14145"],
    ),
    (
        "Microsoft-IIS",
        &["10.0.15063", "8.5"],
        &["CVE-2017-7269", "CVE-2015-1635"],
    ),
];

/// Well-known TCP service names
pub fn service_name(port: u16) -> &'static str {
    match port {
        20 => "ftp-data",
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        69 => "tftp",
        80 => "http",
        123 => "ntp",
        143 => "imap",
        161 => "snmp",
        179 => "bgp",
        443 => "https",
        500 => "isakmp",
        587 => "submission",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        8080 => "http-alt",
        8443 => "https-alt",
        _ => "unknown",
    }
}

/// Findings from one audit run
#[derive(Debug, Clone, Default)]
pub struct AuditFindings {
    pub open_ports: Vec<(u16, &'static str)>,
    pub service_versions: BTreeMap<u16, String>,
    pub vulnerabilities: Vec<String>,
    pub flaws: Vec<String>,
    /// Ports skipped because the run budget ran out
    pub skipped: usize,
}

pub struct PortAuditPlugin {
    config: PluginConfig,
    agent: Option<ureq::Agent>,
    sshd_config: PathBuf,
    latest_report: Option<String>,
}

impl PortAuditPlugin {
    pub fn new() -> Self {
        Self {
            config: PluginConfig::default(),
            agent: None,
            sshd_config: PathBuf::from("/etc/ssh/sshd_config"),
            latest_report: None,
        }
    }

    /// Read sshd settings from somewhere other than `/etc/ssh/sshd_config`
    pub fn with_sshd_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.sshd_config = path.into();
        self
    }

    /// Run the full audit without rendering
    pub fn audit(&self, target: &str, ports: &[u16]) -> Result<AuditFindings, PluginError> {
        let started = Instant::now();
        let limit = self.config.probe_timeout.min(self.config.run_budget);
        let ip = resolve_within(target, limit, system_lookup)?;

        let mut findings = AuditFindings::default();
        for (i, &port) in ports.iter().enumerate() {
            if started.elapsed() >= self.config.run_budget {
                findings.skipped = ports.len() - i;
                log::warn!(
                    "Port audit of {} hit its {:?} budget, {} ports skipped",
                    target,
                    self.config.run_budget,
                    findings.skipped
                );
                break;
            }
            if probe(SocketAddr::new(ip, port), self.config.probe_timeout) {
                findings.open_ports.push((port, service_name(port)));
            }
        }

        for &(port, service) in &findings.open_ports {
            if started.elapsed() >= self.config.run_budget {
                break;
            }
            let version = self.service_version(target, SocketAddr::new(ip, port), service);
            findings.service_versions.insert(port, version);
        }

        findings.vulnerabilities = check_vulnerabilities(&findings.service_versions);
        findings.flaws = self.check_security_flaws(&findings.open_ports);
        Ok(findings)
    }

    fn service_version(&self, host: &str, addr: SocketAddr, service: &str) -> String {
        let port = addr.port();
        if HTTP_PORTS.contains(&port) || HTTPS_PORTS.contains(&port) {
            let scheme = if HTTPS_PORTS.contains(&port) { "https" } else { "http" };
            let url = http_url(scheme, host, port);
            match self.server_header(&url) {
                Ok(server) => server,
                Err(e) => format!("Error: {}", e),
            }
        } else if port == 22 {
            grab_banner(addr, self.config.probe_timeout)
                .unwrap_or_else(|| "SSH (no response)".to_string())
        } else {
            format!("{} (no version detection)", service)
        }
    }

    fn server_header(&self, url: &str) -> Result<String, PluginError> {
        let agent = self
            .agent
            .clone()
            .unwrap_or_else(|| build_agent(self.config.http_timeout));
        let response = match agent.get(url).call() {
            Ok(response) => response,
            // Error pages still carry a Server header
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(PluginError::Http(e.to_string())),
        };
        Ok(response.header("Server").unwrap_or("Unknown").to_string())
    }

    fn check_security_flaws(&self, open_ports: &[(u16, &str)]) -> Vec<String> {
        let mut flaws = Vec::new();
        if open_ports.iter().any(|&(port, _)| port == 22) {
            match std::fs::read_to_string(&self.sshd_config) {
                Ok(config) => flaws.extend(sshd_flaws(&config)),
                Err(_) => flaws.push("SSH configuration file not found".to_string()),
            }
        }
        flaws
    }
}

impl Default for PortAuditPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for PortAuditPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        self.config = config.clone();
        self.agent = Some(build_agent(config.http_timeout));
        Ok(())
    }

    fn run(&mut self, input: &PluginInput) -> Result<String, PluginError> {
        let target = input.target.trim();
        if target.is_empty() {
            return Err(PluginError::InvalidInput("empty target".into()));
        }
        let ports = input
            .ports
            .clone()
            .or_else(|| self.config.ports.clone())
            .unwrap_or_else(|| DEFAULT_PORTS.to_vec());

        let findings = self.audit(target, &ports)?;
        let report = render_report(target, &findings);
        self.latest_report = Some(report.clone());
        Ok(report)
    }

    fn report(&self) -> Option<&str> {
        self.latest_report.as_deref()
    }

    fn cleanup(&mut self) {
        self.agent = None;
        self.latest_report = None;
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout(timeout)
        .build()
}

fn system_lookup(target: String) -> std::io::Result<Option<IpAddr>> {
    Ok((target.as_str(), 0).to_socket_addrs()?.next().map(|addr| addr.ip()))
}

/// Resolve `target`, giving up after `limit`. IP literals skip the lookup.
///
/// The lookup runs on its own thread; on timeout that thread is left to
/// finish and its answer is dropped.
fn resolve_within<F>(target: &str, limit: Duration, lookup: F) -> Result<IpAddr, PluginError>
where
    F: FnOnce(String) -> std::io::Result<Option<IpAddr>> + Send + 'static,
{
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    let (tx, rx) = mpsc::channel();
    let name = target.to_string();
    thread::Builder::new()
        .name("port-audit-resolve".into())
        .spawn(move || {
            let _ = tx.send(lookup(name));
        })?;

    match rx.recv_timeout(limit) {
        Ok(Ok(Some(ip))) => Ok(ip),
        Ok(Ok(None)) => Err(PluginError::InvalidInput(format!(
            "cannot resolve '{}'",
            target
        ))),
        Ok(Err(e)) => Err(PluginError::Io(e)),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(PluginError::InvalidInput(format!(
            "resolving '{}' timed out after {:?}",
            target, limit
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(PluginError::InvalidInput(format!(
            "resolver for '{}' exited without an answer",
            target
        ))),
    }
}

/// Base URL for a header fetch; IPv6 literals are bracketed
fn http_url(scheme: &str, host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("{}://[{}]:{}", scheme, v6, port),
        _ => format!("{}://{}:{}", scheme, host, port),
    }
}

/// TCP connect probe. The stream is dropped (closed) before returning.
fn probe(addr: SocketAddr, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

/// First line of whatever the service sends on connect
pub fn grab_banner(addr: SocketAddr, timeout: Duration) -> Option<String> {
    let mut stream = TcpStream::connect_timeout(&addr, timeout).ok()?;
    stream.set_read_timeout(Some(timeout)).ok()?;
    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).ok()?;
    let banner = String::from_utf8_lossy(&buf[..n]);
    let line = banner.trim().lines().next().unwrap_or("").trim().to_string();
    if line.is_empty() {
        Some("SSH (no banner)".to_string())
    } else {
        Some(line)
    }
}

/// Match service versions against the known-vulnerable table
pub fn check_vulnerabilities(service_versions: &BTreeMap<u16, String>) -> Vec<String> {
    let mut vulnerabilities = Vec::new();
    for (port, version) in service_versions {
        for (product, versions, cves) in VULNERABILITY_DB {
            if !version.contains(product) {
                continue;
            }
            if versions.iter().any(|v| version.contains(v)) {
                vulnerabilities.push(format!(
                    "Port {}: Vulnerable {} version ({}) - {}",
                    port,
                    product,
                    version,
                    cves.join(", ")
                ));
            }
        }
    }
    vulnerabilities
}

/// Risky sshd settings
pub fn sshd_flaws(sshd_config: &str) -> Vec<String> {
    let enabled = |directive: &str| {
        sshd_config.lines().any(|line| {
            let mut parts = line.split_whitespace();
            parts.next() == Some(directive) && parts.next() == Some("yes")
        })
    };

    let mut flaws = Vec::new();
    if enabled("PermitRootLogin") {
        flaws.push("SSH root login enabled (CWE-250)".to_string());
    }
    if enabled("PasswordAuthentication") {
        flaws.push("SSH password authentication enabled (CWE-798)".to_string());
    }
    flaws
}

/// Markdown audit report
pub fn render_report(target: &str, findings: &AuditFindings) -> String {
    let ports = if findings.open_ports.is_empty() {
        "No open ports detected".to_string()
    } else {
        findings
            .open_ports
            .iter()
            .map(|(port, service)| format!("- Port `{}` ({})", port, service))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let versions = if findings.service_versions.is_empty() {
        "No service versions detected".to_string()
    } else {
        findings
            .service_versions
            .iter()
            .map(|(port, version)| format!("- Port `{}`: {}", port, version))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let bullet_or = |items: &[String], empty: &str| {
        if items.is_empty() {
            empty.to_string()
        } else {
            items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
        }
    };

    let mut report = format!(
        "## Security Audit Report\n\
         **Target:** `{}`\n\
         **Scan Date:** {}\n\
         **Generated By:** {} v{}\n\n\
         ### Open Ports\n{}\n\n\
         ### Service Versions\n{}\n\n\
         ### Identified Vulnerabilities\n{}\n\n\
         ### Security Flaws\n{}\n",
        target,
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        PLUGIN_NAME,
        env!("CARGO_PKG_VERSION"),
        ports,
        versions,
        bullet_or(&findings.vulnerabilities, "No vulnerabilities detected"),
        bullet_or(&findings.flaws, "No security flaws detected"),
    );
    if findings.skipped > 0 {
        report.push_str(&format!(
            "\n_Scan truncated: {} ports not probed (time budget exhausted)_\n",
            findings.skipped
        ));
    }
    report
}
