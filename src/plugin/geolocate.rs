//! Geolocation lookup for source IPs

use super::{Plugin, PluginConfig, PluginError, PluginInput};
use serde::Deserialize;
use std::net::IpAddr;

pub const PLUGIN_NAME: &str = "geolocate";

/// Response body of an ip-api style JSON endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRecord {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl GeoRecord {
    pub fn render(&self, ip: &str) -> String {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        let coords = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => format!("{:.4}, {:.4}", lat, lon),
            _ => "-".to_string(),
        };
        format!(
            "## Geolocation Report\n\
             - **IP:** `{}`\n\
             - **Country:** {}\n\
             - **Region:** {}\n\
             - **City:** {}\n\
             - **ISP:** {}\n\
             - **Org:** {}\n\
             - **Coordinates:** {}\n",
            self.query.as_deref().unwrap_or(ip),
            field(&self.country),
            field(&self.region_name),
            field(&self.city),
            field(&self.isp),
            field(&self.org),
            coords,
        )
    }
}

pub struct GeolocatePlugin {
    endpoint: String,
    agent: Option<ureq::Agent>,
    latest_report: Option<String>,
}

impl GeolocatePlugin {
    pub fn new() -> Self {
        Self {
            endpoint: PluginConfig::default().geo_endpoint,
            agent: None,
            latest_report: None,
        }
    }

    /// Fetch and parse the record for one IP
    pub fn lookup(&self, ip: &str) -> Result<GeoRecord, PluginError> {
        let agent = self.agent.as_ref().ok_or(PluginError::NotInitialized)?;
        let url = format!("{}{}", self.endpoint, ip);
        let body = agent
            .get(&url)
            .call()
            .map_err(|e| PluginError::Http(e.to_string()))?
            .into_string()?;
        parse_record(&body)
    }
}

impl Default for GeolocatePlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a response body; anything but `status == "success"` is an error
pub fn parse_record(body: &str) -> Result<GeoRecord, PluginError> {
    let record: GeoRecord = serde_json::from_str(body)
        .map_err(|e| PluginError::Remote(format!("bad geolocation response: {}", e)))?;
    if record.status != "success" {
        return Err(PluginError::Remote(
            record
                .message
                .clone()
                .unwrap_or_else(|| format!("status '{}'", record.status)),
        ));
    }
    Ok(record)
}

impl Plugin for GeolocatePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn init(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        self.endpoint = config.geo_endpoint.clone();
        self.agent = Some(
            ureq::AgentBuilder::new()
                .timeout_connect(config.probe_timeout)
                .timeout(config.http_timeout)
                .build(),
        );
        Ok(())
    }

    fn run(&mut self, input: &PluginInput) -> Result<String, PluginError> {
        let ip = input
            .extra
            .get("ip")
            .map(String::as_str)
            .unwrap_or(&input.target)
            .trim();
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| PluginError::InvalidInput(format!("'{}' is not an IP address", ip)))?;

        // Nothing to look up for private and loopback ranges
        let private = match addr {
            IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_loopback(),
        };
        let report = if private {
            format!("## Geolocation Report\n- **IP:** `{}`\n- Local/private address, no lookup\n", ip)
        } else {
            self.lookup(ip)?.render(ip)
        };

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
