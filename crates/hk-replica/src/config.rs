use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub replica_url: String,
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// `host:port` outside the API used to decide whether the device has a network.
    pub network_probe_addr: String,
    pub sync_interval_seconds: u64,
    pub sync_page_rows: u32,
    pub notification_retention_hours: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            replica_url: "sqlite:data/replica.db".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            api_token: None,
            network_probe_addr: "1.1.1.1:443".to_string(),
            sync_interval_seconds: 60,
            sync_page_rows: 200,
            notification_retention_hours: 24,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("HK_REPLICA_URL") {
            cfg.replica_url = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("HK_API_BASE_URL") {
            cfg.api_base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("HK_API_TOKEN") {
            let token = v.trim();
            cfg.api_token = (!token.is_empty()).then(|| token.to_string());
        }
        if let Ok(v) = std::env::var("HK_NETWORK_PROBE_ADDR") {
            cfg.network_probe_addr = v.trim().to_string();
        }
        if let Some(value) = std::env::var("HK_SYNC_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| parse_u64(&v))
        {
            cfg.sync_interval_seconds = value;
        }
        if let Some(value) = std::env::var("HK_SYNC_PAGE_ROWS")
            .ok()
            .and_then(|v| parse_u32(&v))
        {
            cfg.sync_page_rows = value;
        }
        if let Some(value) = std::env::var("HK_NOTIFICATION_RETENTION_HOURS")
            .ok()
            .and_then(|v| parse_u64(&v))
        {
            cfg.notification_retention_hours = value;
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.replica_url.is_empty() {
            return Err("Replica url must not be empty".to_string());
        }
        if self.api_base_url.is_empty() {
            return Err("API base url must not be empty".to_string());
        }
        if self.network_probe_addr.is_empty() {
            return Err("Network probe address must not be empty".to_string());
        }
        if self.sync_interval_seconds == 0 {
            return Err("Sync interval must be greater than 0".to_string());
        }
        if self.sync_page_rows == 0 {
            return Err("Sync page rows must be greater than 0".to_string());
        }
        if self.notification_retention_hours == 0 {
            return Err("Notification retention must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}
