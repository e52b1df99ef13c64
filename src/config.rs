//! Configuration module for the market data adapter

use serde::Deserialize;
use std::env;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Venue API key used for the REST session and stream authentication
    pub api_key: String,

    /// WebSocket endpoint for the Parimex streaming feed
    pub ws_endpoint: String,

    /// REST API endpoint for session and catalogue calls
    pub rest_endpoint: String,

    /// IPC socket path for publishing normalized data
    pub ipc_socket_path: String,

    /// Event type ids used to preload the instrument directory (empty = all)
    pub event_type_ids: Vec<String>,

    /// Instrument ids to subscribe on startup
    pub instruments: Vec<String>,

    /// Drop primary data for instruments nobody subscribed to
    pub strict_handling: bool,

    /// Debounce applied to the first subscription batch, in seconds
    pub subscription_delay_secs: u64,

    /// Post-connect keep-alive settings
    pub keepalive_interval_secs: u64,
    pub keepalive_count: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let event_type_ids: Vec<String> = env::var("EVENT_TYPE_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let instruments: Vec<String> = env::var("INSTRUMENTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            api_key: env::var("PARIMEX_API_KEY").unwrap_or_default(),
            ws_endpoint: env::var("WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://stream.parimex.com/v1".to_string()),
            rest_endpoint: env::var("REST_ENDPOINT")
                .unwrap_or_else(|_| "https://api.parimex.com/v1".to_string()),
            ipc_socket_path: env::var("IPC_SOCKET_PATH")
                .unwrap_or_else(|_| "/tmp/parimex-md.sock".to_string()),
            event_type_ids,
            instruments,
            strict_handling: env::var("STRICT_HANDLING")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            subscription_delay_secs: env::var("SUBSCRIPTION_DELAY_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            keepalive_interval_secs: env::var("KEEPALIVE_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            keepalive_count: env::var("KEEPALIVE_COUNT")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ws_endpoint: "wss://stream.parimex.com/v1".to_string(),
            rest_endpoint: "https://api.parimex.com/v1".to_string(),
            ipc_socket_path: "/tmp/parimex-md.sock".to_string(),
            event_type_ids: Vec::new(),
            instruments: Vec::new(),
            strict_handling: false,
            subscription_delay_secs: 5,
            keepalive_interval_secs: 5,
            keepalive_count: 3,
        }
    }
}
