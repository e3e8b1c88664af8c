/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: String,
    /// Maximum concurrent WebSocket connections across all channels
    pub max_connections: usize,
    /// Per-channel broadcast buffer; slower receivers skip ahead past this
    pub channel_capacity: usize,
    /// Frames longer than this are dropped
    pub max_frame_bytes: usize,
    /// Per-connection inbound frame budget
    pub max_messages_per_sec: u32,
    /// Unparseable frames tolerated before the connection is closed
    pub max_parse_errors: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9001".to_string(),
            max_connections: 1000,
            channel_capacity: 256,
            max_frame_bytes: 16 * 1024,
            max_messages_per_sec: 120, // combat tier is ~60/s per event
            max_parse_errors: 5,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("RELAY_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(v) = env_parse("RELAY_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = env_parse("RELAY_CHANNEL_CAPACITY")? {
            config.channel_capacity = v;
        }
        if let Some(v) = env_parse("RELAY_MAX_FRAME_BYTES")? {
            config.max_frame_bytes = v;
        }
        if let Some(v) = env_parse("RELAY_MAX_MESSAGES_PER_SEC")? {
            config.max_messages_per_sec = v;
        }
        if let Some(v) = env_parse("RELAY_MAX_PARSE_ERRORS")? {
            config.max_parse_errors = v;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.is_empty() {
            return Err("listen_addr must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be > 0".to_string());
        }
        if self.max_frame_bytes < 64 {
            return Err("max_frame_bytes must be >= 64".to_string());
        }
        if self.max_messages_per_sec == 0 {
            return Err("max_messages_per_sec must be > 0".to_string());
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{} is not a valid value: {:?}", key, raw)),
        Err(_) => Ok(None),
    }
}
