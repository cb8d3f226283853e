/// Protocol version advertised by `/health`
pub const PROTOCOL_VERSION: &str = "/skysense/1.0.0";

/// Application name
pub const APP_NAME: &str = "SkySense";

/// Interval between two polls of the device API, in seconds
pub const POLL_INTERVAL_SECS: u64 = 5;

/// Timeout applied to a single device API request, in seconds
pub const FETCH_TIMEOUT_SECS: u64 = 10;

/// Interval between two persisted snapshots of the latest reading, in seconds
pub const PERSIST_INTERVAL_SECS: u64 = 60 * 60;

/// Millimetres per inch, used to convert rain rate from in/h to mm/h
pub const MM_PER_INCH: f64 = 25.4;

/// Session tokens stay valid for seven days
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Longest accepted token lifetime (ten years).
pub const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Per-connection outbox capacity; frames beyond this are dropped
pub const SESSION_OUTBOX_CAPACITY: usize = 256;

/// Default page size for sensor logs and chat history
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Upper bound for any client-supplied page size
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Minimum length accepted for an admin-supplied password change
pub const MIN_PASSWORD_LEN: usize = 4;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Device telemetry endpoint (Ecowitt real-time API)
pub const ECOWITT_REALTIME_URL: &str = "https://api.ecowitt.net/api/v3/device/real_time";

/// Default MQTT broker and topic for republished readings
pub const DEFAULT_MQTT_BROKER: &str = "tcp://broker.hivemq.com:1883";
pub const DEFAULT_MQTT_TOPIC: &str = "ecowitt/weather";

/// WebSocket close code for policy violations (RFC 6455)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
