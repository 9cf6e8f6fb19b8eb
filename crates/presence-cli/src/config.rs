use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory that bulk exports are written into.
    pub export_dir: PathBuf,
    /// Recognize every frame instead of only when the face count changes.
    pub recognize_every_frame: bool,
    /// Emit deltas as JSON lines on stdout instead of log lines.
    pub notify_json: bool,
    /// How long a write waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("presence.db"));

        Self {
            db_path,
            export_dir: std::env::var("PRESENCE_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            recognize_every_frame: env_flag("PRESENCE_RECOGNIZE_EVERY_FRAME"),
            notify_json: env_flag("PRESENCE_NOTIFY_JSON"),
            busy_timeout_ms: env_u64("PRESENCE_DB_BUSY_TIMEOUT_MS", 5000),
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.as_str(), "" | "0" | "false"))
        .unwrap_or(false)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
