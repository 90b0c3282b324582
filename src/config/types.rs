//! Configuration type definitions.
//!
//! All the sub-config structs used by the main `Config`.

use serde::Deserialize;

use super::defaults::*;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `[server]` - this server's identity.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name shown as the source of numerics (e.g. "irc.example.net").
    pub name: String,
    /// Three-character server id: `[0-9][A-Z0-9]{2}`.
    pub sid: String,
    /// Network name advertised in ISUPPORT.
    pub network: String,
    /// Free-form description.
    pub description: String,
    /// Case mapping: "rfc1459", "strict-rfc1459" or "ascii".
    #[serde(default = "default_casemap")]
    pub casemap: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Worker pool size for blocking jobs.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Whether a kicker may remove someone of equal rank.
    #[serde(default = "default_true")]
    pub kick_equal_rank: bool,
}

/// `[[listen]]` - one listening socket.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether this listener speaks TLS. This flag is also the sole source
    /// of truth for STS advertising.
    #[serde(default)]
    pub tls: bool,
    /// PEM certificate chain, required when `tls` is set.
    pub cert: Option<String>,
    /// PEM private key, required when `tls` is set.
    pub key: Option<String>,
    /// Optional connect password checked against PASS.
    pub password: Option<String>,
    /// STS policy duration in seconds, advertised on TLS listeners.
    pub sts_duration: Option<u64>,
}

/// `[[class]]` - per-pattern connection quotas and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    /// Glob patterns matched against the connecting IP.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    /// Restrict this class to local ports, e.g. "6667,6697-6699".
    pub ports: Option<String>,
    #[serde(default = "default_max_conns_per_ip")]
    pub max_conns_per_ip: u32,
    /// Outgoing buffer cap in bytes; exceeding it kills the connection.
    #[serde(default = "default_sendq")]
    pub sendq: usize,
    /// Longest accepted input line, bytes, before the parser budget.
    #[serde(default = "default_recvq")]
    pub recvq: usize,
    /// Command-penalty ceiling in pseudo-milliseconds.
    #[serde(default = "default_penalty_ceiling_ms")]
    pub penalty_ceiling_ms: u64,
    /// Idle seconds before a PING probe, and again before the drop.
    #[serde(default = "default_pingfreq_secs")]
    pub pingfreq_secs: u64,
    #[serde(default = "default_registration_timeout_secs")]
    pub registration_timeout_secs: u64,
    /// Reverse-DNS the connecting address.
    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,
    /// RFC 1413 ident lookup.
    #[serde(default = "default_true")]
    pub lookup_ident: bool,
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
}

impl Default for ClassConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            hosts: default_hosts(),
            ports: None,
            max_conns_per_ip: default_max_conns_per_ip(),
            sendq: default_sendq(),
            recvq: default_recvq(),
            penalty_ceiling_ms: default_penalty_ceiling_ms(),
            pingfreq_secs: default_pingfreq_secs(),
            registration_timeout_secs: default_registration_timeout_secs(),
            resolve_hostnames: true,
            lookup_ident: true,
            resolve_timeout_secs: default_resolve_timeout_secs(),
        }
    }
}

/// `[limits]` - protocol limits advertised via ISUPPORT.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// RFC-portion line budget including CRLF.
    #[serde(default = "default_max_line")]
    pub max_line: usize,
    #[serde(default = "default_max_modes_per_line")]
    pub max_modes_per_line: usize,
    /// Per-channel cap on each list mode (MAXLIST).
    #[serde(default = "default_max_list_entries")]
    pub max_list_entries: usize,
    #[serde(default = "default_max_channels_per_user")]
    pub max_channels_per_user: usize,
    #[serde(default = "default_nick_len")]
    pub nick_len: usize,
    #[serde(default = "default_topic_len")]
    pub topic_len: usize,
    #[serde(default = "default_kick_len")]
    pub kick_len: usize,
    #[serde(default = "default_away_len")]
    pub away_len: usize,
    /// Displayed-host cap; cloaks and vhosts are truncated to this.
    #[serde(default = "default_host_len")]
    pub host_len: usize,
    #[serde(default = "default_ident_len")]
    pub ident_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line: default_max_line(),
            max_modes_per_line: default_max_modes_per_line(),
            max_list_entries: default_max_list_entries(),
            max_channels_per_user: default_max_channels_per_user(),
            nick_len: default_nick_len(),
            topic_len: default_topic_len(),
            kick_len: default_kick_len(),
            away_len: default_away_len(),
            host_len: default_host_len(),
            ident_len: default_ident_len(),
        }
    }
}

/// `[xline]` - ban database persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct XLineConfig {
    #[serde(default = "default_xline_db")]
    pub db_path: String,
    /// Seconds between dirty-flush checks.
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

impl Default for XLineConfig {
    fn default() -> Self {
        Self {
            db_path: default_xline_db(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

/// `[channeldb]` - optional persistence of permanent channels.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelDbConfig {
    #[serde(default)]
    pub enabled: bool,
    pub path: Option<String>,
}

/// `[motd]` - message of the day.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MotdConfig {
    /// Path to a MOTD file, one reply line per file line.
    pub file: Option<String>,
    /// Inline lines, used when `file` is unset.
    #[serde(default)]
    pub lines: Vec<String>,
}

impl MotdConfig {
    /// Load MOTD lines; `None` means "no MOTD" (422).
    pub fn load_lines(&self) -> Option<Vec<String>> {
        if let Some(path) = &self.file {
            match std::fs::read_to_string(path) {
                Ok(content) => return Some(content.lines().map(str::to_string).collect()),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to read MOTD file");
                }
            }
        }
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.clone())
        }
    }
}

/// `[[oper]]` - operator credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct OperBlock {
    pub name: String,
    /// Password, compared through the configured hash provider when one is
    /// registered, plaintext otherwise.
    pub password: String,
    /// Hostmask patterns the oper may authenticate from.
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
}
