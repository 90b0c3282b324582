//! Default values for optional configuration fields.

pub fn default_casemap() -> String {
    "rfc1459".to_string()
}

pub fn default_hosts() -> Vec<String> {
    vec!["*".to_string()]
}

pub fn default_max_conns_per_ip() -> u32 {
    3
}

pub fn default_sendq() -> usize {
    262_144
}

pub fn default_recvq() -> usize {
    8_192
}

pub fn default_penalty_ceiling_ms() -> u64 {
    10_000
}

pub fn default_pingfreq_secs() -> u64 {
    120
}

pub fn default_registration_timeout_secs() -> u64 {
    90
}

pub fn default_resolve_timeout_secs() -> u64 {
    5
}

pub fn default_true() -> bool {
    true
}

pub fn default_max_line() -> usize {
    512
}

pub fn default_max_modes_per_line() -> usize {
    20
}

pub fn default_max_list_entries() -> usize {
    100
}

pub fn default_max_channels_per_user() -> usize {
    20
}

pub fn default_nick_len() -> usize {
    30
}

pub fn default_topic_len() -> usize {
    307
}

pub fn default_kick_len() -> usize {
    255
}

pub fn default_away_len() -> usize {
    200
}

pub fn default_host_len() -> usize {
    64
}

pub fn default_ident_len() -> usize {
    10
}

pub fn default_xline_db() -> String {
    "xlines.db".to_string()
}

pub fn default_save_interval_secs() -> u64 {
    30
}

pub fn default_port() -> u16 {
    6667
}

pub fn default_addr() -> String {
    "0.0.0.0".to_string()
}

pub fn default_worker_threads() -> usize {
    4
}
