use serde::{Deserialize, Serialize};

use crate::default::{
    get_default_agent, get_default_fail_timeout_ms, get_default_http2_only, get_default_log,
    get_default_log_level, get_default_max_fails, get_default_max_inflight, get_default_max_try,
    get_default_timeout_ms, get_default_transport, get_default_weight,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "get_default_agent")]
    pub agent: Agent,

    #[serde(default = "get_default_transport")]
    pub transport: Transport,

    pub backends: Vec<Backend>,

    #[serde(default = "get_default_log")]
    pub log: Log,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Agent {
    #[serde(default = "get_default_max_try")]
    pub max_try: u32,

    #[serde(default = "get_default_max_fails")]
    pub max_fails: u32,

    #[serde(default = "get_default_fail_timeout_ms")]
    pub fail_timeout_ms: u64, // cooldown once a backend is marked down
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Transport {
    #[serde(default = "get_default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "get_default_http2_only")]
    pub http2_only: bool,

    #[serde(default = "get_default_max_inflight")]
    pub max_inflight: usize, // per backend
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Backend {
    pub host: String, // "127.0.0.1"

    pub port: u16,

    #[serde(default = "get_default_weight")]
    pub weight: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Log {
    // whisper -> trace
    // haunt -> debug
    // spooky -> info
    // scream -> warn
    // poltergeist -> error
    // silence -> off

    #[serde(default = "get_default_log_level")]
    pub level: String,
}
