use crate::config::{Agent, Log, Transport};

// default values
pub fn get_default_max_try() -> u32 {
    3
}

pub fn get_default_max_fails() -> u32 {
    3
}

pub fn get_default_fail_timeout_ms() -> u64 {
    10_000
}

pub fn get_default_timeout_ms() -> u64 {
    5_000
}

pub fn get_default_http2_only() -> bool {
    false
}

pub fn get_default_max_inflight() -> usize {
    64
}

pub fn get_default_weight() -> u32 {
    1
}

pub fn get_default_log_level() -> String {
    String::from("info")
}

pub fn get_default_agent() -> Agent {
    Agent {
        max_try: get_default_max_try(),
        max_fails: get_default_max_fails(),
        fail_timeout_ms: get_default_fail_timeout_ms(),
    }
}

pub fn get_default_transport() -> Transport {
    Transport {
        timeout_ms: get_default_timeout_ms(),
        http2_only: get_default_http2_only(),
        max_inflight: get_default_max_inflight(),
    }
}

pub fn get_default_log() -> Log {
    Log {
        level: get_default_log_level(),
    }
}
