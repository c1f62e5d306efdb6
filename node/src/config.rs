// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use caseline_kernel::sync::ClosedCasePolicy;
use caseline_kernel::types::CaseId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "CASELINE_";

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    /// Segment file for the event log. `None` keeps the log in memory.
    pub event_log_path: Option<PathBuf>,
    /// Bearer token granting administrator (midwife) access to every case.
    pub admin_token: Option<String>,
    /// Bearer token per case for patient side clients.
    pub case_tokens: HashMap<CaseId, String>,
    /// Cases registered as active at startup.
    pub seed_cases: Vec<CaseId>,
    pub ws_idle: Duration,
    pub ws_grace: Duration,
    pub ws_send_timeout: Duration,
    /// Outbound frames buffered per WebSocket before sends start timing out.
    pub ws_buffer: usize,
    pub closed_policy: ClosedCasePolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            event_log_path: None,
            admin_token: None,
            case_tokens: HashMap::new(),
            seed_cases: Vec::new(),
            ws_idle: Duration::from_secs(30),
            ws_grace: Duration::from_secs(10),
            ws_send_timeout: Duration::from_secs(2),
            ws_buffer: 64,
            closed_policy: ClosedCasePolicy::Accept,
        }
    }
}

impl NodeConfig {
    /// Defaults overridden by `CASELINE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(addr) = get("BIND_ADDR") {
            cfg.bind_addr = parse_or(&addr, "BIND_ADDR", cfg.bind_addr);
        }
        if let Some(path) = get("EVENT_LOG_PATH") {
            cfg.event_log_path = Some(PathBuf::from(path));
        }
        cfg.admin_token = get("ADMIN_TOKEN");
        if let Some(raw) = get("CASE_TOKENS") {
            cfg.case_tokens = parse_case_tokens(&raw);
        }
        if let Some(raw) = get("SEED_CASES") {
            cfg.seed_cases = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match CaseId::from_str(s) {
                    Ok(id) => Some(id),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid case id in SEED_CASES: {}", s);
                        None
                    }
                })
                .collect();
        }
        if let Some(secs) = get("WS_IDLE_SECS") {
            cfg.ws_idle = Duration::from_secs(parse_or(&secs, "WS_IDLE_SECS", cfg.ws_idle.as_secs()));
        }
        if let Some(secs) = get("WS_GRACE_SECS") {
            cfg.ws_grace = Duration::from_secs(parse_or(&secs, "WS_GRACE_SECS", cfg.ws_grace.as_secs()));
        }
        if let Some(ms) = get("WS_SEND_TIMEOUT_MS") {
            let default_ms = cfg.ws_send_timeout.as_millis() as u64;
            cfg.ws_send_timeout = Duration::from_millis(parse_or(&ms, "WS_SEND_TIMEOUT_MS", default_ms));
        }
        if let Some(flag) = get("REJECT_CLOSED_CASES") {
            if parse_or(&flag, "REJECT_CLOSED_CASES", false) {
                cfg.closed_policy = ClosedCasePolicy::Reject;
            }
        }

        // Every case with a token must exist
        for case_id in cfg.case_tokens.keys() {
            if !cfg.seed_cases.contains(case_id) {
                cfg.seed_cases.push(*case_id);
            }
        }
        cfg
    }
}

fn parse_or<T: FromStr>(raw: &str, name: &str, default: T) -> T {
    match raw.parse() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("Invalid value for {}{}: {:?}, keeping default", ENV_PREFIX, name, raw);
            default
        }
    }
}

/// Parse `case_uuid=token,case_uuid=token`.
fn parse_case_tokens(raw: &str) -> HashMap<CaseId, String> {
    let mut out = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let parsed = pair
            .split_once('=')
            .and_then(|(case, token)| Some((CaseId::from_str(case.trim()).ok()?, token.trim())))
            .filter(|(_, token)| !token.is_empty());
        match parsed {
            Some((case_id, token)) => {
                out.insert(case_id, token.to_string());
            }
            None => tracing::warn!("Ignoring malformed CASE_TOKENS entry"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = NodeConfig::from_lookup(|_| None);
        assert_eq!(cfg.bind_addr.port(), 3000);
        assert!(cfg.event_log_path.is_none());
        assert_eq!(cfg.ws_idle, Duration::from_secs(30));
        assert_eq!(cfg.ws_grace, Duration::from_secs(10));
        assert_eq!(cfg.ws_send_timeout, Duration::from_secs(2));
        assert_eq!(cfg.closed_policy, ClosedCasePolicy::Accept);
    }

    #[test]
    fn test_env_overrides() {
        let case = CaseId::new_v4();
        let tokens = format!("{}=patient-secret, not-a-pair", case);
        let cfg = NodeConfig::from_lookup(lookup(&[
            ("CASELINE_BIND_ADDR", "0.0.0.0:8080"),
            ("CASELINE_EVENT_LOG_PATH", "/var/lib/caseline/events.clog"),
            ("CASELINE_ADMIN_TOKEN", "midwife-secret"),
            ("CASELINE_CASE_TOKENS", tokens.as_str()),
            ("CASELINE_WS_IDLE_SECS", "5"),
            ("CASELINE_WS_SEND_TIMEOUT_MS", "250"),
            ("CASELINE_REJECT_CLOSED_CASES", "true"),
        ]));

        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.event_log_path, Some(PathBuf::from("/var/lib/caseline/events.clog")));
        assert_eq!(cfg.admin_token.as_deref(), Some("midwife-secret"));
        assert_eq!(cfg.case_tokens.get(&case).map(String::as_str), Some("patient-secret"));
        assert_eq!(cfg.case_tokens.len(), 1);
        assert_eq!(cfg.seed_cases, vec![case]);
        assert_eq!(cfg.ws_idle, Duration::from_secs(5));
        assert_eq!(cfg.ws_send_timeout, Duration::from_millis(250));
        assert_eq!(cfg.closed_policy, ClosedCasePolicy::Reject);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = NodeConfig::from_lookup(lookup(&[
            ("CASELINE_BIND_ADDR", "nowhere"),
            ("CASELINE_WS_GRACE_SECS", "-3"),
            ("CASELINE_SEED_CASES", "garbage"),
        ]));
        assert_eq!(cfg.bind_addr.port(), 3000);
        assert_eq!(cfg.ws_grace, Duration::from_secs(10));
        assert!(cfg.seed_cases.is_empty());
    }
}
