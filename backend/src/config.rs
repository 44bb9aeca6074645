use mesh_inspect_core::DispatcherConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `MESH_INSPECT_*` keys through `lookup`. Unparseable values are
    /// logged and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let dispatcher = DispatcherConfig {
            executor_timeout_ms: parse_or(
                &lookup,
                "MESH_INSPECT_EXECUTOR_TIMEOUT_MS",
                defaults.dispatcher.executor_timeout_ms,
            ),
            resolver_timeout_ms: parse_or(
                &lookup,
                "MESH_INSPECT_RESOLVER_TIMEOUT_MS",
                defaults.dispatcher.resolver_timeout_ms,
            ),
            ..defaults.dispatcher
        };
        Self {
            addr: parse_or(&lookup, "MESH_INSPECT_ADDR", defaults.addr),
            max_upload_bytes: parse_or(&lookup, "MESH_INSPECT_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            dispatcher,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
    }
}
