//! Selective logging of call traffic.
//!
//! A [`LogPolicy`] gates four independent categories. Messages go to a
//! pluggable [`LogSink`]; the default forwards to `tracing`. For traffic
//! events `data` wins over `calls`, so one event never logs twice.

use crate::config::LoggingConfig;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// Which categories of events are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPolicy {
    /// Endpoint registration.
    pub create: bool,
    /// Endpoint name of each request and response.
    pub calls: bool,
    /// Full payload of each request and response. Suppresses `calls` lines.
    pub data: bool,
    /// Every error surfaced to a caller.
    pub exceptions: bool,
}

impl LogPolicy {
    pub const fn none() -> Self {
        Self {
            create: false,
            calls: false,
            data: false,
            exceptions: false,
        }
    }

    pub const fn all() -> Self {
        Self {
            create: true,
            calls: true,
            data: true,
            exceptions: true,
        }
    }

    /// Parse a comma-separated category list, e.g. `"calls,exceptions"`.
    ///
    /// `all` and `none` are accepted as shorthands; an empty string is `none`.
    pub fn parse(list: &str) -> Result<Self> {
        let mut policy = Self::none();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_ascii_lowercase().as_str() {
                "all" => policy = Self::all(),
                "none" => policy = Self::none(),
                "create" => policy.create = true,
                "calls" => policy.calls = true,
                "data" => policy.data = true,
                "exceptions" => policy.exceptions = true,
                other => {
                    return Err(BridgeError::Config {
                        message: format!("unknown log category {:?}", other),
                    })
                }
            }
        }
        Ok(policy)
    }

    /// Read the policy from `STUBWIRE_LOG`. Unset means nothing is logged.
    pub fn from_env() -> Result<Self> {
        match std::env::var(LoggingConfig::ENV_VAR) {
            Ok(list) => Self::parse(&list),
            Err(_) => Ok(Self::none()),
        }
    }
}

impl FromStr for LogPolicy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Destination of log lines.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Default sink: one `tracing` info event per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: LoggingConfig::TARGET, "{}", message);
    }
}

/// Logging policy plus sink, owned by one framework instance.
///
/// Both halves can be swapped while calls are in flight; the change applies
/// to the next line logged.
pub struct Observer {
    policy: RwLock<LogPolicy>,
    sink: RwLock<Arc<dyn LogSink>>,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new(LogPolicy::none(), Arc::new(TracingSink))
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("policy", &self.policy())
            .finish_non_exhaustive()
    }
}

impl Observer {
    pub fn new(policy: LogPolicy, sink: Arc<dyn LogSink>) -> Self {
        Self {
            policy: RwLock::new(policy),
            sink: RwLock::new(sink),
        }
    }

    pub fn policy(&self) -> LogPolicy {
        *self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_policy(&self, policy: LogPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    /// Log regardless of policy.
    pub fn always(&self, message: &str) {
        let sink = self.sink.read().unwrap_or_else(PoisonError::into_inner).clone();
        sink.log(message);
    }

    fn traffic(&self, data: impl FnOnce() -> String, calls: impl FnOnce() -> String) {
        let policy = self.policy();
        if policy.data {
            self.always(&data());
        } else if policy.calls {
            self.always(&calls());
        }
    }

    pub fn endpoint_created(&self, endpoint: &str) {
        if self.policy().create {
            self.always(&format!("creating endpoint for {}", endpoint));
        }
    }

    pub fn request_sent(&self, endpoint: &str, payload: &str) {
        self.traffic(
            || format!("Endpoint {} requesting with {}", endpoint, payload),
            || format!("Endpoint {} requesting", endpoint),
        );
    }

    pub fn response_received(&self, endpoint: &str, payload: &str, exception: bool) {
        self.traffic(
            || format!("Endpoint {} responded with {}", endpoint, payload),
            || {
                format!(
                    "Endpoint {} responded {}",
                    endpoint,
                    if exception { "with exception" } else { "successfully" }
                )
            },
        );
    }

    pub fn call_reached(&self, endpoint: &str, payload: &str) {
        self.traffic(
            || format!("Endpoint {} reached with {}", endpoint, payload),
            || format!("Endpoint {} reached", endpoint),
        );
    }

    pub fn push_received(&self, payload: &str) {
        self.traffic(
            || format!("Listener content received {}", payload),
            || "Listener content received".to_string(),
        );
    }

    pub fn exception(&self, err: &dyn fmt::Display) {
        if self.policy().exceptions {
            self.always(&err.to_string());
        }
    }
}
