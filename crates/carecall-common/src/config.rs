//! Client configuration loaded from defaults, an optional config file and the
//! environment.
//!
//! Precedence: env vars > .env file > config file > defaults.
//! Environment keys use the `CARECALL` prefix and `__` as the section
//! separator, e.g. `CARECALL__SIGNALING__URL` or `CARECALL__CALL__RING_TIMEOUT_SECS`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Load the configuration.
///
/// When `path` is given that file must exist; otherwise `carecall.toml` in the
/// working directory is read if present.
pub fn load(path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let file = match path {
        Some(p) => config::File::from(p).required(true),
        None => config::File::with_name("carecall").required(false),
    };

    let cfg = config::Config::builder()
        // Defaults
        .set_default("signaling.url", "ws://localhost:5000/signal")?
        .set_default("signaling.connect_timeout_secs", 10)?
        .set_default("signaling.heartbeat_secs", 25)?
        .set_default("call.ring_timeout_secs", 30)?
        .set_default("call.busy_policy", "ignore")?
        .set_default("ice.stun_urls", vec!["stun:stun.l.google.com:19302"])?
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("CARECALL")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("ice.stun_urls")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    app_config.validate()?;

    tracing::debug!(
        signaling = %app_config.signaling.url,
        ring_timeout_secs = app_config.call.ring_timeout_secs,
        "Configuration loaded"
    );

    Ok(app_config)
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub signaling: SignalingConfig,
    pub call: CallConfig,
    pub ice: IceConfig,
}

impl AppConfig {
    fn validate(&self) -> Result<(), config::ConfigError> {
        let url = url::Url::parse(&self.signaling.url).map_err(|e| {
            config::ConfigError::Message(format!("signaling.url is not a valid URL: {e}"))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(config::ConfigError::Message(format!(
                "signaling.url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.call.ring_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "call.ring_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalingConfig {
    /// Relay WebSocket URL.
    pub url: String,
    /// Bearer token presented in the `identify` handshake. Usually supplied
    /// through `CARECALL__SIGNALING__TOKEN` rather than a file.
    pub token: Option<String>,
    /// Upper bound for socket open plus authentication.
    pub connect_timeout_secs: u64,
    /// Interval between WebSocket pings while connected.
    pub heartbeat_secs: u64,
}

impl SignalingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallConfig {
    /// Seconds an outgoing call rings before it is given up as not answered.
    pub ring_timeout_secs: u32,
    /// What to do with an incoming call while another call is active.
    pub busy_policy: BusyPolicy,
}

/// Handling of `incomingCall` events that arrive mid-call.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Log and drop the event; the caller keeps ringing until it times out.
    #[default]
    Ignore,
    /// Answer with `rejectCall` straight away.
    Reject,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IceConfig {
    pub stun_urls: Vec<String>,
    pub turn_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(url: &str, ring: u32) -> AppConfig {
        AppConfig {
            signaling: SignalingConfig {
                url: url.into(),
                token: None,
                connect_timeout_secs: 10,
                heartbeat_secs: 25,
            },
            call: CallConfig {
                ring_timeout_secs: ring,
                busy_policy: BusyPolicy::Ignore,
            },
            ice: IceConfig {
                stun_urls: vec![],
                turn_url: None,
                turn_username: None,
                turn_credential: None,
            },
        }
    }

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = load(None).expect("defaults should be valid");
        assert!(cfg.call.ring_timeout_secs >= 1);
        assert!(cfg.signaling.url.starts_with("ws"));
    }

    #[test]
    fn rejects_http_signaling_url() {
        assert!(sample("http://relay.example.org", 30).validate().is_err());
        assert!(sample("wss://relay.example.org/signal", 30).validate().is_ok());
    }

    #[test]
    fn rejects_zero_ring_timeout() {
        assert!(sample("ws://localhost:5000", 0).validate().is_err());
    }

    #[test]
    fn heartbeat_never_zero() {
        let mut cfg = sample("ws://localhost:5000", 30);
        cfg.signaling.heartbeat_secs = 0;
        assert_eq!(cfg.signaling.heartbeat_interval(), Duration::from_secs(1));
    }
}
