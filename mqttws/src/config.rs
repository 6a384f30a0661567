//! Client configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::MAX_STRING_LENGTH;

/// Default broker port (MQTT over secure WebSocket).
pub const DEFAULT_PORT: u16 = 8084;

/// Default URL path of the broker's WebSocket endpoint.
pub const DEFAULT_PATH: &str = "/mqtt";

/// Prefix of generated client identifiers.
pub const CLIENT_ID_PREFIX: &str = "mqttws_";

/// Upper bound for the connect, CONNACK and reconnect durations.
pub const MAX_TIMER_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// WebSocket scheme used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain WebSocket.
    Ws,
    /// WebSocket over TLS.
    #[default]
    Wss,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Ws => f.write_str("ws"),
            Scheme::Wss => f.write_str("wss"),
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ws" => Ok(Scheme::Ws),
            "wss" => Ok(Scheme::Wss),
            other => Err(Error::InvalidConfig(format!("unknown scheme {other:?}"))),
        }
    }
}

/// Client configuration.
///
/// A config is fixed for the duration of one connection attempt; reconnects
/// reuse the config of the last `connect()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// WebSocket scheme.
    pub scheme: Scheme,
    /// URL path of the WebSocket endpoint.
    pub path: String,
    /// Client ID.
    pub client_id: String,
    /// Keep alive interval in seconds. Zero disables PINGREQ.
    pub keep_alive: u16,
    /// Clean session flag.
    pub clean_session: bool,
    /// Username for authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Upper bound for transport open plus CONNACK.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// How long to wait for CONNACK once CONNECT is sent.
    #[serde(with = "millis")]
    pub connack_timeout: Duration,
    /// Delay before an automatic reconnect. Zero disables reconnecting.
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,
    /// Consecutive reconnect attempts before giving up. `None` retries forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            scheme: Scheme::Wss,
            path: DEFAULT_PATH.to_string(),
            client_id: generate_client_id(),
            keep_alive: 60,
            clean_session: true,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(30),
            connack_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: None,
        }
    }
}

impl ClientConfig {
    /// Create a config for `host` with the given client id and defaults for
    /// everything else.
    pub fn new(host: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Set the broker port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the WebSocket scheme.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the URL path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set keep alive interval.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    /// Set clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Set the overall connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the CONNACK timeout.
    pub fn with_connack_timeout(mut self, timeout: Duration) -> Self {
        self.connack_timeout = timeout;
        self
    }

    /// Set the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Limit consecutive reconnect attempts.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Apply a preset server's host, port and scheme.
    pub fn with_preset(mut self, preset: &ServerPreset) -> Self {
        self.host = preset.host.to_string();
        self.port = preset.port;
        self.scheme = preset.scheme;
        self
    }

    /// URL handed to the transport: `{scheme}://{host}:{port}{path}`.
    pub fn server_url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }

    /// Check the config before a connection attempt.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::InvalidConfig("host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port is 0".to_string()));
        }
        if !self.path.is_empty() && !self.path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "path {:?} must start with '/'",
                self.path
            )));
        }
        if self.client_id.is_empty() {
            return Err(Error::InvalidConfig("client id is empty".to_string()));
        }

        let fields = [
            ("client id", Some(&self.client_id)),
            ("username", self.username.as_ref()),
            ("password", self.password.as_ref()),
        ];
        for (name, value) in fields {
            if value.is_some_and(|v| v.len() > MAX_STRING_LENGTH) {
                return Err(Error::InvalidConfig(format!(
                    "{name} exceeds {MAX_STRING_LENGTH} bytes"
                )));
            }
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig("connect timeout is 0".to_string()));
        }
        if self.connack_timeout.is_zero() {
            return Err(Error::InvalidConfig("connack timeout is 0".to_string()));
        }

        let durations = [
            ("connect timeout", self.connect_timeout),
            ("connack timeout", self.connack_timeout),
            ("reconnect delay", self.reconnect_delay),
        ];
        for (name, value) in durations {
            if value > MAX_TIMER_DURATION {
                return Err(Error::InvalidConfig(format!(
                    "{name} exceeds {}s",
                    MAX_TIMER_DURATION.as_secs()
                )));
            }
        }
        Ok(())
    }
}

/// Generate a client id of the form `mqttws_xxxxxxxx`.
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{CLIENT_ID_PREFIX}{}", &id[..8])
}

/// A well-known public broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPreset {
    pub name: &'static str,
    pub host: &'static str,
    pub port: u16,
    pub scheme: Scheme,
    pub description: &'static str,
}

const PRESETS: &[ServerPreset] = &[
    ServerPreset {
        name: "emqx",
        host: "broker.emqx.io",
        port: 8084,
        scheme: Scheme::Wss,
        description: "EMQX public broker",
    },
    ServerPreset {
        name: "emqx-ws",
        host: "broker.emqx.io",
        port: 8083,
        scheme: Scheme::Ws,
        description: "EMQX public broker (unencrypted)",
    },
    ServerPreset {
        name: "mosquitto",
        host: "test.mosquitto.org",
        port: 8081,
        scheme: Scheme::Wss,
        description: "Mosquitto test broker",
    },
];

/// Public brokers that accept MQTT over WebSocket.
pub fn presets() -> &'static [ServerPreset] {
    PRESETS
}

/// Look up a preset by name.
pub fn preset(name: &str) -> Option<&'static ServerPreset> {
    PRESETS.iter().find(|p| p.name == name)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 8084);
        assert_eq!(config.scheme, Scheme::Wss);
        assert_eq!(config.keep_alive, 60);
        assert!(config.clean_session);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.connack_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, None);
    }

    #[test]
    fn test_generated_client_id() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert!(a.starts_with(CLIENT_ID_PREFIX));
        assert_eq!(a.len(), CLIENT_ID_PREFIX.len() + 8);
        assert!(a[CLIENT_ID_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_server_url() {
        let config = ClientConfig::new("broker.emqx.io", "c1");
        assert_eq!(config.server_url(), "wss://broker.emqx.io:8084/mqtt");

        let config = config.with_preset(preset("mosquitto").unwrap()).with_path("/ws");
        assert_eq!(config.server_url(), "wss://test.mosquitto.org:8081/ws");

        let config = config.with_scheme(Scheme::Ws).with_port(8083);
        assert_eq!(config.server_url(), "ws://test.mosquitto.org:8083/ws");
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("h", "c1").validate().is_ok());
        assert!(matches!(
            ClientConfig::new("", "c1").validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(ClientConfig::new("h", "").validate().is_err());
        assert!(ClientConfig::new("h", "c1").with_port(0).validate().is_err());
        assert!(ClientConfig::new("h", "c1").with_path("mqtt").validate().is_err());
        assert!(
            ClientConfig::new("h", "c1")
                .with_connect_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ClientConfig::new("h", "c1")
                .with_credentials("u", "p".repeat(70_000))
                .validate()
                .is_err()
        );
        assert!(
            ClientConfig::new("h", "c1")
                .with_connack_timeout(Duration::MAX)
                .validate()
                .is_err()
        );
        assert!(
            ClientConfig::new("h", "c1")
                .with_reconnect_delay(MAX_TIMER_DURATION + Duration::from_millis(1))
                .validate()
                .is_err()
        );
        assert!(
            ClientConfig::new("h", "c1")
                .with_reconnect_delay(MAX_TIMER_DURATION)
                .validate()
                .is_ok()
        );
        // Zero reconnect delay only disables reconnecting.
        assert!(
            ClientConfig::new("h", "c1")
                .with_reconnect_delay(Duration::ZERO)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_serde_partial() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"host":"broker.emqx.io","port":8083,"scheme":"ws","reconnect_delay":0}"#,
        )
        .unwrap();
        assert_eq!(config.host, "broker.emqx.io");
        assert_eq!(config.scheme, Scheme::Ws);
        assert_eq!(config.reconnect_delay, Duration::ZERO);
        assert_eq!(config.keep_alive, 60);
        assert!(config.client_id.starts_with(CLIENT_ID_PREFIX));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["connect_timeout"], 30_000);
        assert!(json.get("username").is_none());
    }

    #[test]
    fn test_presets() {
        assert_eq!(presets().len(), 3);
        assert_eq!(preset("emqx-ws").unwrap().port, 8083);
        assert!(preset("nope").is_none());
        assert_eq!("ws".parse::<Scheme>().unwrap(), Scheme::Ws);
        assert!("http".parse::<Scheme>().is_err());
    }
}
