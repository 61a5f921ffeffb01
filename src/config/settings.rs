use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the WebSocket endpoint, the connection hub and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the WebSocket endpoint.
///
/// `relay_client_messages` controls whether JSON sent by one client is
/// rebroadcast to every other connected client.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub relay_client_messages: bool,
}

/// What the hub does when a member's outbound queue is full.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Deregister the slow consumer.
    #[default]
    Disconnect,
    /// Skip this frame for the slow consumer and keep it registered.
    DropNewest,
}

/// Configuration settings for the connection hub.
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    /// Capacity of each connection's outbound queue, in frames.
    pub queue_capacity: usize,
    pub max_connections: usize,
    /// Capacity of the command channel feeding the coordination loop.
    pub command_buffer: usize,
    pub overflow_policy: OverflowPolicy,
    pub write_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub relay_client_messages: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHubSettings {
    pub queue_capacity: Option<usize>,
    pub max_connections: Option<usize>,
    pub command_buffer: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub write_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_connections: 1000,
            command_buffer: 1024,
            overflow_policy: OverflowPolicy::Disconnect,
            write_timeout_ms: 10_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                relay_client_messages: true,
            },
            hub: HubSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let server = self.server;
        let hub = self.hub;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(defaults.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(defaults.server.port),
                relay_client_messages: server
                    .as_ref()
                    .and_then(|s| s.relay_client_messages)
                    .unwrap_or(defaults.server.relay_client_messages),
            },
            hub: HubSettings {
                queue_capacity: hub
                    .as_ref()
                    .and_then(|h| h.queue_capacity)
                    .unwrap_or(defaults.hub.queue_capacity),
                max_connections: hub
                    .as_ref()
                    .and_then(|h| h.max_connections)
                    .unwrap_or(defaults.hub.max_connections),
                command_buffer: hub
                    .as_ref()
                    .and_then(|h| h.command_buffer)
                    .unwrap_or(defaults.hub.command_buffer),
                overflow_policy: hub
                    .as_ref()
                    .and_then(|h| h.overflow_policy)
                    .unwrap_or(defaults.hub.overflow_policy),
                write_timeout_ms: hub
                    .as_ref()
                    .and_then(|h| h.write_timeout_ms)
                    .unwrap_or(defaults.hub.write_timeout_ms),
                shutdown_grace_ms: hub
                    .as_ref()
                    .and_then(|h| h.shutdown_grace_ms)
                    .unwrap_or(defaults.hub.shutdown_grace_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(defaults.logging.level),
            },
        }
    }
}
