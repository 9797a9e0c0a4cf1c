//! Connection configuration.

use std::time::Duration;

use tds5_protocol::codec::ByteOrder;
use tds5_protocol::{DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE};

use crate::error::{Error, Result};

/// Timeout configuration for connection operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Login handshake timeout, covering the capability exchange.
    pub login_timeout: Duration,
    /// Command execution timeout. `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
    /// Idle timeout before a pooled connection is considered stale.
    pub idle_timeout: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(30),
            command_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Configuration for an ASE connection.
///
/// # Example
///
/// ```rust
/// use ase_client::ConnectionConfig;
///
/// let config = ConnectionConfig::new("ase.example.com")
///     .port(5000)
///     .database("pubs2")
///     .username("sa")
///     .password("secret");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectionConfig {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port (default 5000).
    pub port: u16,
    /// Initial database, empty for the login default.
    pub database: String,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Server name from the interfaces entry, informational.
    pub server_name: String,
    /// Client host name reported in the login record.
    pub client_host: String,
    /// Initial language, empty for the server default.
    pub language: String,
    /// Requested charset name (e.g. `iso_1`, `utf8`).
    pub charset: String,
    /// Requested packet size in bytes.
    pub packet_size: u16,
    /// Integer/float byte order declared at login.
    pub byte_order: ByteOrder,
    /// Text/image size limit to set after login, `None` for server default.
    pub text_size: Option<u32>,
    /// Whether parameters are sent with `@p1`-style names. When disabled
    /// they travel positionally with blank names.
    pub named_parameters: bool,
    /// Whether to honor packet size changes announced by the server.
    pub server_packet_size: bool,
    /// Whether connections for this configuration may be pooled.
    pub pooling: bool,
    /// Minimum pool size override, `None` for the pool's own default.
    pub min_pool_size: Option<u32>,
    /// Maximum pool size override, `None` for the pool's own default.
    pub max_pool_size: Option<u32>,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl ConnectionConfig {
    /// Create a new configuration for the given server.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 5000,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            app_name: "rust-ase".to_string(),
            server_name: String::new(),
            client_host: "localhost".to_string(),
            language: String::new(),
            charset: "iso_1".to_string(),
            packet_size: DEFAULT_PACKET_SIZE as u16,
            byte_order: ByteOrder::LittleEndian,
            text_size: None,
            named_parameters: true,
            server_packet_size: true,
            pooling: true,
            min_pool_size: None,
            max_pool_size: None,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Parse a semicolon-separated `key=value` connection string.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ase_client::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::from_connection_string(
    ///     "Server=ase.example.com,5000;Database=pubs2;User Id=sa;Password=secret",
    /// ).unwrap();
    /// assert_eq!(config.host, "ase.example.com");
    /// assert_eq!(config.database, "pubs2");
    /// ```
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let mut config = Self::new("localhost");

        for pair in connection_string.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let Some((key, value)) = pair.split_once('=') else {
                return Err(Error::Config(format!("invalid key=value pair: {pair}")));
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "host" | "data source" => {
                    // Port may ride along after a comma or colon.
                    if let Some((host, port)) = value.split_once([',', ':']) {
                        config.host = host.trim().to_string();
                        config.port = port
                            .trim()
                            .parse()
                            .map_err(|_| Error::Config(format!("invalid port: {port}")))?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid port: {value}")))?;
                }
                "database" | "initial catalog" => config.database = value.to_string(),
                "user id" | "uid" | "user" => config.username = value.to_string(),
                "password" | "pwd" => config.password = value.to_string(),
                "application name" => config.app_name = value.to_string(),
                "workstation id" => config.client_host = value.to_string(),
                "charset" | "character set" => config.charset = value.to_string(),
                "language" => config.language = value.to_string(),
                "packet size" => {
                    let size: u16 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid packet size: {value}")))?;
                    config = config.packet_size(size)?;
                }
                "text size" => {
                    let size: u32 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid text size: {value}")))?;
                    config.text_size = Some(size);
                }
                "connect timeout" | "connection timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.timeouts.connect_timeout = Duration::from_secs(secs);
                }
                "named parameters" | "namedparameters" => {
                    config.named_parameters = parse_bool(&key, value)?;
                }
                "enable server packet size" | "enableserverpacketsize" => {
                    config.server_packet_size = parse_bool(&key, value)?;
                }
                "pooling" => config.pooling = parse_bool(&key, value)?,
                "min pool size" => {
                    config.min_pool_size = Some(value.parse().map_err(|_| {
                        Error::Config(format!("invalid min pool size: {value}"))
                    })?);
                }
                "max pool size" => {
                    config.max_pool_size = Some(value.parse().map_err(|_| {
                        Error::Config(format!("invalid max pool size: {value}"))
                    })?);
                }
                "login timeout" | "logintimeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.timeouts.login_timeout = Duration::from_secs(secs);
                }
                "command timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    config.timeouts.command_timeout = if secs == 0 {
                        None
                    } else {
                        Some(Duration::from_secs(secs))
                    };
                }
                "encrypt" | "encryption" => {
                    // Transport and password encryption are not implemented;
                    // reject rather than silently connect in the clear.
                    match value.to_lowercase().as_str() {
                        "no" | "none" | "false" | "disabled" => {}
                        other => {
                            return Err(Error::Config(format!(
                                "encryption '{other}' is not supported"
                            )));
                        }
                    }
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown connection string key");
                }
            }
        }

        Ok(config)
    }

    /// Enable or disable `@p1`-style parameter names.
    #[must_use]
    pub fn named_parameters(mut self, enabled: bool) -> Self {
        self.named_parameters = enabled;
        self
    }

    /// Enable or disable honoring server-announced packet size changes.
    #[must_use]
    pub fn server_packet_size(mut self, enabled: bool) -> Self {
        self.server_packet_size = enabled;
        self
    }

    /// Enable or disable pooling for this configuration.
    #[must_use]
    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling = enabled;
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the login name.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the requested charset.
    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the initial language.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the integer/float byte order declared at login.
    #[must_use]
    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Set the requested packet size.
    ///
    /// The server may negotiate a different size via ENVCHANGE; this is the
    /// value requested in the login record.
    pub fn packet_size(mut self, size: u16) -> Result<Self> {
        if (size as usize) < tds5_protocol::PACKET_HEADER_SIZE + 1
            || size as usize > MAX_PACKET_SIZE
        {
            return Err(Error::Config(format!("packet size out of range: {size}")));
        }
        self.packet_size = size;
        Ok(self)
    }

    /// Set the text/image size limit applied after login.
    #[must_use]
    pub fn text_size(mut self, size: u32) -> Self {
        self.text_size = Some(size);
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Server address in `host:port` form.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Normalized key identifying connections that are interchangeable for
    /// pooling purposes.
    #[must_use]
    pub fn pool_key(&self) -> String {
        format!(
            "{}:{}/{}@{}#{}",
            self.host.to_lowercase(),
            self.port,
            self.database.to_lowercase(),
            self.username,
            self.charset.to_lowercase(),
        )
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(Error::Config(format!("invalid value for {key}: {other}"))),
    }
}
