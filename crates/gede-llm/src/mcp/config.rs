// MCP server configuration (`{"mcpServers": {...}}` files) and the manager
// that turns enabled entries into live sessions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use super::session::McpSession;
use super::transport::{HttpTransport, StdioTransport};
use super::{McpError, McpServer, McpServers};

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Stdio,
    /// Legacy HTTP+SSE transport.
    Sse,
    StreamableHttp,
}

impl TransportType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stdio" => Some(TransportType::Stdio),
            "sse" => Some(TransportType::Sse),
            "streamable-http" | "streamable_http" | "http" => Some(TransportType::StreamableHttp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
            TransportType::StreamableHttp => "streamable-http",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub enable: bool,
    pub transport: TransportType,
    /// stdio: executable to launch.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// HTTP: endpoint URL.
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
    pub sse_read_timeout: Duration,
    pub terminate_on_close: bool,
    /// The entry as written, including keys this client doesn't use.
    pub raw: Value,
}

impl ServerConfig {
    /// Parse one `mcpServers` entry, validate it and expand `~`/`$VAR` in its
    /// arguments and environment values.
    ///
    /// Names must be non-empty and free of `_`, which separates the server
    /// from the tool in advertised tool names.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, McpError> {
        if name.is_empty() || name.contains('_') {
            return Err(McpError::Config(format!(
                "server name '{name}' must be non-empty and must not contain '_'"
            )));
        }
        let obj = value
            .as_object()
            .ok_or_else(|| McpError::Config(format!("server '{name}' must be an object")))?;

        let type_raw = obj.get("type").and_then(Value::as_str).unwrap_or("stdio");
        let transport = TransportType::parse(type_raw);

        let enable = obj.get("enable").and_then(Value::as_bool).unwrap_or(true);
        let string_list = |key: &str| -> Vec<String> {
            obj.get(key)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };
        let string_map = |key: &str| -> HashMap<String, String> {
            obj.get(key)
                .and_then(Value::as_object)
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default()
        };
        let seconds = |key: &str, default: f64| -> Duration {
            let secs = obj.get(key).and_then(Value::as_f64).unwrap_or(default);
            Duration::from_secs_f64(secs.max(0.0))
        };

        let config = ServerConfig {
            name: name.to_string(),
            enable,
            transport: transport.unwrap_or(TransportType::Stdio),
            command: obj.get("command").and_then(Value::as_str).map(str::to_string),
            args: string_list("args"),
            env: string_map("env"),
            url: obj.get("url").and_then(Value::as_str).map(str::to_string),
            headers: string_map("headers"),
            timeout: seconds("timeout", 30.0),
            sse_read_timeout: seconds("sse_read_timeout", 300.0),
            terminate_on_close: obj
                .get("terminate_on_close")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            raw: value.clone(),
        };

        // Disabled entries are kept without validation.
        if config.enable {
            if transport.is_none() {
                return Err(McpError::Config(format!(
                    "server '{name}' has invalid transport type: {type_raw} \
                     (supported: stdio, sse, streamable-http)"
                )));
            }
            config.validate()?;
        }

        Ok(config.expanded())
    }

    fn validate(&self) -> Result<(), McpError> {
        match self.transport {
            TransportType::Stdio if self.command.as_deref().map_or(true, str::is_empty) => Err(
                McpError::Config(format!("stdio server '{}' is missing 'command'", self.name)),
            ),
            TransportType::Sse | TransportType::StreamableHttp
                if self.url.as_deref().map_or(true, str::is_empty) =>
            {
                Err(McpError::Config(format!(
                    "{} server '{}' is missing 'url'",
                    self.transport.as_str(),
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }

    fn expanded(mut self) -> Self {
        self.args = self.args.iter().map(|a| expand_path(a)).collect();
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_path(v)))
            .collect();
        self
    }

    /// Connect to the server and complete the `initialize` handshake.
    pub async fn connect(&self) -> Result<McpSession, McpError> {
        match self.transport {
            TransportType::Stdio => {
                let command = self.command.as_deref().unwrap_or_default();
                info!(server = %self.name, "connecting to stdio MCP server: {command} {}", self.args.join(" "));
                let transport = StdioTransport::spawn(command, &self.args, &self.env, self.timeout)?;
                McpSession::initialize(&self.name, Box::new(transport)).await
            }
            TransportType::StreamableHttp => {
                let url = self.url.as_deref().unwrap_or_default();
                info!(server = %self.name, "connecting to HTTP MCP server: {url}");
                let transport = HttpTransport::new(
                    url,
                    &self.headers,
                    self.timeout,
                    self.terminate_on_close,
                )?;
                McpSession::initialize(&self.name, Box::new(transport)).await
            }
            TransportType::Sse => Err(McpError::UnsupportedTransport("sse".to_string())),
        }
    }
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown variables
/// are left as written.
pub fn expand_path(input: &str) -> String {
    let with_vars = expand_vars(input);
    if with_vars == "~" || with_vars.starts_with("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf()) {
            return format!("{}{}", home.display(), &with_vars[1..]);
        }
    }
    with_vars
}

fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), std::env::var(name)) {
            (false, Ok(value)) => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// McpManager
// ---------------------------------------------------------------------------

/// All configured servers, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct McpManager {
    pub servers: BTreeMap<String, ServerConfig>,
    pub config_path: Option<PathBuf>,
}

impl McpManager {
    pub fn from_file(path: &Path) -> Result<Self, McpError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let value: Value = serde_json::from_str(&text)?;
        let mut manager = Self::from_value(&value)?;
        manager.config_path = Some(path.to_path_buf());
        Ok(manager)
    }

    pub fn from_value(value: &Value) -> Result<Self, McpError> {
        let servers = value.get("mcpServers").ok_or_else(|| {
            McpError::Config(
                "missing 'mcpServers' field; expected {\"mcpServers\": {\"name\": {...}}}"
                    .to_string(),
            )
        })?;
        let servers = servers
            .as_object()
            .ok_or_else(|| McpError::Config("'mcpServers' must be an object".to_string()))?;

        let mut parsed = BTreeMap::new();
        for (name, entry) in servers {
            parsed.insert(name.clone(), ServerConfig::from_value(name, entry)?);
        }
        Ok(Self {
            servers: parsed,
            config_path: None,
        })
    }

    /// Look up an enabled server by name.
    pub fn get_server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name).filter(|s| s.enable)
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.values().filter(|s| s.enable)
    }

    pub fn server_names(&self, enabled_only: bool) -> Vec<String> {
        self.servers
            .values()
            .filter(|s| !enabled_only || s.enable)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Connect every enabled server. Servers that fail to start are logged
    /// and left out of the returned map.
    pub async fn connect_all(&self) -> McpServers {
        let mut connected: McpServers = BTreeMap::new();
        for config in self.enabled_servers() {
            match config.connect().await {
                Ok(session) => {
                    connected.insert(config.name.clone(), Arc::new(session) as Arc<dyn McpServer>);
                }
                Err(e) => warn!(server = %config.name, "failed to connect MCP server: {e}"),
            }
        }
        connected
    }
}

/// Close every connected server.
pub async fn shutdown_all(servers: &McpServers) {
    for server in servers.values() {
        server.shutdown().await;
    }
}
