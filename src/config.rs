use crate::core::{Result, SqlBridgeError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Name under which the top-level options are addressed.
pub const DEFAULT_SERVER: &str = "default";

/// Connection options for one logical server.
///
/// Every field is optional so that a named server can override only what
/// differs from the defaults. Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectionOptions {
    pub host: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Pre-built connection string; wins over the discrete fields
    pub conn_string: Option<String>,
    /// Decode native strings as strict UTF-8
    pub utf8: Option<bool>,
    /// Command timeout in seconds
    pub command_timeout: Option<u64>,
    /// Casing applied to column names before they become field names
    pub identifier_output: Option<IdentifierCase>,
}

impl ConnectionOptions {
    /// Field-by-field merge; values in `self` win over `defaults`.
    pub fn merged_over(&self, defaults: &ConnectionOptions) -> ConnectionOptions {
        ConnectionOptions {
            host: self.host.clone().or_else(|| defaults.host.clone()),
            database: self.database.clone().or_else(|| defaults.database.clone()),
            user: self.user.clone().or_else(|| defaults.user.clone()),
            password: self.password.clone().or_else(|| defaults.password.clone()),
            conn_string: self.conn_string.clone().or_else(|| defaults.conn_string.clone()),
            utf8: self.utf8.or(defaults.utf8),
            command_timeout: self.command_timeout.or(defaults.command_timeout),
            identifier_output: self.identifier_output.or(defaults.identifier_output),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.map(Duration::from_secs)
    }

    /// The native connection string: `conn_string` if given, otherwise
    /// assembled from host, database and credentials.
    ///
    /// Without a `user` the connection asks for integrated (trusted)
    /// authentication instead of guessing a login.
    pub fn connection_string(&self) -> String {
        if let Some(conn_string) = &self.conn_string {
            return conn_string.clone();
        }
        let mut connstr = format!(
            "Data Source={};Initial Catalog={};",
            quote_value(self.host.as_deref().unwrap_or_default()),
            quote_value(self.database.as_deref().unwrap_or_default()),
        );
        match &self.user {
            Some(user) => connstr.push_str(&format!(
                "User ID={};Password={}",
                quote_value(user),
                quote_value(self.password.as_deref().unwrap_or_default()),
            )),
            None => connstr.push_str("Integrated Security=True"),
        }
        connstr
    }
}

fn quote_value(value: &str) -> String {
    if value.contains(';') || value.starts_with(['\'', '"']) || value != value.trim() {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Output identifier transform applied to column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierCase {
    #[default]
    Preserve,
    #[serde(alias = "downcase")]
    Lower,
    #[serde(alias = "upcase")]
    Upper,
}

impl IdentifierCase {
    pub fn apply(self, identifier: &str) -> String {
        match self {
            IdentifierCase::Preserve => identifier.to_string(),
            IdentifierCase::Lower => identifier.to_lowercase(),
            IdentifierCase::Upper => identifier.to_uppercase(),
        }
    }
}

/// Top-level configuration: default options plus named servers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(flatten)]
    pub defaults: ConnectionOptions,
    #[serde(default)]
    pub servers: HashMap<String, ConnectionOptions>,
}

impl DatabaseConfig {
    pub fn new(defaults: ConnectionOptions) -> Self {
        DatabaseConfig {
            defaults,
            servers: HashMap::new(),
        }
    }

    /// Adds or replaces a named server.
    pub fn with_server(mut self, name: &str, options: ConnectionOptions) -> Self {
        self.servers.insert(name.to_string(), options);
        self
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SqlBridgeError::Config(e.to_string()))
    }

    /// Resolved options for `server`; unknown names get the defaults.
    pub fn server_opts(&self, server: &str) -> ConnectionOptions {
        match self.servers.get(server) {
            Some(options) if server != DEFAULT_SERVER => options.merged_over(&self.defaults),
            _ => self.defaults.clone(),
        }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = sqlbridge::config::load_config("sqlbridge.toml").expect("Failed to load config");
/// println!("{:?}", config.server_opts("default"));
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DatabaseConfig> {
    let content = fs::read_to_string(path)?;
    DatabaseConfig::from_toml(&content)
}

/// Parsed `key=value;` connection string.
///
/// Keys are matched case-insensitively; values may be wrapped in single or
/// double quotes (a doubled quote inside stands for itself).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionString {
    pairs: Vec<(String, String)>,
}

impl ConnectionString {
    pub fn parse(input: &str) -> std::result::Result<Self, String> {
        let mut pairs = Vec::new();
        let mut rest = input.trim_start();

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix(';') {
                rest = stripped.trim_start();
                continue;
            }
            let eq = rest
                .find('=')
                .ok_or_else(|| format!("expected 'key=value' in connection string near {:?}", rest))?;
            let key = rest[..eq].trim();
            if key.is_empty() || key.contains(';') {
                return Err(format!("missing key in connection string near {:?}", rest));
            }
            let (value, remainder) = parse_value(rest[eq + 1..].trim_start())?;
            pairs.push((key.to_ascii_lowercase(), value));
            rest = remainder.trim_start();
        }

        Ok(ConnectionString { pairs })
    }

    /// Last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Interprets `key` as a boolean (`true/false`, `yes/no`, `1/0`, `sspi`).
    pub fn get_bool(&self, key: &str) -> std::result::Result<Option<bool>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "sspi" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                other => Err(format!("invalid boolean {:?} for '{}'", other, key)),
            },
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }
}

fn parse_value(input: &str) -> std::result::Result<(String, &str), String> {
    let quote = match input.chars().next() {
        Some(q @ ('\'' | '"')) => q,
        _ => {
            let end = input.find(';').unwrap_or(input.len());
            return Ok((input[..end].trim().to_string(), &input[end..]));
        }
    };

    let mut value = String::new();
    let mut chars = input[1..].char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            if matches!(chars.peek(), Some((_, next)) if *next == quote) {
                value.push(quote);
                chars.next();
                continue;
            }
            let rest = input[1 + i + c.len_utf8()..].trim_start();
            if !rest.is_empty() && !rest.starts_with(';') {
                return Err(format!("unexpected text after quoted value: {:?}", rest));
            }
            return Ok((value, rest));
        }
        value.push(c);
    }
    Err("unterminated quoted value in connection string".to_string())
}
