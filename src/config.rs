//! Process configuration.
//!
//! Settings are read from environment variables. The binary loads an optional
//! `.env` file first; [`Settings::from_lookup`] takes any key lookup so tests
//! never touch the real environment.

use crate::error::BridgeError;
use crate::types::AgentConfig;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18061;
pub const DEFAULT_MCP_SERVER_URL: &str = "http://127.0.0.1:18060";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Complete settings for one process.
#[derive(Clone, Debug)]
pub struct Settings {
    pub server: ServerSettings,
    pub mcp: McpSettings,
    pub llm: LlmSettings,
    pub agent: AgentConfig,
    /// Filter directive for the log subscriber
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// How long a connection may stay silent before a `ping` is sent
    pub idle_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Remote tool service location and timeouts.
#[derive(Clone, Debug)]
pub struct McpSettings {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

impl McpSettings {
    /// Builds settings for a base URL with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if the URL does not parse.
    pub fn new(base_url: &str) -> Result<Self, BridgeError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            BridgeError::Configuration(format!("invalid MCP_SERVER_URL {base_url:?}: {e}"))
        })?;
        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
        })
    }

    /// JSON-RPC endpoint, `{base}/mcp`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.join("mcp")
    }

    /// Health probe, `{base}/health`.
    #[must_use]
    pub fn health_url(&self) -> String {
        self.join("health")
    }

    fn join(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }
}

/// How the API key is rendered into its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiKeyFormat {
    /// `Bearer <key>`
    Bearer,
    /// The key as-is
    Raw,
}

impl FromStr for ApiKeyFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.trim().eq_ignore_ascii_case("bearer") {
            Self::Bearer
        } else {
            Self::Raw
        })
    }
}

/// OpenAI-compatible model backend.
#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub api_key_header: String,
    pub api_key_format: ApiKeyFormat,
    /// Extra bearer token for gateways that want both a key and a token
    pub authorization_token: Option<String>,
    pub custom_headers: Vec<(String, String)>,
    pub request_timeout: Duration,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key_header: "Authorization".to_string(),
            api_key_format: ApiKeyFormat::Bearer,
            authorization_token: None,
            custom_headers: Vec::new(),
            request_timeout: Duration::from_secs(120),
            temperature: 0.3,
        }
    }
}

impl LlmSettings {
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Headers to attach to every model request.
    ///
    /// The key goes into the configured header. The authorization token only
    /// fills `Authorization` if the key did not already claim it, and custom
    /// headers are applied last and win.
    #[must_use]
    pub fn auth_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();

        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = match self.api_key_format {
                ApiKeyFormat::Bearer => format!("Bearer {key}"),
                ApiKeyFormat::Raw => key.to_string(),
            };
            headers.push((self.api_key_header.clone(), value));
        }

        if let Some(token) = self.authorization_token.as_deref().filter(|t| !t.is_empty())
            && !headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        for (name, value) in &self.custom_headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        headers
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] for unparsable values.
    pub fn from_env() -> Result<Self, BridgeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] for unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server = ServerSettings {
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            idle_timeout: Duration::from_secs(parse_or(&get, "WS_IDLE_TIMEOUT", 300)?),
        };

        let mut mcp = McpSettings::new(
            &get("MCP_SERVER_URL").unwrap_or_else(|| DEFAULT_MCP_SERVER_URL.to_string()),
        )?;
        mcp.request_timeout = Duration::from_secs(parse_or(&get, "MCP_REQUEST_TIMEOUT", 30)?);

        let llm = LlmSettings {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            api_key_header: get("LLM_API_KEY_HEADER").unwrap_or_else(|| "Authorization".to_string()),
            api_key_format: get("LLM_API_KEY_FORMAT")
                .map_or(ApiKeyFormat::Bearer, |f| f.parse().unwrap_or(ApiKeyFormat::Bearer)),
            authorization_token: get("LLM_AUTHORIZATION_TOKEN"),
            custom_headers: get("LLM_CUSTOM_HEADERS")
                .map(|raw| parse_custom_headers(&raw))
                .unwrap_or_default(),
            request_timeout: Duration::from_secs(parse_or(&get, "LLM_REQUEST_TIMEOUT", 120)?),
            temperature: parse_or(&get, "LLM_TEMPERATURE", 0.3)?,
        };

        let defaults = AgentConfig::default();
        let agent = AgentConfig {
            max_rounds: parse_or(&get, "AGENT_MAX_ROUNDS", defaults.max_rounds)?,
            max_tool_turns: parse_or(&get, "AGENT_MAX_TOOL_TURNS", defaults.max_tool_turns)?,
            streaming: parse_or(&get, "AGENT_STREAMING", defaults.streaming)?,
            ..defaults
        };

        Ok(Self {
            server,
            mcp,
            llm,
            agent,
            log_level: get("LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string())
                .to_lowercase(),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, BridgeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| BridgeError::Configuration(format!("invalid {key} {raw:?}: {e}"))),
    }
}

/// Parses `LLM_CUSTOM_HEADERS`, a JSON object of header name to value.
/// Anything else is logged and ignored.
fn parse_custom_headers(raw: &str) -> Vec<(String, String)> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, value)
            })
            .collect(),
        Ok(_) => {
            log::warn!("LLM_CUSTOM_HEADERS must be a JSON object, ignoring");
            Vec::new()
        }
        Err(e) => {
            log::warn!("LLM_CUSTOM_HEADERS is not valid JSON, ignoring: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, BridgeError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let s = settings(&[])?;
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 18061);
        assert_eq!(s.server.idle_timeout, Duration::from_secs(300));
        assert_eq!(s.mcp.endpoint(), "http://127.0.0.1:18060/mcp");
        assert_eq!(s.mcp.health_url(), "http://127.0.0.1:18060/health");
        assert_eq!(s.mcp.request_timeout, Duration::from_secs(30));
        assert_eq!(s.mcp.health_timeout, Duration::from_secs(5));
        assert_eq!(s.llm.model, "gpt-4o-mini");
        assert_eq!(s.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(s.llm.request_timeout, Duration::from_secs(120));
        assert!(!s.llm.has_credential());
        assert_eq!(s.agent.max_rounds, 5);
        assert_eq!(s.log_level, "info");
        Ok(())
    }

    #[test]
    fn test_overrides() -> anyhow::Result<()> {
        let s = settings(&[
            ("PORT", "9000"),
            ("MCP_SERVER_URL", "http://tools.local:8080/"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "qwen-plus"),
            ("AGENT_MAX_ROUNDS", "3"),
            ("AGENT_STREAMING", "false"),
            ("LOG_LEVEL", "DEBUG"),
        ])?;
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.mcp.endpoint(), "http://tools.local:8080/mcp");
        assert!(s.llm.has_credential());
        assert_eq!(s.llm.model, "qwen-plus");
        assert_eq!(s.agent.max_rounds, 3);
        assert!(!s.agent.streaming);
        assert_eq!(s.log_level, "debug");
        Ok(())
    }

    #[test]
    fn test_invalid_number_is_configuration_error() {
        let err = settings(&[("PORT", "eighty")]).expect_err("should fail");
        assert!(matches!(err, BridgeError::Configuration(msg) if msg.contains("PORT")));
    }

    #[test]
    fn test_invalid_mcp_url_is_configuration_error() {
        let err = settings(&[("MCP_SERVER_URL", "not a url")]).expect_err("should fail");
        assert!(matches!(err, BridgeError::Configuration(_)));
    }

    #[test]
    fn test_default_auth_is_bearer_authorization() {
        let llm = LlmSettings {
            api_key: Some("sk-1".to_string()),
            ..LlmSettings::default()
        };
        assert_eq!(
            llm.auth_headers(),
            vec![("Authorization".to_string(), "Bearer sk-1".to_string())]
        );
    }

    #[test]
    fn test_custom_key_header_with_raw_format_and_token() {
        let llm = LlmSettings {
            api_key: Some("key-1".to_string()),
            api_key_header: "api-key".to_string(),
            api_key_format: ApiKeyFormat::Raw,
            authorization_token: Some("tok".to_string()),
            ..LlmSettings::default()
        };
        assert_eq!(
            llm.auth_headers(),
            vec![
                ("api-key".to_string(), "key-1".to_string()),
                ("Authorization".to_string(), "Bearer tok".to_string()),
            ]
        );
    }

    #[test]
    fn test_token_does_not_override_key_in_authorization() {
        let llm = LlmSettings {
            api_key: Some("sk-1".to_string()),
            authorization_token: Some("tok".to_string()),
            ..LlmSettings::default()
        };
        let headers = llm.auth_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].1, "Bearer sk-1");
    }

    #[test]
    fn test_custom_headers_win() -> anyhow::Result<()> {
        let s = settings(&[
            ("OPENAI_API_KEY", "sk-1"),
            ("LLM_CUSTOM_HEADERS", r#"{"authorization": "Basic abc", "X-Tenant": 7}"#),
        ])?;
        let headers = s.llm.auth_headers();
        assert!(headers.contains(&("authorization".to_string(), "Basic abc".to_string())));
        assert!(headers.contains(&("X-Tenant".to_string(), "7".to_string())));
        assert!(!headers.iter().any(|(_, v)| v == "Bearer sk-1"));
        Ok(())
    }

    #[test]
    fn test_malformed_custom_headers_are_ignored() -> anyhow::Result<()> {
        let s = settings(&[("LLM_CUSTOM_HEADERS", "[1, 2]")])?;
        assert!(s.llm.custom_headers.is_empty());
        let s = settings(&[("LLM_CUSTOM_HEADERS", "{oops")])?;
        assert!(s.llm.custom_headers.is_empty());
        Ok(())
    }

    #[test]
    fn test_key_format_parsing() {
        assert_eq!("Bearer".parse::<ApiKeyFormat>(), Ok(ApiKeyFormat::Bearer));
        assert_eq!("raw".parse::<ApiKeyFormat>(), Ok(ApiKeyFormat::Raw));
        assert_eq!("plain".parse::<ApiKeyFormat>(), Ok(ApiKeyFormat::Raw));
    }
}
