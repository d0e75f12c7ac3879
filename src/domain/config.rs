use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Remote endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEndpoint {
    pub name: String,
    pub url: String,
}

/// Either a bare URL or a list of named endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteEndpoints {
    Single(String),
    Named(Vec<NamedEndpoint>),
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        RemoteEndpoints::Named(Vec::new())
    }
}

impl RemoteEndpoints {
    /// `None` picks the single URL, or the first named endpoint.
    pub fn resolve(&self, name: Option<&str>) -> Option<&str> {
        match (self, name) {
            (RemoteEndpoints::Single(url), None) => Some(url),
            (RemoteEndpoints::Single(_), Some(_)) => None,
            (RemoteEndpoints::Named(list), None) => list.first().map(|e| e.url.as_str()),
            (RemoteEndpoints::Named(list), Some(name)) => list
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.url.as_str()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let check_url = |url: &str| {
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "endpoint url must be http(s): {url}"
                )))
            }
        };
        match self {
            RemoteEndpoints::Single(url) => check_url(url),
            RemoteEndpoints::Named(list) => {
                let mut seen = HashSet::new();
                for endpoint in list {
                    if endpoint.name.trim().is_empty() {
                        return Err(ConfigError::Invalid("endpoint name is empty".into()));
                    }
                    if !seen.insert(endpoint.name.as_str()) {
                        return Err(ConfigError::Invalid(format!(
                            "duplicate endpoint name: {}",
                            endpoint.name
                        )));
                    }
                    check_url(&endpoint.url)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "SuggestionConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "SuggestionConfig::default_max_suggestions")]
    pub max_suggestions: usize,
}

impl SuggestionConfig {
    fn default_debounce_ms() -> u64 {
        500
    }

    fn default_max_suggestions() -> usize {
        3
    }
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        SuggestionConfig {
            enabled: false,
            instructions: String::new(),
            debounce_ms: Self::default_debounce_ms(),
            max_suggestions: Self::default_max_suggestions(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_agent")]
    pub default_agent: String,
    #[serde(default)]
    pub remote: RemoteEndpoints,
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    #[serde(default = "EngineConfig::default_tool_log_key")]
    pub tool_log_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_agent: Self::default_agent(),
            remote: RemoteEndpoints::default(),
            suggestions: SuggestionConfig::default(),
            tool_log_key: Self::default_tool_log_key(),
        }
    }
}

impl EngineConfig {
    fn default_agent() -> String {
        "post_generation_agent".into()
    }

    fn default_tool_log_key() -> String {
        "tool_logs".into()
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("default_agent is empty".into()));
        }
        if self.tool_log_key.trim().is_empty() {
            return Err(ConfigError::Invalid("tool_log_key is empty".into()));
        }
        self.remote.validate()
    }

    /// Session configuration for the default agent. A named endpoint list
    /// is matched against the agent name, falling back to its first entry.
    pub fn session(&self, session_id: impl Into<String>) -> SessionConfig {
        let endpoint = self
            .remote
            .resolve(Some(&self.default_agent))
            .or_else(|| self.remote.resolve(None));
        SessionConfig {
            session_id: session_id.into(),
            agent: self.default_agent.clone(),
            endpoint: endpoint.map(str::to_string),
        }
    }
}

/// Identity of one session, passed explicitly to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: String,
    pub agent: String,
    pub endpoint: Option<String>,
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>, agent: impl Into<String>) -> Self {
        SessionConfig {
            session_id: session_id.into(),
            agent: agent.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_object() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.default_agent, "post_generation_agent");
        assert_eq!(config.tool_log_key, "tool_logs");
        assert_eq!(config.suggestions.debounce_ms, 500);
        assert_eq!(config.suggestions.max_suggestions, 3);
        assert!(!config.suggestions.enabled);
        assert_eq!(config.session("s1").endpoint, None);
    }

    #[test]
    fn remote_accepts_single_url() {
        let config =
            EngineConfig::from_json(r#"{"remote": "http://localhost:8000/copilotkit"}"#).unwrap();
        assert_eq!(
            config.session("s1").endpoint.as_deref(),
            Some("http://localhost:8000/copilotkit")
        );
    }

    #[test]
    fn remote_accepts_named_list() {
        let config = EngineConfig::from_json(
            r#"{"remote": [
                {"name": "posts", "url": "https://a.example/agent"},
                {"name": "stack", "url": "https://b.example/agent"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.remote.resolve(Some("stack")), Some("https://b.example/agent"));
        assert_eq!(config.remote.resolve(None), Some("https://a.example/agent"));
        assert_eq!(config.remote.resolve(Some("missing")), None);
    }

    #[test]
    fn session_endpoint_follows_default_agent() {
        let remote = r#"[
            {"name": "post_generation_agent", "url": "http://a"},
            {"name": "stack_analysis_agent", "url": "http://b"}
        ]"#;
        let config = EngineConfig::from_json(&format!(
            r#"{{"default_agent": "stack_analysis_agent", "remote": {remote}}}"#
        ))
        .unwrap();
        assert_eq!(config.session("s1").endpoint.as_deref(), Some("http://b"));

        let config = EngineConfig::from_json(&format!(
            r#"{{"default_agent": "other_agent", "remote": {remote}}}"#
        ))
        .unwrap();
        assert_eq!(config.session("s1").endpoint.as_deref(), Some("http://a"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cases = [
            r#"{"default_agent": " "}"#,
            r#"{"remote": "ftp://x"}"#,
            r#"{"remote": [{"name": "a", "url": "http://x"}, {"name": "a", "url": "http://y"}]}"#,
            r#"{"remote": [{"name": "", "url": "http://x"}]}"#,
        ];
        for case in cases {
            assert!(
                matches!(EngineConfig::from_json(case), Err(ConfigError::Invalid(_))),
                "accepted {case}"
            );
        }
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
