use std::env;
use std::path::PathBuf;
use std::time::Duration;

use medassist_rag::{DEFAULT_TOGETHER_BASE_URL, DEFAULT_TOGETHER_MODEL};
use medassist_retrieval::{
    DEFAULT_CONTROL_PLANE_URL, DEFAULT_EMBEDDING_MODEL, DEFAULT_HF_BASE_URL, DEFAULT_INDEX_NAME,
    DEFAULT_TOP_K,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set. Please create a .env file with your API keys.")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Where the Pinecone data plane lives: a known host, or an index name that
/// is resolved through the control plane at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    Host(String),
    Named {
        control_plane: String,
        index_name: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub pinecone_api_key: String,
    pub pinecone_index: IndexLocation,
    pub pinecone_namespace: Option<String>,
    pub together_api_key: String,
    pub together_model: String,
    pub together_base_url: String,
    pub hf_api_token: Option<String>,
    pub hf_embedding_model: String,
    pub hf_base_url: String,
    pub top_k: usize,
    pub rag_timeout: Option<Duration>,
    pub intent_rules_path: Option<PathBuf>,
    pub bind: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    /// Key rate limiting on `x-forwarded-for` / `x-real-ip` instead of the
    /// socket peer. Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded_for: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("pinecone_index", &self.pinecone_index)
            .field("pinecone_namespace", &self.pinecone_namespace)
            .field("together_model", &self.together_model)
            .field("hf_embedding_model", &self.hf_embedding_model)
            .field("top_k", &self.top_k)
            .field("rag_timeout", &self.rag_timeout)
            .field("intent_rules_path", &self.intent_rules_path)
            .field("bind", &self.bind)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let pinecone_api_key = required("PINECONE_API_KEY")?;
        let together_api_key = required("TOGETHER_API_KEY")?;

        let pinecone_index = match get("PINECONE_INDEX_HOST") {
            Some(host) => IndexLocation::Host(host),
            None => IndexLocation::Named {
                control_plane: get("PINECONE_CONTROL_PLANE_URL")
                    .unwrap_or_else(|| DEFAULT_CONTROL_PLANE_URL.to_string()),
                index_name: get("PINECONE_INDEX_NAME")
                    .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            },
        };

        let bind = match (get("MEDASSIST_BIND"), get("PORT")) {
            (Some(bind), _) => bind,
            (None, Some(port)) => format!("0.0.0.0:{}", parse::<u16>("PORT", &port)?),
            (None, None) => "0.0.0.0:8080".to_string(),
        };

        let rag_timeout = match get("MEDASSIST_RAG_TIMEOUT_SECS") {
            Some(raw) => match parse::<u64>("MEDASSIST_RAG_TIMEOUT_SECS", &raw)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => Some(Duration::from_secs(30)),
        };

        Ok(Self {
            pinecone_api_key,
            pinecone_index,
            pinecone_namespace: get("PINECONE_NAMESPACE"),
            together_api_key,
            together_model: get("TOGETHER_MODEL")
                .unwrap_or_else(|| DEFAULT_TOGETHER_MODEL.to_string()),
            together_base_url: get("TOGETHER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TOGETHER_BASE_URL.to_string()),
            hf_api_token: get("HF_API_TOKEN"),
            hf_embedding_model: get("HF_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            hf_base_url: get("HF_INFERENCE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_HF_BASE_URL.to_string()),
            top_k: get("MEDASSIST_TOP_K")
                .map(|raw| parse::<usize>("MEDASSIST_TOP_K", &raw))
                .transpose()?
                .unwrap_or(DEFAULT_TOP_K),
            rag_timeout,
            intent_rules_path: get("MEDASSIST_INTENT_RULES").map(PathBuf::from),
            bind,
            rate_limit_window: Duration::from_secs(
                get("MEDASSIST_RATE_LIMIT_WINDOW_SECONDS")
                    .map(|raw| parse::<u64>("MEDASSIST_RATE_LIMIT_WINDOW_SECONDS", &raw))
                    .transpose()?
                    .unwrap_or(60),
            ),
            rate_limit_max: get("MEDASSIST_RATE_LIMIT_MAX")
                .map(|raw| parse::<usize>("MEDASSIST_RATE_LIMIT_MAX", &raw))
                .transpose()?
                .unwrap_or(30),
            trust_forwarded_for: get("MEDASSIST_TRUST_FORWARDED_FOR")
                .map(|raw| parse_flag("MEDASSIST_TRUST_FORWARDED_FOR", &raw))
                .transpose()?
                .unwrap_or(false),
        })
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}
