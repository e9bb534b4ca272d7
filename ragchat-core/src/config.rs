//! Configuration types for ragchat
//!
//! Configuration is built once at process start and handed to component
//! constructors; nothing reads the environment after that.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::llm::{GenerationSettings, RetryPolicy, model_token_limit};

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE_NAME: &str = "ragchat.toml";

/// Environment variable naming an extra configuration file
pub const CONFIG_PATH_ENV: &str = "RAGCHAT_CONFIG_PATH";

/// Unprefixed variable names accepted from existing `.env` files
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("OAI_ENDPOINT", "openai.endpoint"),
    ("OAI_KEY", "openai.api_key"),
    ("OAI_DEPLOYMENT", "openai.deployment"),
    ("API_VERSION", "openai.api_version"),
    ("MODEL_NAME", "openai.model_name"),
    ("SEARCH_ENDPOINT", "search.endpoint"),
    ("SEARCH_KEY", "search.api_key"),
    ("SEARCH_INDEX", "search.index"),
];

const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant that summarizes document highlights retrieved from documents using Azure AI Search. You will receive the search query in double asterisks, for example, **eye exams**.
You should start all responses with \"This is what I know about **search query**\". For example, for search query **eye exams**, your response will start as \"This is what I know about eye exams\".
Your responses should be 2-3 sentences and should include all key details without adding external information or assumptions.";

const DEFAULT_QUERY_PROMPT: &str = "Below is a history of the conversation so far, and a new question asked by the user that needs to be answered by searching in a knowledge base.
You have access to Azure AI Search index with some documents.
Generate a search query based on the conversation and the new question.
Do not include cited source filenames and document names e.g info.txt or doc.pdf in the search query terms.
Do not include any text inside [] or <<>> in the search query terms.
Do not include any special characters like '+'.
If you cannot generate a search query, return just the number 0.";

const DEFAULT_DIRECT_SYSTEM_PROMPT: &str = "Assistant helps the company employees with their healthcare plan questions, and questions about the employee handbook. Be brief in your answers.
Answer ONLY with the facts listed in the list of sources below. If there isn't enough information below, say you don't know.
Do not generate answers that don't use the sources below. If asking a clarifying question to the user would help, ask the question.
Each source has a name followed by colon and the actual information, always include the source name for each fact you use in the response. Use square brackets to reference the source, for example [info1.txt].
Don't combine sources, list each source separately, for example [info1.txt][info2.pdf].";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RagConfig {
    /// Completion service
    pub openai: OpenAIConfig,

    /// Search index service
    pub search: SearchConfig,

    /// Conversation and prompt settings
    pub chat: ChatConfig,

    /// HTTP client behavior shared by both services
    pub http: HttpConfig,
}

/// Azure OpenAI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// Resource endpoint URL
    pub endpoint: String,

    /// Resource key
    pub api_key: String,

    /// Deployment that serves the requests
    pub deployment: String,

    /// REST API version
    pub api_version: String,

    /// OpenAI model name behind the deployment, used for token limits
    pub model_name: String,

    /// Context window override for models missing from the built-in table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_token_limit: Option<usize>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: String::new(),
            api_version: "2024-02-01".to_string(),
            model_name: "gpt-35-turbo".to_string(),
            model_token_limit: None,
        }
    }
}

impl OpenAIConfig {
    /// Context window for the configured model.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the model is unknown and no override is set.
    pub fn token_limit(&self) -> Result<usize> {
        self.model_token_limit
            .or_else(|| model_token_limit(&self.model_name))
            .ok_or_else(|| {
                RagError::Configuration(format!(
                    "Unknown model '{}'; set openai.model_token_limit",
                    self.model_name
                ))
            })
    }
}

/// Azure AI Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search service endpoint URL
    pub endpoint: String,

    /// Query or admin key
    pub api_key: String,

    /// Index to query
    pub index: String,

    /// REST API version
    pub api_version: String,

    /// Number of documents retrieved per turn
    pub top: usize,

    /// `simple` or `full` Lucene syntax
    pub query_type: String,

    /// Field whose highlights ground the answer
    pub highlight_field: String,

    /// Field holding the document's source name, if the index exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_field: Option<String>,

    /// Tag placed before each highlighted term; set together with the post tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_pre_tag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_post_tag: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            index: String::new(),
            api_version: "2023-11-01".to_string(),
            top: 2,
            query_type: "simple".to_string(),
            highlight_field: "content".to_string(),
            citation_field: None,
            highlight_pre_tag: None,
            highlight_post_tag: None,
        }
    }
}

/// What to do when the search service fails during a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// End the conversation with the error
    #[default]
    Abort,

    /// Log the failure and ground the answer on no documents
    AnswerWithoutSources,
}

/// Conversation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Turns before the conversation ends
    pub max_turns: usize,

    /// Temperature for grounded answers
    pub temperature: f32,

    /// Output token limit for grounded answers
    pub max_tokens: usize,

    /// Temperature for search-query generation
    pub query_temperature: f32,

    /// Output token limit for search-query generation
    pub query_max_tokens: usize,

    /// Tokens held back from the context window for the grounded answer
    pub answer_reserve: usize,

    /// System prompt for grounded answers
    pub system_prompt: String,

    /// System prompt for search-query generation
    pub query_prompt: String,

    /// System prompt for direct chat
    pub direct_system_prompt: String,

    pub retrieval_failure: RetrievalFailurePolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_turns: 3,
            temperature: 0.3,
            max_tokens: 1000,
            query_temperature: 0.0,
            query_max_tokens: 100,
            answer_reserve: 1024,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            query_prompt: DEFAULT_QUERY_PROMPT.to_string(),
            direct_system_prompt: DEFAULT_DIRECT_SYSTEM_PROMPT.to_string(),
            retrieval_failure: RetrievalFailurePolicy::Abort,
        }
    }
}

impl ChatConfig {
    pub fn answer_settings(&self) -> GenerationSettings {
        GenerationSettings::new(self.temperature, self.max_tokens)
    }

    pub fn query_settings(&self) -> GenerationSettings {
        GenerationSettings::new(self.query_temperature, self.query_max_tokens)
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Token ceilings derived from the model's context window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCeilings {
    /// Ceiling for the query-generation request
    pub query: usize,

    /// Ceiling for the grounded-answer request
    pub answer: usize,
}

impl RagConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Loads in this order, later sources overriding earlier ones:
    /// 1. Default configuration
    /// 2. `ragchat.toml` in the working directory
    /// 3. `ragchat.toml` in the user config directory
    /// 4. The file named by `RAGCHAT_CONFIG_PATH`, or `explicit_path` when given
    /// 5. Legacy variables (`OAI_ENDPOINT`, `SEARCH_KEY`, ...)
    /// 6. `RAGCHAT_`-prefixed variables, `__` separating sections
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or validation fails.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let config: RagConfig = Self::figment(explicit_path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or validation fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RagError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: RagConfig = Figment::from(Serialized::defaults(RagConfig::default()))
            .merge(Toml::file(path))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    fn figment(explicit_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RagConfig::default()))
            .merge(Toml::file(CONFIG_FILE_NAME));

        if let Some(dir) = user_config_dir() {
            figment = figment.merge(Toml::file(dir.join(CONFIG_FILE_NAME)));
        }

        let extra = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::raw().filter_map(|key| {
                LEGACY_ENV_KEYS
                    .iter()
                    .find(|(legacy, _)| key.as_str().eq_ignore_ascii_case(legacy))
                    .map(|(_, mapped)| (*mapped).into())
            }))
            .merge(
                Env::prefixed("RAGCHAT_")
                    .ignore(&["CONFIG_PATH"])
                    .split("__"),
            )
    }

    /// Context-window ceilings for the two requests of a turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the model limit is unknown or too small for the reserves.
    pub fn token_ceilings(&self) -> Result<TokenCeilings> {
        let limit = self.openai.token_limit()?;

        let query = limit.checked_sub(self.chat.query_max_tokens).filter(|n| *n > 0);
        let answer = limit.checked_sub(self.chat.answer_reserve).filter(|n| *n > 0);

        match (query, answer) {
            (Some(query), Some(answer)) => Ok(TokenCeilings { query, answer }),
            _ => Err(RagError::Configuration(format!(
                "Model limit of {} tokens leaves no room for prompts (query_max_tokens={}, answer_reserve={})",
                limit, self.chat.query_max_tokens, self.chat.answer_reserve
            ))),
        }
    }

    /// Copy of this configuration with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.openai.api_key = mask(&copy.openai.api_key);
        copy.search.api_key = mask(&copy.search.api_key);
        copy
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("openai.endpoint", &self.openai.endpoint),
            ("openai.api_key", &self.openai.api_key),
            ("openai.deployment", &self.openai.deployment),
            ("openai.api_version", &self.openai.api_version),
            ("search.endpoint", &self.search.endpoint),
            ("search.api_key", &self.search.api_key),
            ("search.index", &self.search.index),
            ("search.highlight_field", &self.search.highlight_field),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(RagError::Configuration(format!("Missing required setting {}", name)));
        }

        if self.chat.max_turns == 0 {
            return Err(RagError::Configuration(
                "chat.max_turns must be at least 1".to_string(),
            ));
        }
        if self.search.highlight_pre_tag.is_some() != self.search.highlight_post_tag.is_some() {
            return Err(RagError::Configuration(
                "search.highlight_pre_tag and search.highlight_post_tag must be set together"
                    .to_string(),
            ));
        }
        if self.search.top == 0 {
            return Err(RagError::Configuration(
                "search.top must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("chat.temperature", self.chat.temperature),
            ("chat.query_temperature", self.chat.query_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(RagError::Configuration(format!(
                    "{} must be between 0 and 2, got {}",
                    name, value
                )));
            }
        }

        self.token_ceilings()?;
        Ok(())
    }
}

fn user_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ragchat"))
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    const VALID_TOML: &str = r#"
        [openai]
        endpoint = "https://contoso.openai.azure.com"
        api_key = "oai-key"
        deployment = "chat"
        model_name = "gpt-4o"

        [search]
        endpoint = "https://contoso.search.windows.net"
        api_key = "search-key"
        index = "handbook"
    "#;

    fn valid_config() -> RagConfig {
        let mut config = RagConfig::default();
        config.openai.endpoint = "https://contoso.openai.azure.com".into();
        config.openai.api_key = "k".into();
        config.openai.deployment = "chat".into();
        config.search.endpoint = "https://contoso.search.windows.net".into();
        config.search.api_key = "k".into();
        config.search.index = "handbook".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.chat.max_turns, 3);
        assert_eq!(config.chat.query_max_tokens, 100);
        assert_eq!(config.chat.answer_reserve, 1024);
        assert_eq!(config.search.top, 2);
        assert_eq!(config.search.query_type, "simple");
        assert_eq!(config.search.highlight_field, "content");
        assert_eq!(config.chat.retrieval_failure, RetrievalFailurePolicy::Abort);
        assert_eq!(config.http.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_secrets_fail_validation() {
        let err = RagConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("openai.endpoint"));

        let mut config = valid_config();
        config.search.api_key = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search.api_key"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = valid_config();
        config.chat.max_turns = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.chat.temperature = 2.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.openai.model_name = "mystery-model".into();
        assert!(config.validate().is_err());
        config.openai.model_token_limit = Some(8_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_highlight_tags_set_together() {
        let mut config = valid_config();
        config.search.highlight_pre_tag = Some("<b>".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("highlight_post_tag"));

        config.search.highlight_post_tag = Some("</b>".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_ceilings() {
        let ceilings = valid_config().token_ceilings().unwrap();
        assert_eq!(ceilings.query, 4_000 - 100);
        assert_eq!(ceilings.answer, 4_000 - 1024);

        let mut config = valid_config();
        config.openai.model_token_limit = Some(1_000);
        assert!(config.token_ceilings().is_err());
    }

    #[test]
    fn test_redacted_masks_keys() {
        let redacted = valid_config().redacted();
        assert_eq!(redacted.openai.api_key, "********");
        assert_eq!(redacted.search.api_key, "********");
        assert_eq!(redacted.search.index, "handbook");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID_TOML.as_bytes()).unwrap();

        let config = RagConfig::from_file(file.path()).unwrap();
        assert_eq!(config.openai.model_name, "gpt-4o");
        assert_eq!(config.search.index, "handbook");
        assert_eq!(config.chat.max_turns, 3);
    }

    #[test]
    fn test_from_missing_file() {
        let err = RagConfig::from_file("/definitely/not/here/ragchat.toml").unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_load_from_working_directory_file() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, VALID_TOML)?;

            let config = RagConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.openai.deployment, "chat");
            assert_eq!(config.search.endpoint, "https://contoso.search.windows.net");
            Ok(())
        });
    }

    #[test]
    fn test_legacy_env_names() {
        Jail::expect_with(|jail| {
            jail.set_env("OAI_ENDPOINT", "https://legacy.openai.azure.com");
            jail.set_env("OAI_KEY", "legacy-key");
            jail.set_env("OAI_DEPLOYMENT", "legacy-deploy");
            jail.set_env("API_VERSION", "2023-05-15");
            jail.set_env("MODEL_NAME", "gpt-4");
            jail.set_env("SEARCH_ENDPOINT", "https://legacy.search.windows.net");
            jail.set_env("SEARCH_KEY", "legacy-search-key");
            jail.set_env("SEARCH_INDEX", "legacy-index");

            let config = RagConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.openai.endpoint, "https://legacy.openai.azure.com");
            assert_eq!(config.openai.api_key, "legacy-key");
            assert_eq!(config.openai.api_version, "2023-05-15");
            assert_eq!(config.openai.model_name, "gpt-4");
            assert_eq!(config.search.index, "legacy-index");
            Ok(())
        });
    }

    #[test]
    fn test_precedence_file_then_legacy_then_prefixed() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, VALID_TOML)?;
            jail.set_env("SEARCH_INDEX", "from-legacy");
            jail.set_env("OAI_DEPLOYMENT", "legacy-deploy");
            jail.set_env("RAGCHAT_OPENAI__DEPLOYMENT", "prefixed-deploy");
            jail.set_env("RAGCHAT_CHAT__MAX_TURNS", "5");

            let config = RagConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.search.index, "from-legacy");
            assert_eq!(config.openai.deployment, "prefixed-deploy");
            assert_eq!(config.chat.max_turns, 5);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_path_overrides_working_directory() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, VALID_TOML)?;
            jail.create_file(
                "override.toml",
                r#"
                [chat]
                max_turns = 7
                retrieval_failure = "answer_without_sources"

                [http]
                timeout = "5s"
                "#,
            )?;

            let config =
                RagConfig::load(Some(Path::new("override.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.chat.max_turns, 7);
            assert_eq!(
                config.chat.retrieval_failure,
                RetrievalFailurePolicy::AnswerWithoutSources
            );
            assert_eq!(config.http.timeout, Duration::from_secs(5));
            assert_eq!(config.openai.deployment, "chat");
            Ok(())
        });
    }
}
