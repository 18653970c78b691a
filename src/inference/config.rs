//! Model, sampling, and backend configuration.
//!
//! These types are deserialized from the `model:` section of `config.yaml`
//! and validated once at startup. Bounds mirror what the hosted Claude
//! endpoints accept for extended thinking.

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Constants ───────────────────────────────────────────────────────────────

pub const MIN_THINKING_BUDGET: u32 = 1024;
pub const MAX_THINKING_BUDGET: u32 = 6524;

const DEFAULT_BEDROCK_REGION: &str = "us-west-2";
const DEFAULT_BEDROCK_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_BEDROCK_READ_TIMEOUT_SECS: u64 = 60;

// ─── Model ids ───────────────────────────────────────────────────────────────

/// Supported chat models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(
        rename = "claude-3-7-sonnet",
        alias = "anthropic.claude-3-7-sonnet-20250219-v1:0"
    )]
    AnthropicClaude37Sonnet,
}

impl ModelId {
    /// Bedrock foundation-model id, without any cross-region prefix.
    pub fn bedrock_id(&self) -> &'static str {
        match self {
            ModelId::AnthropicClaude37Sonnet => "anthropic.claude-3-7-sonnet-20250219-v1:0",
        }
    }

    /// Default Databricks serving endpoint for this model.
    pub fn databricks_endpoint(&self) -> &'static str {
        match self {
            ModelId::AnthropicClaude37Sonnet => "databricks-claude-3-7-sonnet",
        }
    }
}

// ─── Sampling ────────────────────────────────────────────────────────────────

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub temperature: f32,
    pub max_tokens: u32,
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(InferenceError::config(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(InferenceError::config("max_tokens must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingType {
    #[default]
    Enabled,
}

/// Extended-thinking request block: `{"type": "enabled", "budget_tokens": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type", default)]
    pub kind: ThinkingType,
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: u32,
}

fn default_budget_tokens() -> u32 {
    MIN_THINKING_BUDGET
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            kind: ThinkingType::Enabled,
            budget_tokens: MIN_THINKING_BUDGET,
        }
    }
}

impl ThinkingConfig {
    pub fn validate(&self, max_tokens: u32) -> Result<(), InferenceError> {
        if !(MIN_THINKING_BUDGET..=MAX_THINKING_BUDGET).contains(&self.budget_tokens) {
            return Err(InferenceError::config(format!(
                "thinking budget_tokens must be within [{MIN_THINKING_BUDGET}, {MAX_THINKING_BUDGET}], got {}",
                self.budget_tokens
            )));
        }
        if self.budget_tokens >= max_tokens {
            return Err(InferenceError::config(format!(
                "thinking budget_tokens ({}) must be less than max_tokens ({max_tokens})",
                self.budget_tokens
            )));
        }
        Ok(())
    }

    /// The JSON block both providers accept under the `thinking` key.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "enabled",
            "budget_tokens": self.budget_tokens,
        })
    }
}

// ─── Backends ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Bedrock,
    #[default]
    Databricks,
}

/// AWS Bedrock runtime client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BedrockSettings {
    pub region: String,
    /// Prefix the model id with `us.` for cross-region inference profiles.
    pub cross_region: bool,
    pub max_attempts: u32,
    pub read_timeout_secs: u64,
}

impl Default for BedrockSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_BEDROCK_REGION.into(),
            cross_region: true,
            max_attempts: DEFAULT_BEDROCK_MAX_ATTEMPTS,
            read_timeout_secs: DEFAULT_BEDROCK_READ_TIMEOUT_SECS,
        }
    }
}

impl BedrockSettings {
    pub fn model_id(&self, model: ModelId) -> String {
        if self.cross_region {
            format!("us.{}", model.bedrock_id())
        } else {
            model.bedrock_id().to_string()
        }
    }
}

/// Databricks model-serving settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabricksSettings {
    /// Workspace URL, e.g. `https://dbc-123a-xyz.cloud.databricks.com`.
    pub host: String,
    #[serde(skip_serializing)]
    pub token: String,
    /// Overrides the model's default serving endpoint.
    pub endpoint: Option<String>,
}

impl DatabricksSettings {
    pub fn endpoint_name(&self, model: ModelId) -> String {
        self.endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| model.databricks_endpoint().to_string())
    }

    pub fn invocations_url(&self, model: ModelId) -> String {
        format!(
            "{}/serving-endpoints/{}/invocations",
            self.host.trim_end_matches('/'),
            self.endpoint_name(model)
        )
    }
}

// ─── Combined ────────────────────────────────────────────────────────────────

/// Everything needed to build a chat model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub backend: Backend,
    pub model: ModelId,
    pub inference: InferenceConfig,
    /// `None` disables extended thinking.
    pub thinking: Option<ThinkingConfig>,
    pub bedrock: BedrockSettings,
    pub databricks: DatabricksSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Databricks,
            model: ModelId::AnthropicClaude37Sonnet,
            inference: InferenceConfig {
                temperature: 1.0,
                max_tokens: 32768,
            },
            thinking: Some(ThinkingConfig::default()),
            bedrock: BedrockSettings::default(),
            databricks: DatabricksSettings::default(),
        }
    }
}

impl ModelSettings {
    /// Sampling and thinking bounds only.
    pub fn validate_sampling(&self) -> Result<(), InferenceError> {
        self.inference.validate()?;
        if let Some(thinking) = &self.thinking {
            thinking.validate(self.inference.max_tokens)?;
        }
        Ok(())
    }

    /// Full validation, including the selected backend's settings.
    pub fn validate(&self) -> Result<(), InferenceError> {
        self.validate_sampling()?;
        match self.backend {
            Backend::Bedrock => {
                if self.bedrock.region.is_empty() {
                    return Err(InferenceError::config("bedrock region must not be empty"));
                }
                if self.bedrock.max_attempts == 0 {
                    return Err(InferenceError::config("bedrock max_attempts must be at least 1"));
                }
            }
            Backend::Databricks => {
                if self.databricks.host.is_empty() {
                    return Err(InferenceError::config(
                        "databricks host is not set (DATABRICKS_HOST)",
                    ));
                }
                if self.databricks.token.is_empty() {
                    return Err(InferenceError::config(
                        "databricks token is not set (DATABRICKS_TOKEN)",
                    ));
                }
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
