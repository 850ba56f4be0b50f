//! `cx.toml` configuration.
//!
//! Every key is optional; a missing file means all defaults. Unknown keys are
//! rejected so typos surface at startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cx_core::session::DEFAULT_SYSTEM_PROMPT;
use cx_core::{BufferConfig, BuilderConfig, CollapseOptions, PatternConfig, SessionConfig};

pub const CONFIG_FILE: &str = "cx.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CxConfig {
    #[serde(default = "default_primary_speaker")]
    pub primary_speaker: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Send only the latest utterance per speaker once memory was retrieved.
    #[serde(default)]
    pub simplified_mode: bool,

    #[serde(default = "default_history_max_pairs")]
    pub history_max_pairs: usize,

    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    /// Dimension of the local hashing embedder.
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,

    /// Append telemetry events as JSON lines here; otherwise they go to the log.
    #[serde(default)]
    pub telemetry_path: Option<PathBuf>,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub collapse: CollapseOptions,

    #[serde(default)]
    pub patterns: PatternConfig,
}

impl Default for CxConfig {
    fn default() -> Self {
        Self {
            primary_speaker: default_primary_speaker(),
            system_prompt: default_system_prompt(),
            simplified_mode: false,
            history_max_pairs: default_history_max_pairs(),
            retrieval_top_k: default_retrieval_top_k(),
            embedding_dims: default_embedding_dims(),
            telemetry_path: None,
            buffer: BufferConfig::default(),
            collapse: CollapseOptions::default(),
            patterns: PatternConfig::default(),
        }
    }
}

fn default_primary_speaker() -> String {
    "me".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_history_max_pairs() -> usize {
    6
}

fn default_retrieval_top_k() -> usize {
    5
}

fn default_embedding_dims() -> usize {
    256
}

impl CxConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CxConfig = toml::from_str(content).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), else `<data_dir>/cx.toml` if present.
    pub fn load(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = data_dir.join(CONFIG_FILE);
                if !path.exists() {
                    tracing::debug!("no config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if self.buffer.min_flush_tokens > self.buffer.max_flush_tokens {
            anyhow::bail!(
                "buffer.min_flush_tokens ({}) exceeds buffer.max_flush_tokens ({})",
                self.buffer.min_flush_tokens,
                self.buffer.max_flush_tokens
            );
        }
        if self.embedding_dims == 0 {
            anyhow::bail!("embedding_dims must be positive");
        }
        if self.patterns.window < 3 {
            anyhow::bail!("patterns.window must be at least 3");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            system_prompt: self.system_prompt.clone(),
            history_max_pairs: self.history_max_pairs,
            builder: BuilderConfig {
                primary_speaker: self.primary_speaker.clone(),
                simplified_mode: self.simplified_mode,
                top_k: self.retrieval_top_k,
            },
            buffer: self.buffer.clone(),
            collapse: self.collapse.clone(),
            patterns: self.patterns.clone(),
        }
    }
}
