use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::llm::LlmConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    /// Path to the SQLite store.
    pub store_path: PathBuf,
    pub agent: LoopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard cap on model round-trips before a text-only answer is forced.
    pub max_iterations: usize,
    /// Overrides the built-in system prompt when set.
    pub system_prompt: Option<String>,
}

impl AgentConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.agent.max_iterations == 0 {
            return Err("agent.max_iterations must be > 0".into());
        }
        if self.agent.max_iterations > 50 {
            return Err("agent.max_iterations must be <= 50".into());
        }
        if self.llm.model.is_empty() {
            return Err("llm.model must not be empty".into());
        }
        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens must be > 0".into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err("llm.temperature must be in [0.0, 2.0]".into());
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clinic-agent");

        Self {
            llm: LlmConfig::default(),
            store_path: data_dir.join("clinic.db"),
            agent: LoopConfig {
                max_iterations: 10,
                system_prompt: None,
            },
        }
    }
}
