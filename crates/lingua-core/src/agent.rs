//! ============================================================================
//! Agent Personas - Merged configuration consumed by the pipeline
//! ============================================================================
//! Persona CRUD lives in an outer admin layer; this crate only reads the
//! merged defaults+overrides result through AgentRegistry.
//! ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::ChatError;

/// Persona classification. Language assistants get word-level translation
/// extraction on every reply; general personas never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    General,
    LanguageAssistant,
}

/// Merged persona configuration, read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: i64,
    pub name: String,
    pub kind: AgentKind,
    /// Base system prompt describing the persona.
    pub system_prompt: String,
    /// Additional behavior rules appended below the system prompt.
    #[serde(default)]
    pub behavior_rules: Vec<String>,
    /// Target language for language-assistant personas.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
    /// Preferred response length hint ("short", "detailed", ...).
    #[serde(default)]
    pub response_length: Option<String>,
    pub model: String,
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl AgentConfig {
    /// Render the full persona system prompt: base prompt, then persona
    /// attributes, then numbered behavior rules.
    pub fn render_system_prompt(&self) -> String {
        let mut prompt = self.system_prompt.clone();

        if let Some(personality) = &self.personality {
            prompt.push_str(&format!("\nPersonality: {}", personality));
        }
        if let Some(length) = &self.response_length {
            prompt.push_str(&format!("\nResponse length: {}", length));
        }
        if let Some(language) = &self.language {
            prompt.push_str(&format!("\nTarget language: {}", language));
        }

        if !self.behavior_rules.is_empty() {
            prompt.push_str("\n\nBehavior rules:");
            for (i, rule) in self.behavior_rules.iter().enumerate() {
                prompt.push_str(&format!("\n{}. {}", i + 1, rule));
            }
        }

        prompt
    }
}

/// Read-only lookup of configured personas.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<HashMap<i64, AgentConfig>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self {
            agents: Arc::new(agents.into_iter().map(|a| (a.id, a)).collect()),
        }
    }

    pub fn get(&self, agent_id: i64) -> Result<&AgentConfig, ChatError> {
        self.agents
            .get(&agent_id)
            .ok_or(ChatError::AgentNotFound(agent_id))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_agent(id: i64, kind: AgentKind) -> AgentConfig {
    AgentConfig {
        id,
        name: "Test Agent".to_string(),
        kind,
        system_prompt: "You are a helpful assistant.".to_string(),
        behavior_rules: vec![],
        language: None,
        personality: None,
        response_length: None,
        model: "grok-3-mini".to_string(),
        temperature: 0.7,
        max_tokens: Some(1024),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = AgentRegistry::new(vec![test_agent(1, AgentKind::General)]);
        assert!(registry.get(1).is_ok());
        assert!(matches!(
            registry.get(99),
            Err(ChatError::AgentNotFound(99))
        ));
    }

    #[test]
    fn test_render_system_prompt_with_rules() {
        let mut agent = test_agent(1, AgentKind::LanguageAssistant);
        agent.language = Some("Mandarin".to_string());
        agent.behavior_rules = vec![
            "Correct grammar mistakes gently".to_string(),
            "Use simple vocabulary".to_string(),
        ];

        let prompt = agent.render_system_prompt();
        assert!(prompt.starts_with("You are a helpful assistant."));
        assert!(prompt.contains("Target language: Mandarin"));
        assert!(prompt.contains("1. Correct grammar mistakes gently"));
        assert!(prompt.contains("2. Use simple vocabulary"));
    }
}
