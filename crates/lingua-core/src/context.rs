//! ============================================================================
//! Context Assembler - Builds the ordered prompt for one turn
//! ============================================================================
//! Pure transform, no I/O. Order: persona system prompt, memory context (one
//! system message, only when memories were retrieved), chronological
//! history, then the new user text.
//! ============================================================================

use crate::agent::AgentConfig;
use crate::completion::ChatMessage;
use crate::db::{MessageRecord, MessageRole};
use crate::memory::MemoryEntry;

/// Header line for the memory context system message.
const MEMORY_HEADER: &str = "What you remember about this user from earlier conversations:";

/// Assemble the ordered message list for a model call.
pub fn assemble_context(
    agent: &AgentConfig,
    history: &[MessageRecord],
    memories: &[MemoryEntry],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);

    let persona_prompt = agent.render_system_prompt();

    // Skip the persona prompt when history already opens with it verbatim.
    let already_present = history
        .first()
        .map(|m| m.role == MessageRole::System && m.content == persona_prompt)
        .unwrap_or(false);

    if !already_present {
        messages.push(ChatMessage::system(persona_prompt));
    }

    if !memories.is_empty() {
        messages.push(ChatMessage::system(format_memory_context(memories)));
    }

    for record in history {
        messages.push(ChatMessage {
            role: record.role.as_str().to_string(),
            content: record.content.clone(),
        });
    }

    messages.push(ChatMessage::user(user_text.to_string()));
    messages
}

/// Render retrieved memories as one numbered list under an explanatory
/// header. Absence of memories produces no message at all, not an empty
/// block.
fn format_memory_context(memories: &[MemoryEntry]) -> String {
    let mut formatted = String::from(MEMORY_HEADER);
    for (i, memory) in memories.iter().enumerate() {
        formatted.push_str(&format!("\n{}. {}", i + 1, memory.key_point));
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{test_agent, AgentKind};
    use crate::memory::MemoryEntry;

    fn record(id: i64, role: MessageRole, content: &str) -> MessageRecord {
        MessageRecord {
            id,
            session_id: 1,
            role,
            content: content.to_string(),
            raw_request: None,
            raw_response: None,
            created_at: id,
        }
    }

    fn memory(key_point: &str) -> MemoryEntry {
        MemoryEntry::new(1, "user-a".to_string(), key_point.to_string(), vec![0.1; 4])
    }

    #[test]
    fn test_order_system_memory_history_user() {
        let agent = test_agent(1, AgentKind::General);
        let history = vec![
            record(1, MessageRole::User, "earlier question"),
            record(2, MessageRole::Assistant, "earlier answer"),
        ];
        let memories = vec![memory("User's name is Alice"), memory("User lives in Lyon")];

        let messages = assemble_context(&agent, &history, &memories, "new question");

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, agent.render_system_prompt());
        assert_eq!(messages[1].role, "system");
        assert!(messages[1].content.starts_with(MEMORY_HEADER));
        assert!(messages[1].content.contains("1. User's name is Alice"));
        assert!(messages[1].content.contains("2. User lives in Lyon"));
        assert_eq!(messages[2].content, "earlier question");
        assert_eq!(messages[3].content, "earlier answer");
        assert_eq!(messages[4].role, "user");
        assert_eq!(messages[4].content, "new question");
    }

    #[test]
    fn test_no_memories_means_no_memory_message() {
        let agent = test_agent(1, AgentKind::General);
        let messages = assemble_context(&agent, &[], &[], "hello");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn test_persona_prompt_not_duplicated() {
        let agent = test_agent(1, AgentKind::General);
        let history = vec![
            record(1, MessageRole::System, &agent.render_system_prompt()),
            record(2, MessageRole::User, "hi"),
        ];

        let messages = assemble_context(&agent, &history, &[], "again");
        let system_count = messages.iter().filter(|m| m.role == "system").count();
        assert_eq!(system_count, 1);
        assert_eq!(messages[0].content, agent.render_system_prompt());
    }

    #[test]
    fn test_differing_system_history_keeps_persona() {
        let agent = test_agent(1, AgentKind::General);
        let history = vec![record(1, MessageRole::System, "some other system note")];

        let messages = assemble_context(&agent, &history, &[], "hi");
        assert_eq!(messages[0].content, agent.render_system_prompt());
        assert_eq!(messages[1].content, "some other system note");
    }
}
