//! Conversation history for one run

use crate::model::ChatMessage;

/// Append a `<filter>` block to the user query. No filters, no block.
pub fn with_filters(query: &str, filters: &[String]) -> String {
    if filters.is_empty() {
        return query.to_string();
    }
    format!("{}\n\n<filter>{}</filter>", query, filters.join("\n"))
}

/// Ordered messages, system prompt first. Owned by exactly one run.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_appended() {
        let filters = vec!["no ages".to_string(), "no addresses".to_string()];
        assert_eq!(
            with_filters("Where does Bob live?", &filters),
            "Where does Bob live?\n\n<filter>no ages\nno addresses</filter>"
        );
    }

    #[test]
    fn test_no_filters_no_block() {
        assert_eq!(with_filters("hi", &[]), "hi");
    }

    #[test]
    fn test_system_prompt_first() {
        let mut conversation = Conversation::new("sys");
        conversation.push_user("q");
        conversation.push_assistant("a");
        assert_eq!(conversation.messages()[0], ChatMessage::system("sys"));
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.messages()[1], ChatMessage::user("q"));
    }
}
