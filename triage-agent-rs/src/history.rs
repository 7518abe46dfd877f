//! Append-only conversation history for one run

use triage_sdk::gemini::{Content, Part};

/// Ordered conversation entries. Entries are never removed or rewritten.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    entries: Vec<Content>,
}

impl ConversationHistory {
    /// History starting with a single user turn
    pub fn with_user_parts(parts: Vec<Part>) -> Self {
        Self {
            entries: vec![Content::user(parts)],
        }
    }

    pub fn push(&mut self, entry: Content) {
        self.entries.push(entry);
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.entries.push(Content::user_text(text));
    }

    pub fn entries(&self) -> &[Content] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Content> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot for a model request
    pub fn to_vec(&self) -> Vec<Content> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_sdk::gemini::Role;

    #[test]
    fn test_append_only_order() {
        let mut history = ConversationHistory::with_user_parts(vec![Part::text("Patient Notes: fever")]);
        history.push(Content::model(vec![Part::text("thinking")]));
        history.push_user_text("report please");

        assert_eq!(history.len(), 3);
        assert_eq!(history.entries()[0].role, Some(Role::User));
        assert_eq!(history.entries()[1].role, Some(Role::Model));
        assert_eq!(history.last().and_then(|c| c.parts[0].as_text()), Some("report please"));
        assert_eq!(history.to_vec().len(), 3);
    }
}
