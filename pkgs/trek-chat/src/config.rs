//! Chat session settings

use serde::{Deserialize, Serialize};

/// Configuration for a chat session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Number of messages requested per history page (default: 30)
    pub page_size: usize,

    /// Label rendered for a sender whose profile could not be resolved
    pub unknown_sender_label: String,

    /// Prefix for temporary identifiers of pending messages
    pub temp_id_prefix: String,

    /// Text shown when asking the user to confirm a delete
    pub delete_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 30,
            unknown_sender_label: "Unknown".to_string(),
            temp_id_prefix: "temp-".to_string(),
            delete_prompt: "Delete this message?".to_string(),
        }
    }
}

impl ChatConfig {
    /// Parse a (possibly partial) JSON document over the defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let config: ChatConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Page size with a floor of one message
    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }

    fn normalized(mut self) -> Self {
        self.page_size = self.effective_page_size();
        self
    }
}
