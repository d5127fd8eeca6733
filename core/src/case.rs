//! The case under investigation, as handed over by the case source.

use crate::types::CaseId;
use serde::{Deserialize, Serialize};

/// Identifier fields the ticket system already holds in structured form.
/// Values are raw here; the extractor normalizes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredFields {
    #[serde(default, alias = "IMEI")]
    pub imei:           Option<String>,
    #[serde(default, alias = "LoanID")]
    pub loan_id:        Option<String>,
    #[serde(default, alias = "AccountNumber")]
    pub account_number: Option<String>,
    #[serde(default, alias = "DeviceID")]
    pub device_id:      Option<String>,
    #[serde(default, alias = "CustomerID")]
    pub customer_id:    Option<String>,
    #[serde(default, alias = "AccountID")]
    pub account_id:     Option<String>,
    #[serde(default, alias = "PhoneNumber")]
    pub phone:          Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Case {
    #[serde(default)]
    pub case_id:       CaseId,
    #[serde(default)]
    pub subject:       String,
    #[serde(default)]
    pub description:   String,
    #[serde(default)]
    pub case_details:  String,
    /// Raw conversation excerpts, oldest first.
    #[serde(default)]
    pub conversations: Vec<String>,
    #[serde(default)]
    pub structured:    StructuredFields,
}

impl Case {
    pub fn new(case_id: impl Into<CaseId>) -> Self {
        Self { case_id: case_id.into(), ..Self::default() }
    }

    /// Conversation excerpts as numbered blocks, skipping empty ones.
    pub fn conversation_text(&self) -> String {
        self.conversations
            .iter()
            .filter(|body| !body.trim().is_empty())
            .enumerate()
            .map(|(i, body)| format!("Conversation {}: {}", i + 1, body.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every free-text field joined, used for keyword and identifier scans.
    pub fn narrative(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.subject, &self.description, &self.case_details];
        parts.extend(self.conversations.iter().map(String::as_str));
        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_text_numbers_non_empty_excerpts() {
        let mut case = Case::new("100");
        case.conversations = vec!["first".into(), "  ".into(), "second".into()];
        assert_eq!(case.conversation_text(), "Conversation 1: first\nConversation 2: second");
    }

    #[test]
    fn narrative_skips_blank_fields() {
        let mut case = Case::new("100");
        case.subject = "Scam".into();
        case.case_details = "Suspect called".into();
        assert_eq!(case.narrative(), "Scam\nSuspect called");
    }
}
