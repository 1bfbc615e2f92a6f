//! Canonical text view of a record, shared by every scoring stage.

use crate::pipeline::types::EmailRecord;

/// Derived per-record context. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContext {
    /// Lower-cased bare address (angle brackets and display name removed).
    pub sender: String,
    /// Lower-cased display name, if the `from` field carried one.
    pub sender_display: String,
    /// Lower-cased text after the last `@`; empty when there is no `@`.
    pub domain: String,
    pub subject: String,
    /// Body prefix of at most `body_snippet_chars` characters.
    pub body: String,
}

impl NormalizedContext {
    pub fn from_record(record: &EmailRecord, body_snippet_chars: usize) -> Self {
        let (display, address) = split_from(&record.from);
        let sender = address.trim().to_lowercase();
        let domain = sender
            .rsplit_once('@')
            .map(|(_, d)| d.trim().to_string())
            .unwrap_or_default();

        Self {
            sender,
            sender_display: display.trim().trim_matches('"').to_lowercase(),
            domain,
            subject: record.subject.trim().to_string(),
            body: record.body.chars().take(body_snippet_chars).collect(),
        }
    }

    /// Local part of the sender address.
    pub fn local_part(&self) -> &str {
        self.sender
            .rsplit_once('@')
            .map(|(local, _)| local)
            .unwrap_or(&self.sender)
    }

    /// Text handed to the encoder.
    pub fn embedding_text(&self) -> String {
        format!("from {}\n{}\n{}", self.domain, self.subject, self.body)
    }
}

/// Split `Name <addr@host>` into (display, address).
fn split_from(from: &str) -> (&str, &str) {
    match (from.find('<'), from.rfind('>')) {
        (Some(open), Some(close)) if open < close => (&from[..open], &from[open + 1..close]),
        _ => ("", from),
    }
}
