//! The allowed category set for a run.

use crate::error::PipelineError;

/// Forced category for junk mail.
pub const JUNK: &str = "Junk";
/// Fallback category when nothing else resolves.
pub const ARCHIVE: &str = "Archive";
/// Mailbox folders that are never proposed as categories.
pub const OPERATIONAL: [&str; 4] = ["Inbox", "Drafts", "Sent", "Trash"];

/// Ordered, immutable set of category names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInventory {
    names: Vec<String>,
}

impl CategoryInventory {
    /// Build an inventory, dropping duplicates while keeping first-seen order.
    ///
    /// Fails when the list is empty or lacks the reserved `Junk`/`Archive` names.
    pub fn new<I, S>(names: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(PipelineError::Inventory(
                    "category names may not be empty".to_string(),
                ));
            }
            if !unique.contains(&name) {
                unique.push(name);
            }
        }

        if unique.is_empty() {
            return Err(PipelineError::Inventory("no categories loaded".to_string()));
        }
        for reserved in [JUNK, ARCHIVE] {
            if !unique.iter().any(|n| n == reserved) {
                return Err(PipelineError::Inventory(format!(
                    "reserved category '{reserved}' is missing"
                )));
            }
        }

        Ok(Self { names: unique })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Case-insensitive lookup returning the inventory's own spelling.
    pub fn canonical(&self, name: &str) -> Option<&str> {
        let needle = name.trim();
        self.names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(needle))
            .map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Categories the keyword heuristic may propose: everything except the
    /// operational folders and the reserved `Junk`/`Archive`.
    pub fn keyword_candidates(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|n| !OPERATIONAL.contains(n) && *n != JUNK && *n != ARCHIVE)
    }

    /// Labels an adjudicator may return for the category decision.
    pub fn adjudication_labels(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|n| !OPERATIONAL.contains(&n.as_str()) && n.as_str() != JUNK)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> CategoryInventory {
        CategoryInventory::new(["Inbox", "ADT", "Work", "Junk", "Archive", "Trash", "Work"]).unwrap()
    }

    #[test]
    fn dedupes_preserving_order() {
        let inv = inventory();
        assert_eq!(inv.len(), 6);
        assert_eq!(inv.names()[1], "ADT");
    }

    #[test]
    fn requires_reserved_names() {
        let err = CategoryInventory::new(["Work", "Archive"]).unwrap_err();
        assert!(err.to_string().contains("Junk"));
        let err = CategoryInventory::new(["Work", "Junk"]).unwrap_err();
        assert!(err.to_string().contains("Archive"));
    }

    #[test]
    fn rejects_empty() {
        assert!(CategoryInventory::new(Vec::<String>::new()).is_err());
        assert!(CategoryInventory::new(["Junk", "Archive", " "]).is_err());
    }

    #[test]
    fn keyword_candidates_skip_reserved_and_operational() {
        let inv = inventory();
        let candidates: Vec<&str> = inv.keyword_candidates().collect();
        assert_eq!(candidates, vec!["ADT", "Work"]);
    }

    #[test]
    fn adjudication_labels_keep_archive_but_not_junk() {
        let labels = inventory().adjudication_labels();
        assert_eq!(labels, vec!["ADT", "Work", "Archive"]);
    }

    #[test]
    fn canonical_is_case_insensitive() {
        let inv = inventory();
        assert_eq!(inv.canonical(" adt "), Some("ADT"));
        assert_eq!(inv.canonical("Personal"), None);
    }
}
