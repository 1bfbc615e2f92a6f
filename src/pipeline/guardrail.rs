//! Final merge of the three decisions into one schema-valid label pair.

use tracing::debug;

use crate::pipeline::inventory::{ARCHIVE, CategoryInventory, JUNK};
use crate::pipeline::types::{
    Classification, Decision, DecisionKind, Priority, TraceEvent, TraceStep,
};

/// Final decisions handed to the merger. `category`/`priority` are `None`
/// when the junk override made them moot and they were never resolved.
#[derive(Debug, Clone)]
pub struct Verdicts {
    pub junk: Decision<bool>,
    pub category: Option<Decision<String>>,
    pub priority: Option<Decision<Priority>>,
}

/// Reconcile the verdicts into a [`Classification`].
///
/// Junk forces `(Junk, normal)`. Otherwise a missing or unknown category
/// becomes `Archive` and an unresolved priority becomes `normal`.
///
/// # Panics
///
/// If the merged labels fall outside the inventory or the priority set.
/// The fallbacks above make that unreachable for a valid inventory.
pub fn merge(
    inventory: &CategoryInventory,
    verdicts: Verdicts,
    mut trace: Vec<TraceEvent>,
) -> Classification {
    let junk = verdicts.junk.label.unwrap_or(false);

    let (category, priority) = if junk {
        trace.push(TraceEvent::note(
            DecisionKind::Junk,
            TraceStep::Override,
            format!("junk forces {JUNK}/{}", Priority::Normal),
        ));
        (JUNK.to_string(), Priority::Normal)
    } else {
        (
            merge_category(inventory, verdicts.category, &mut trace),
            merge_priority(verdicts.priority, &mut trace),
        )
    };

    assert!(
        inventory.contains(&category),
        "merged category {category:?} is not in the inventory"
    );
    assert!(
        Priority::parse(priority.as_str()) == Some(priority),
        "merged priority {priority} is not allowed"
    );

    for (kind, label) in [
        (DecisionKind::Junk, junk.to_string()),
        (DecisionKind::Category, category.clone()),
        (DecisionKind::Priority, priority.to_string()),
    ] {
        let mut event = TraceEvent::note(kind, TraceStep::Final, "merged");
        event.label = Some(label);
        trace.push(event);
    }
    debug!(%category, %priority, junk, "Merged");

    Classification {
        category,
        priority,
        junk,
        trace,
    }
}

fn merge_category(
    inventory: &CategoryInventory,
    decision: Option<Decision<String>>,
    trace: &mut Vec<TraceEvent>,
) -> String {
    let chosen = decision
        .as_ref()
        .and_then(|d| d.label.as_deref())
        .and_then(|label| inventory.canonical(label))
        .filter(|label| *label != JUNK);

    match chosen {
        Some(label) => label.to_string(),
        None => {
            let why = match decision.and_then(|d| d.label) {
                Some(label) => format!("{label:?} is not a usable category, using {ARCHIVE}"),
                None => format!("no category decision, using {ARCHIVE}"),
            };
            trace.push(TraceEvent::note(DecisionKind::Category, TraceStep::Fallback, why));
            ARCHIVE.to_string()
        }
    }
}

fn merge_priority(decision: Option<Decision<Priority>>, trace: &mut Vec<TraceEvent>) -> Priority {
    match decision.and_then(|d| d.label) {
        Some(priority) => priority,
        None => {
            trace.push(TraceEvent::note(
                DecisionKind::Priority,
                TraceStep::Fallback,
                format!("priority unresolved, using {}", Priority::Normal),
            ));
            Priority::Normal
        }
    }
}
