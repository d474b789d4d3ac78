//! Step sequencing for the diary wizard.
//!
//! Two regimes share the `when -> subject` prefix:
//!
//! ```text
//! standard: when -> subject -> [detail] -> companions | companionKind -> feeling
//! subject:  when -> subject -> detail -> feeling
//! ```
//!
//! The standard regime asks `detail` only for subjects flagged
//! `asks_detail` in the catalog, and asks `companions` instead of
//! `companionKind` when the chosen detail is a group activity.

use serde::Serialize;

use crate::catalog::Catalog;
use crate::model::{AnswerRecord, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regime {
    Standard,
    Subject,
}

impl Regime {
    /// Subject regime iff the record's subject has a subject-mode entry.
    /// Unset and unknown subjects run the standard flow.
    pub fn of(record: &AnswerRecord, catalog: &Catalog) -> Regime {
        match record.subject.as_deref() {
            Some(subject) if catalog.mode(subject).is_some() => {
                Regime::Subject
            }
            _ => Regime::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Step(StepId),
    Complete,
}

/// The step that follows `last` once it has been answered.
pub fn next(
    regime: Regime,
    last: StepId,
    record: &AnswerRecord,
    catalog: &Catalog,
) -> Next {
    let step = match (regime, last) {
        (_, StepId::When) => StepId::Subject,
        (Regime::Subject, StepId::Subject) => StepId::Detail,
        (Regime::Subject, StepId::Detail) => StepId::Feeling,
        (Regime::Standard, StepId::Subject) => {
            if asks_detail(record, catalog) {
                StepId::Detail
            } else {
                StepId::CompanionKind
            }
        }
        (Regime::Standard, StepId::Detail) => {
            if asks_companions(record, catalog) {
                StepId::Companions
            } else {
                StepId::CompanionKind
            }
        }
        (_, StepId::Companions) | (_, StepId::CompanionKind) => {
            StepId::Feeling
        }
        (_, StepId::Feeling) => return Next::Complete,
    };
    Next::Step(step)
}

/// The step before `current` on the path the record implies, or `None` on
/// the first step.
pub fn previous(
    regime: Regime,
    current: StepId,
    record: &AnswerRecord,
    catalog: &Catalog,
) -> Option<StepId> {
    let step = match (regime, current) {
        (_, StepId::When) => return None,
        (_, StepId::Subject) => StepId::When,
        (_, StepId::Detail) => StepId::Subject,
        (_, StepId::Companions) => StepId::Detail,
        (_, StepId::CompanionKind) => {
            if asks_detail(record, catalog) {
                StepId::Detail
            } else {
                StepId::Subject
            }
        }
        (Regime::Subject, StepId::Feeling) => StepId::Detail,
        (Regime::Standard, StepId::Feeling) => {
            if asks_detail(record, catalog)
                && asks_companions(record, catalog)
            {
                StepId::Companions
            } else {
                StepId::CompanionKind
            }
        }
    };
    Some(step)
}

/// Every step the record's answers lead through, in order.
pub fn path(record: &AnswerRecord, catalog: &Catalog) -> Vec<StepId> {
    let regime = Regime::of(record, catalog);
    let mut steps = vec![StepId::FIRST];
    let mut current = StepId::FIRST;
    while let Next::Step(step) = next(regime, current, record, catalog) {
        steps.push(step);
        current = step;
    }
    steps
}

fn asks_detail(record: &AnswerRecord, catalog: &Catalog) -> bool {
    record
        .subject
        .as_deref()
        .is_some_and(|s| catalog.asks_detail(s))
}

fn asks_companions(record: &AnswerRecord, catalog: &Catalog) -> bool {
    record
        .detail
        .as_deref()
        .is_some_and(|d| catalog.implies_group(d))
}
