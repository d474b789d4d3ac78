use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Most companions a single entry can name.
pub const MAX_COMPANIONS: usize = 4;

/// Identifier of one prompt in the wizard.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum StepId {
    When,
    Subject,
    Detail,
    Companions,
    CompanionKind,
    Feeling,
}

impl StepId {
    pub const FIRST: StepId = StepId::When;

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::When => "when",
            StepId::Subject => "subject",
            StepId::Detail => "detail",
            StepId::Companions => "companions",
            StepId::CompanionKind => "companionKind",
            StepId::Feeling => "feeling",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "when" => Ok(StepId::When),
            "subject" | "what" => Ok(StepId::Subject),
            "detail" | "what_detail" => Ok(StepId::Detail),
            "companions" | "friend_names" => Ok(StepId::Companions),
            "companionKind" | "companion_kind" | "who" => {
                Ok(StepId::CompanionKind)
            }
            "feeling" => Ok(StepId::Feeling),
            other => Err(format!("unknown step '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum When {
    Today,
    Yesterday,
}

impl When {
    pub const ALL: [When; 2] = [When::Today, When::Yesterday];

    pub fn label(&self) -> &'static str {
        match self {
            When::Today => "きょう",
            When::Yesterday => "きのう",
        }
    }

    /// Accepts the ASCII id or the display label.
    pub fn parse(value: &str) -> Option<When> {
        When::ALL
            .into_iter()
            .find(|w| value == w.label() || value == w.id())
    }

    fn id(&self) -> &'static str {
        match self {
            When::Today => "today",
            When::Yesterday => "yesterday",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompanionKind {
    Alone,
    Friends,
    Teacher,
    Everyone,
}

impl CompanionKind {
    pub const ALL: [CompanionKind; 4] = [
        CompanionKind::Alone,
        CompanionKind::Friends,
        CompanionKind::Teacher,
        CompanionKind::Everyone,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CompanionKind::Alone => "ひとりで",
            CompanionKind::Friends => "おともだちと",
            CompanionKind::Teacher => "せんせいと",
            CompanionKind::Everyone => "みんなで",
        }
    }

    pub fn parse(value: &str) -> Option<CompanionKind> {
        CompanionKind::ALL
            .into_iter()
            .find(|k| value == k.label() || value == k.id())
    }

    fn id(&self) -> &'static str {
        match self {
            CompanionKind::Alone => "alone",
            CompanionKind::Friends => "friends",
            CompanionKind::Teacher => "teacher",
            CompanionKind::Everyone => "everyone",
        }
    }
}

/// The selections made so far for one diary entry.
///
/// `subject`, `detail` and `feeling` hold catalog labels; which catalog a
/// label belongs to depends on the subject (see `catalog::Catalog`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub when: Option<When>,
    pub subject: Option<String>,
    pub detail: Option<String>,
    pub companions: Vec<String>,
    pub companion_kind: Option<CompanionKind>,
    pub feeling: Option<String>,
}

impl AnswerRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `name` if absent, removes it if present. Adding beyond
    /// `MAX_COMPANIONS` is ignored. Returns whether the record changed.
    pub fn toggle_companion(&mut self, name: &str) -> bool {
        if let Some(pos) = self.companions.iter().position(|n| n == name) {
            self.companions.remove(pos);
            return true;
        }
        if self.companions.len() >= MAX_COMPANIONS {
            return false;
        }
        self.companions.push(name.to_string());
        true
    }

    pub fn has_companions(&self) -> bool {
        !self.companions.is_empty()
    }

    pub fn when_label(&self) -> Option<&'static str> {
        self.when.map(|w| w.label())
    }
}

/// A finished diary entry as persisted by an `EntryStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: String,
    pub user_id: String,
    pub date_label: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub text: String,
    /// Opaque drawing/tracing blob (a PNG data URL from the client).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}
