use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, instrument};

use crate::model::StepId;

const BUILTIN_CATALOG: &str = include_str!("catalog.json");

/// How a subject-mode sentence is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Template {
    /// `{when}の {subject}の じゅぎょうで、{detail}。 {feeling}`
    #[default]
    Lesson,
    /// `{when}の {subject}は、{detail}。 {feeling}`
    Meal,
    /// `{when}、{subject}の じかんに {action}。 {feeling}`
    Chore,
    /// `{when}は、{detail}。 {feeling}`
    Journey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    /// Sentence phrase rendered for this option. Falls back to the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Standard-regime details only: the activity is done with others, so
    /// the wizard asks for companion names.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub group: bool,
}

impl ChoiceOption {
    /// The sentence phrase for this option.
    pub fn phrase(&self) -> &str {
        self.text.as_deref().unwrap_or(&self.label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub detail: String,
    pub feeling: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub id: String,
    pub label: String,
    /// Standard-regime connective, e.g. `やすみじかんに、`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_phrase: Option<String>,
    /// Standard-regime action used when no detail was chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<String>,
    /// Standard regime asks the detail step for this subject.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub asks_detail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectMode {
    #[serde(default)]
    pub template: Template,
    pub detail_question: String,
    pub feeling_question: String,
    pub details: Vec<ChoiceOption>,
    pub feelings: Vec<ChoiceOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
}

impl SubjectMode {
    pub fn detail(&self, label: &str) -> Option<&ChoiceOption> {
        self.details.iter().find(|o| o.label == label)
    }

    pub fn feeling(&self, label: &str) -> Option<&ChoiceOption> {
        self.feelings.iter().find(|o| o.label == label)
    }

    pub fn override_for(&self, detail: &str, feeling: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|o| o.detail == detail && o.feeling == feeling)
            .map(|o| o.text.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardCatalog {
    pub details: Vec<ChoiceOption>,
    pub feelings: Vec<ChoiceOption>,
    #[serde(default)]
    pub companion_hint: String,
    #[serde(default)]
    pub companion_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Questions {
    pub when: String,
    pub subject: String,
    pub detail: String,
    pub companions: String,
    #[serde(rename = "companionKind")]
    pub companion_kind: String,
    pub feeling: String,
}

impl Questions {
    pub fn for_step(&self, step: StepId) -> &str {
        match step {
            StepId::When => &self.when,
            StepId::Subject => &self.subject,
            StepId::Detail => &self.detail,
            StepId::Companions => &self.companions,
            StepId::CompanionKind => &self.companion_kind,
            StepId::Feeling => &self.feeling,
        }
    }
}

/// Option and template tables for both flow regimes.
///
/// Subject-mode configurations are keyed by subject label. A subject with
/// no entry in `subject_modes` runs the standard flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub questions: Questions,
    pub subjects: Vec<SubjectInfo>,
    pub standard: StandardCatalog,
    pub subject_modes: BTreeMap<String, SubjectMode>,
}

impl Catalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse catalog: {}", e))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Loads the catalog at `path`, or the builtin one when no path is set.
    #[instrument(err)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read catalog at '{}': {}",
                path.display(),
                e
            )
        })?;
        let catalog = Self::from_json(&raw)?;
        info!(
            "Loaded catalog with {} subjects ({} in subject mode)",
            catalog.subjects.len(),
            catalog.subject_modes.len()
        );
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subjects.is_empty() {
            bail!("catalog has no subjects");
        }
        let mut ids = HashSet::new();
        let mut labels = HashSet::new();
        for subject in &self.subjects {
            if subject.id.is_empty() || subject.label.is_empty() {
                bail!("catalog subject with empty id or label");
            }
            if !ids.insert(subject.id.as_str()) {
                bail!("duplicate subject id '{}'", subject.id);
            }
            if !labels.insert(subject.label.as_str()) {
                bail!("duplicate subject label '{}'", subject.label);
            }
            if subject.asks_detail
                && self.subject_modes.contains_key(&subject.label)
            {
                bail!(
                    "subject '{}' cannot both ask the standard detail step \
                     and run in subject mode",
                    subject.label
                );
            }
        }

        check_options("standard details", &self.standard.details)?;
        check_options("standard feelings", &self.standard.feelings)?;

        for (subject, mode) in &self.subject_modes {
            if !labels.contains(subject.as_str()) {
                bail!("subject mode '{}' is not a known subject", subject);
            }
            check_options(&format!("{} details", subject), &mode.details)?;
            check_options(&format!("{} feelings", subject), &mode.feelings)?;
            for rule in &mode.overrides {
                if mode.detail(&rule.detail).is_none()
                    || mode.feeling(&rule.feeling).is_none()
                {
                    bail!(
                        "override ({}, {}, {}) refers to an unknown option",
                        subject,
                        rule.detail,
                        rule.feeling
                    );
                }
            }
        }
        Ok(())
    }

    pub fn subject(&self, label: &str) -> Option<&SubjectInfo> {
        self.subjects.iter().find(|s| s.label == label)
    }

    /// Finds a subject by id or label.
    pub fn resolve_subject(&self, value: &str) -> Option<&SubjectInfo> {
        self.subjects
            .iter()
            .find(|s| s.label == value || s.id == value)
    }

    pub fn mode(&self, subject: &str) -> Option<&SubjectMode> {
        self.subject_modes.get(subject)
    }

    pub fn asks_detail(&self, subject: &str) -> bool {
        self.subject(subject).is_some_and(|s| s.asks_detail)
    }

    pub fn standard_detail(&self, label: &str) -> Option<&ChoiceOption> {
        self.standard.details.iter().find(|o| o.label == label)
    }

    pub fn standard_feeling(&self, label: &str) -> Option<&ChoiceOption> {
        self.standard.feelings.iter().find(|o| o.label == label)
    }

    /// Whether a standard-regime detail leads to the companions step.
    pub fn implies_group(&self, detail: &str) -> bool {
        self.standard_detail(detail).is_some_and(|o| o.group)
    }
}

fn check_options(what: &str, options: &[ChoiceOption]) -> Result<()> {
    if options.is_empty() {
        bail!("{} are empty", what);
    }
    let mut seen = HashSet::new();
    for option in options {
        if option.label.is_empty() {
            bail!("{} contain an empty label", what);
        }
        if !seen.insert(option.label.as_str()) {
            bail!("{} contain duplicate label '{}'", what, option.label);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.subjects.len(), 9);
        assert_eq!(catalog.subject_modes.len(), 8);
        assert!(catalog.mode("やすみじかん").is_none());
        assert!(catalog.asks_detail("やすみじかん"));
        assert_eq!(catalog.mode("そうじ").unwrap().template, Template::Chore);
        assert_eq!(
            catalog.resolve_subject("recess").unwrap().label,
            "やすみじかん"
        );
    }

    #[test]
    fn test_only_language_arts_has_an_override() {
        let catalog = Catalog::builtin().unwrap();
        let with_overrides: Vec<&String> = catalog
            .subject_modes
            .iter()
            .filter(|(_, mode)| !mode.overrides.is_empty())
            .map(|(subject, _)| subject)
            .collect();
        assert_eq!(with_overrides, vec!["こくご"]);
        let mode = catalog.mode("こくご").unwrap();
        assert_eq!(
            mode.override_for("ほんを よんだ", "できた"),
            Some("じょうずに よめて、うれしかったです。")
        );
        assert_eq!(mode.override_for("かいた", "できた"), None);
    }

    #[test]
    fn test_group_details() {
        let catalog = Catalog::builtin().unwrap();
        for detail in [
            "ともだちとあそんだ",
            "おにごっこした",
            "さっかーした",
            "ブランコした",
            "ドッチボールした",
        ] {
            assert!(catalog.implies_group(detail), "{}", detail);
        }
        assert!(!catalog.implies_group("ひとりであそんだ"));
        assert!(!catalog.implies_group("その他"));
        assert!(!catalog.implies_group("ほんを よんだ"));
    }

    #[test]
    fn test_unknown_subject_mode_is_rejected() {
        let mut catalog = Catalog::builtin().unwrap();
        let mode = catalog.mode("こくご").unwrap().clone();
        catalog.subject_modes.insert("りか".to_string(), mode);
        let err = catalog.validate().unwrap_err();
        assert!(err.to_string().contains("not a known subject"), "{}", err);
    }

    #[test]
    fn test_dangling_override_is_rejected() {
        let mut catalog = Catalog::builtin().unwrap();
        catalog
            .subject_modes
            .get_mut("さんすう")
            .unwrap()
            .overrides
            .push(Override {
                detail: "たしざん".to_string(),
                feeling: "ねむかった".to_string(),
                text: "x".to_string(),
            });
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let err = Catalog::from_json("{\"subjects\": 3}").unwrap_err();
        assert!(err.to_string().contains("Failed to parse catalog"));
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let file = tempfile::NamedTempFile::new()?;
        std::fs::write(file.path(), BUILTIN_CATALOG)?;
        let catalog = Catalog::load(Some(file.path()))?;
        assert_eq!(catalog.subjects[0].label, "こくご");
        Ok(())
    }
}
