//! Session state machine for one diary entry.
//!
//! ```text
//! collecting(step) --choose/advance--> collecting(next)
//!                  --last answer-----> composing --finish--> result
//! result --begin_save--> saving --ok--> collecting(when)   (fresh record)
//!                               --err-> result             (retry offered)
//! ```
//!
//! Composition and saving are the only asynchronous steps. They are split
//! into a synchronous start that hands out a ticket and a synchronous
//! finish that takes it back, so a shared controller never has to be
//! locked across an await. Tickets carry the generation they were issued
//! in; `reset` bumps the generation and late results are dropped.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ChoiceOption};
use crate::compose;
use crate::flow::{self, Next, Regime};
use crate::model::{
    AnswerRecord, CompanionKind, DiaryEntry, StepId, When, MAX_COMPANIONS,
};
use crate::refine::{
    refine_or_compose, RefinementGateway, RefinementRequest, Sentence,
    DEFAULT_REFINE_TIMEOUT,
};
use crate::speech::{speak_or_log, SpeechOutput};
use crate::store::EntryStore;
use crate::time_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Collecting(StepId),
    Composing,
    Result,
    Saving,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Collecting(_) => "collecting",
            SessionState::Composing => "composing",
            SessionState::Result => "result",
            SessionState::Saving => "saving",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionState::Collecting(step) => write!(f, "collecting({})", step),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardError {
    /// The step or value is not legal in the current state; nothing changed.
    InvalidTransition { step: StepId, reason: String },
    /// A composition or save is in flight.
    Busy(SessionState),
    /// Save or annotate attempted without a composed sentence.
    NotReady,
    PersistenceFailure(String),
}

impl WizardError {
    fn invalid(step: StepId, reason: impl Into<String>) -> Self {
        WizardError::InvalidTransition {
            step,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for WizardError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WizardError::InvalidTransition { step, reason } => {
                write!(f, "Invalid transition at '{}': {}", step, reason)
            }
            WizardError::Busy(state) => {
                write!(f, "Session is busy ({})", state)
            }
            WizardError::NotReady => write!(f, "No sentence has been composed"),
            WizardError::PersistenceFailure(msg) => {
                write!(f, "Failed to save entry: {}", msg)
            }
        }
    }
}

impl std::error::Error for WizardError {}

/// Outcome of a forward transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Moved(StepId),
    /// Multi-select step: the selection changed but the step did not.
    Stayed(StepId),
    /// The record is complete; finish with `finish_composition` or
    /// `compose_result`.
    Compose(CompositionTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionTicket {
    pub generation: u64,
    /// Snapshot of the record at completion; never mutated afterwards.
    pub record: AnswerRecord,
    pub request: RefinementRequest,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTicket {
    pub generation: u64,
    pub entry: DiaryEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepPrompt {
    pub step: StepId,
    pub question: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Options toggle instead of advancing; finish with `advance`.
    pub multi: bool,
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// 1-based position of the current step on the record's path.
    pub index: usize,
    pub total: usize,
}

/// Serializable snapshot of a session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub user_id: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<StepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<StepPrompt>,
    pub progress: Progress,
    pub regime: Regime,
    pub record: AnswerRecord,
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence: Option<Sentence>,
    pub has_annotation: bool,
    pub complete: bool,
}

pub struct WizardController {
    catalog: Arc<Catalog>,
    user_id: String,
    record: AnswerRecord,
    state: SessionState,
    generation: u64,
    sentence: Option<Sentence>,
    annotation: Option<String>,
}

impl WizardController {
    pub fn new(catalog: Arc<Catalog>, user_id: impl Into<String>) -> Self {
        Self {
            catalog,
            user_id: user_id.into(),
            record: AnswerRecord::new(),
            state: SessionState::Collecting(StepId::FIRST),
            generation: 0,
            sentence: None,
            annotation: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn record(&self) -> &AnswerRecord {
        &self.record
    }

    pub fn sentence(&self) -> Option<&Sentence> {
        self.sentence.as_ref()
    }

    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn regime(&self) -> Regime {
        Regime::of(&self.record, &self.catalog)
    }

    /// The step being collected, or the error for any other state.
    fn collecting(&self, step: StepId) -> Result<StepId, WizardError> {
        match self.state {
            SessionState::Collecting(current) => Ok(current),
            SessionState::Composing | SessionState::Saving => {
                Err(WizardError::Busy(self.state))
            }
            SessionState::Result => Err(WizardError::invalid(
                step,
                "the entry is already composed; go back or reset",
            )),
        }
    }

    /// Answers `step` with `value`.
    ///
    /// Single-select steps move on to the next step. On the companions step
    /// the name is toggled and the step stays put; a fifth name is ignored.
    pub fn choose(
        &mut self,
        step: StepId,
        value: &str,
    ) -> Result<Advance, WizardError> {
        let current = self.collecting(step)?;
        if step != current {
            return Err(WizardError::invalid(
                step,
                format!("the current step is '{}'", current),
            ));
        }
        let value = value.trim();
        if value.is_empty() {
            return Err(WizardError::invalid(step, "empty value"));
        }

        match step {
            StepId::When => {
                self.record.when = Some(When::parse(value).ok_or_else(
                    || WizardError::invalid(step, unknown(value)),
                )?);
            }
            StepId::Subject => {
                let subject = self
                    .catalog
                    .resolve_subject(value)
                    .ok_or_else(|| WizardError::invalid(step, unknown(value)))?
                    .label
                    .clone();
                if self.record.subject.as_deref() != Some(subject.as_str()) {
                    debug!("Subject changed to {}", subject);
                    self.record.subject = Some(subject);
                }
            }
            StepId::Detail => {
                let label = self
                    .detail_options()
                    .iter()
                    .find(|o| o.label == value)
                    .map(|o| o.label.clone())
                    .ok_or_else(|| WizardError::invalid(step, unknown(value)))?;
                self.record.detail = Some(label);
            }
            StepId::Companions => {
                if !self.record.toggle_companion(value) {
                    debug!(
                        "Ignoring companion {}: already {} selected",
                        value, MAX_COMPANIONS
                    );
                }
                return Ok(Advance::Stayed(step));
            }
            StepId::CompanionKind => {
                self.record.companion_kind =
                    Some(CompanionKind::parse(value).ok_or_else(|| {
                        WizardError::invalid(step, unknown(value))
                    })?);
            }
            StepId::Feeling => {
                let label = self
                    .feeling_options()
                    .iter()
                    .find(|o| o.label == value)
                    .map(|o| o.label.clone())
                    .ok_or_else(|| WizardError::invalid(step, unknown(value)))?;
                self.record.feeling = Some(label);
            }
        }

        self.prune();
        Ok(self.step_forward(step))
    }

    /// The "continue" action: leaves the current step if it is answered.
    /// Required to leave the companions step, which needs at least one
    /// name.
    pub fn advance(&mut self) -> Result<Advance, WizardError> {
        let step = self.collecting(StepId::FIRST)?;
        if !self.is_answered(step) {
            let reason = if step == StepId::Companions {
                "no companion selected"
            } else {
                "the step is not answered"
            };
            return Err(WizardError::invalid(step, reason));
        }
        Ok(self.step_forward(step))
    }

    fn step_forward(&mut self, from: StepId) -> Advance {
        match flow::next(self.regime(), from, &self.record, &self.catalog) {
            Next::Step(step) => {
                self.state = SessionState::Collecting(step);
                Advance::Moved(step)
            }
            Next::Complete => {
                self.state = SessionState::Composing;
                let draft = compose::compose(&self.record, &self.catalog);
                let request =
                    RefinementRequest::from_record(&self.record, &self.catalog);
                info!("Record complete, composing");
                Advance::Compose(CompositionTicket {
                    generation: self.generation,
                    record: self.record.clone(),
                    request,
                    draft,
                })
            }
        }
    }

    /// Moves to the previous step of the current path. A no-op on the
    /// first step. From the result state it returns to the last question
    /// and drops the sentence.
    pub fn back(&mut self) -> Result<StepId, WizardError> {
        match self.state {
            SessionState::Composing | SessionState::Saving => {
                Err(WizardError::Busy(self.state))
            }
            SessionState::Result => {
                self.sentence = None;
                self.annotation = None;
                self.state = SessionState::Collecting(StepId::Feeling);
                Ok(StepId::Feeling)
            }
            SessionState::Collecting(current) => {
                let step = flow::previous(
                    self.regime(),
                    current,
                    &self.record,
                    &self.catalog,
                )
                .unwrap_or(current);
                self.state = SessionState::Collecting(step);
                Ok(step)
            }
        }
    }

    /// Clears everything and returns to the first step. Outstanding
    /// tickets become stale.
    pub fn reset(&mut self) {
        self.record = AnswerRecord::new();
        self.state = SessionState::Collecting(StepId::FIRST);
        self.sentence = None;
        self.annotation = None;
        self.generation += 1;
    }

    /// Applies a composed sentence. Returns false, leaving the session
    /// alone, if the ticket is stale.
    pub fn finish_composition(
        &mut self,
        ticket: CompositionTicket,
        sentence: Sentence,
    ) -> bool {
        if ticket.generation != self.generation
            || self.state != SessionState::Composing
        {
            debug!(
                "Dropping composition from generation {} (now {})",
                ticket.generation, self.generation
            );
            return false;
        }
        self.sentence = Some(sentence);
        self.state = SessionState::Result;
        true
    }

    /// Refines (or falls back to the draft) and finishes in one call.
    pub async fn compose_result(
        &mut self,
        ticket: CompositionTicket,
        gateway: Option<&dyn RefinementGateway>,
    ) -> bool {
        let sentence = refine_or_compose(
            gateway,
            &ticket.request,
            ticket.draft.clone(),
            DEFAULT_REFINE_TIMEOUT,
        )
        .await;
        self.finish_composition(ticket, sentence)
    }

    /// Whether every step on the record's path has an answer.
    pub fn is_complete(&self) -> bool {
        flow::path(&self.record, &self.catalog)
            .into_iter()
            .all(|step| self.is_answered(step))
    }

    fn is_answered(&self, step: StepId) -> bool {
        match step {
            StepId::When => self.record.when.is_some(),
            StepId::Subject => self.record.subject.is_some(),
            StepId::Detail => self.record.detail.is_some(),
            StepId::Companions => self.record.has_companions(),
            StepId::CompanionKind => self.record.companion_kind.is_some(),
            StepId::Feeling => self.record.feeling.is_some(),
        }
    }

    /// Drops answers that no longer fit the record: detail and feeling from
    /// the other regime's catalog, and the companion alternative that is
    /// off the current path.
    fn prune(&mut self) {
        if let Some(detail) = self.record.detail.as_deref() {
            let asked = match self.regime() {
                Regime::Subject => true,
                Regime::Standard => self
                    .record
                    .subject
                    .as_deref()
                    .is_some_and(|s| self.catalog.asks_detail(s)),
            };
            if !asked || !self.detail_options().iter().any(|o| o.label == detail)
            {
                debug!("Clearing detail {}", detail);
                self.record.detail = None;
            }
        }
        if let Some(feeling) = self.record.feeling.as_deref() {
            if !self.feeling_options().iter().any(|o| o.label == feeling) {
                debug!("Clearing feeling {}", feeling);
                self.record.feeling = None;
            }
        }

        let path = flow::path(&self.record, &self.catalog);
        if !path.contains(&StepId::Companions) {
            self.record.companions.clear();
        }
        if !path.contains(&StepId::CompanionKind) {
            self.record.companion_kind = None;
        }
    }

    fn detail_options(&self) -> &[ChoiceOption] {
        match self.record.subject.as_deref().and_then(|s| self.catalog.mode(s))
        {
            Some(mode) => &mode.details,
            None => &self.catalog.standard.details,
        }
    }

    fn feeling_options(&self) -> &[ChoiceOption] {
        match self.record.subject.as_deref().and_then(|s| self.catalog.mode(s))
        {
            Some(mode) => &mode.feelings,
            None => &self.catalog.standard.feelings,
        }
    }

    pub fn attach_annotation(
        &mut self,
        blob: String,
    ) -> Result<(), WizardError> {
        self.require_result()?;
        self.annotation = Some(blob);
        Ok(())
    }

    pub fn clear_annotation(&mut self) -> Result<(), WizardError> {
        self.require_result()?;
        self.annotation = None;
        Ok(())
    }

    fn require_result(&self) -> Result<(), WizardError> {
        match self.state {
            SessionState::Result => Ok(()),
            SessionState::Composing | SessionState::Saving => {
                Err(WizardError::Busy(self.state))
            }
            SessionState::Collecting(_) => Err(WizardError::NotReady),
        }
    }

    /// Moves `result -> saving` and builds the entry to persist.
    pub fn begin_save(
        &mut self,
        now: DateTime<Utc>,
        timezone: Tz,
    ) -> Result<SaveTicket, WizardError> {
        self.require_result()?;
        let sentence = self.sentence.as_ref().ok_or(WizardError::NotReady)?;
        let entry = DiaryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            date_label: time_util::date_label(now, timezone),
            created_at: now.timestamp_millis(),
            text: sentence.text.clone(),
            annotation: self.annotation.clone(),
        };
        self.state = SessionState::Saving;
        Ok(SaveTicket {
            generation: self.generation,
            entry,
        })
    }

    /// Applies the store's answer. Success starts a fresh entry; failure
    /// returns to the result state so the save can be retried.
    pub fn finish_save(
        &mut self,
        ticket: SaveTicket,
        outcome: anyhow::Result<String>,
    ) -> Result<String, WizardError> {
        let current = ticket.generation == self.generation
            && self.state == SessionState::Saving;
        match outcome {
            Ok(id) => {
                if current {
                    info!("Saved entry {}", id);
                    self.reset();
                }
                Ok(id)
            }
            Err(e) => {
                warn!("Failed to save entry {}: {}", ticket.entry.id, e);
                if current {
                    self.state = SessionState::Result;
                }
                Err(WizardError::PersistenceFailure(e.to_string()))
            }
        }
    }

    pub async fn save(
        &mut self,
        store: &dyn EntryStore,
        timezone: Tz,
    ) -> Result<String, WizardError> {
        let ticket = self.begin_save(Utc::now(), timezone)?;
        let outcome = store.create(&ticket.entry).await;
        self.finish_save(ticket, outcome)
    }

    /// Reads the result sentence aloud. Speech failures are only logged.
    pub async fn speak(&self, speech: &dyn SpeechOutput) {
        if let Some(sentence) = &self.sentence {
            speak_or_log(speech, &sentence.text).await;
        }
    }

    pub fn prompt(&self) -> Option<StepPrompt> {
        let SessionState::Collecting(step) = self.state else {
            return None;
        };
        let mode = self
            .record
            .subject
            .as_deref()
            .and_then(|s| self.catalog.mode(s));
        let question = match (step, mode) {
            (StepId::Detail, Some(mode)) => mode.detail_question.clone(),
            (StepId::Feeling, Some(mode)) => mode.feeling_question.clone(),
            _ => self.catalog.questions.for_step(step).to_string(),
        };
        let labels = |opts: &[ChoiceOption]| -> Vec<String> {
            opts.iter().map(|o| o.label.clone()).collect()
        };

        let (options, selected): (Vec<String>, Vec<String>) = match step {
            StepId::When => (
                When::ALL.iter().map(|w| w.label().to_string()).collect(),
                self.record.when_label().map(str::to_string).into_iter().collect(),
            ),
            StepId::Subject => (
                self.catalog.subjects.iter().map(|s| s.label.clone()).collect(),
                self.record.subject.clone().into_iter().collect(),
            ),
            StepId::Detail => (
                labels(self.detail_options()),
                self.record.detail.clone().into_iter().collect(),
            ),
            StepId::Companions => {
                let mut options =
                    self.catalog.standard.companion_suggestions.clone();
                for name in &self.record.companions {
                    if !options.contains(name) {
                        options.push(name.clone());
                    }
                }
                (options, self.record.companions.clone())
            }
            StepId::CompanionKind => (
                CompanionKind::ALL
                    .iter()
                    .map(|k| k.label().to_string())
                    .collect(),
                self.record
                    .companion_kind
                    .map(|k| k.label().to_string())
                    .into_iter()
                    .collect(),
            ),
            StepId::Feeling => (
                labels(self.feeling_options()),
                self.record.feeling.clone().into_iter().collect(),
            ),
        };

        let multi = step == StepId::Companions;
        Some(StepPrompt {
            step,
            question,
            options,
            hint: multi.then(|| self.catalog.standard.companion_hint.clone()),
            multi,
            selected,
        })
    }

    pub fn progress(&self) -> Progress {
        let path = flow::path(&self.record, &self.catalog);
        let total = path.len();
        let index = match self.state {
            SessionState::Collecting(step) => path
                .iter()
                .position(|s| *s == step)
                .map_or(total, |i| i + 1),
            _ => total,
        };
        Progress { index, total }
    }

    /// The sentence as it stands, with blanks for missing answers.
    pub fn preview(&self) -> String {
        compose::preview(&self.record, &self.catalog)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            user_id: self.user_id.clone(),
            state: self.state.name(),
            step: match self.state {
                SessionState::Collecting(step) => Some(step),
                _ => None,
            },
            prompt: self.prompt(),
            progress: self.progress(),
            regime: self.regime(),
            record: self.record.clone(),
            preview: self.preview(),
            sentence: self.sentence.clone(),
            has_annotation: self.annotation.is_some(),
            complete: self.is_complete(),
        }
    }
}

fn unknown(value: &str) -> String {
    format!("unknown option '{}'", value)
}
