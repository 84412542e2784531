//! The scan session and its single transition function.
//!
//! Everything that can happen to a station (a decoded frame, an operator
//! intent, a finished submission, a cooldown tick) is a `SessionInput`.
//! `ScanSession::apply` mutates the session and returns the side effects the
//! controller has to carry out; it never performs I/O itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::api::{ScanMetadata, ScanRequest, ScanResult, SubmissionError};

use super::{
    events::Notification,
    policy::{ApprovalRule, ScanPolicy, SubmitPolicy},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanMode {
    #[serde(rename = "checkin")]
    CheckIn,
    #[serde(rename = "checkout")]
    CheckOut,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::CheckIn
    }
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::CheckIn => "checkin",
            ScanMode::CheckOut => "checkout",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Reason {
    #[serde(rename = "attendance")]
    Attendance,
    #[serde(rename = "break")]
    Break,
    #[serde(rename = "go out")]
    GoOut,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanSource {
    Camera,
    Manual,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub code: String,
    pub source: ScanSource,
    pub observed_at: DateTime<Utc>,
}

impl ScanEvent {
    pub fn camera(code: impl Into<String>) -> Self {
        Self::new(code, ScanSource::Camera)
    }

    pub fn manual(code: impl Into<String>) -> Self {
        Self::new(code, ScanSource::Manual)
    }

    fn new(code: impl Into<String>, source: ScanSource) -> Self {
        Self {
            code: code.into(),
            source,
            observed_at: Utc::now(),
        }
    }
}

/// Operator-entered context collected before a confirmed submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationDraft {
    pub code: String,
    pub reason: Option<Reason>,
    pub plate_number: Option<String>,
    /// The "approved by" checkbox on check-out.
    pub approved: bool,
    pub approved_by: Option<String>,
}

impl ConfirmationDraft {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: None,
            plate_number: None,
            approved: false,
            approved_by: None,
        }
    }

    pub fn apply(&mut self, patch: DraftPatch) {
        if let Some(reason) = patch.reason {
            self.reason = Some(reason);
        }
        if let Some(plate_number) = patch.plate_number {
            self.plate_number = Some(plate_number);
        }
        if let Some(approved) = patch.approved {
            self.approved = approved;
        }
        if let Some(approved_by) = patch.approved_by {
            self.approved_by = Some(approved_by);
        }
    }

    pub fn metadata(
        &self,
        mode: ScanMode,
        rule: ApprovalRule,
    ) -> Result<ScanMetadata, LocalValidationError> {
        let reason = self.reason.ok_or(LocalValidationError::MissingReason)?;

        let approver_required = match (mode, rule) {
            (ScanMode::CheckIn, _) | (ScanMode::CheckOut, ApprovalRule::Never) => false,
            (ScanMode::CheckOut, ApprovalRule::Always) => true,
            (ScanMode::CheckOut, ApprovalRule::WhenFlagged) => self.approved,
        };

        let approved_by = if approver_required {
            Some(non_blank(self.approved_by.as_deref()).ok_or(LocalValidationError::MissingApprover)?)
        } else {
            None
        };

        Ok(ScanMetadata {
            reason,
            approved_by,
            plate_number: non_blank(self.plate_number.as_deref()),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Partial edit of the draft form; absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftPatch {
    pub reason: Option<Reason>,
    pub plate_number: Option<String>,
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Error, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LocalValidationError {
    #[error("Please enter a QR code")]
    EmptyManualCode,
    #[error("Please select a reason")]
    MissingReason,
    #[error("Please enter who approved this check-out")]
    MissingApprover,
}

impl LocalValidationError {
    /// Form field the error is shown against.
    pub fn field(&self) -> &'static str {
        match self {
            LocalValidationError::EmptyManualCode => "manualCode",
            LocalValidationError::MissingReason => "reason",
            LocalValidationError::MissingApprover => "approvedBy",
        }
    }
}

/// A submission that has been handed to the API. The ticket identifies the
/// completion that belongs to it; the mode is the one it was issued under.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub ticket: Uuid,
    pub code: String,
    pub mode: ScanMode,
    pub metadata: ScanMetadata,
    pub confirmed: bool,
    pub issued_at: DateTime<Utc>,
}

impl Submission {
    fn new(code: String, mode: ScanMode, metadata: ScanMetadata, confirmed: bool) -> Self {
        Self {
            ticket: Uuid::new_v4(),
            code,
            mode,
            metadata,
            confirmed,
            issued_at: Utc::now(),
        }
    }

    pub fn request(&self) -> ScanRequest {
        ScanRequest {
            code: self.code.clone(),
            mode: self.mode,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ScanPhase {
    Idle,
    AwaitingConfirmation { draft: ConfirmationDraft },
    Submitting { submission: Submission },
    Cooldown { remaining: u32 },
}

impl Default for ScanPhase {
    fn default() -> Self {
        ScanPhase::Idle
    }
}

#[derive(Debug)]
pub enum SessionInput {
    Scan(ScanEvent),
    SelectMode(ScanMode),
    UpdateDraft(DraftPatch),
    ConfirmSubmit,
    CancelConfirmation,
    SubmissionSucceeded { ticket: Uuid, result: ScanResult },
    SubmissionFailed { ticket: Uuid, error: SubmissionError },
    Tick,
    TearDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Submit(Submission),
    StartCooldown,
    StopCooldown,
    Notify(Notification),
}

/// What a call to `ScanSession::apply` did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// Whether the observable session state moved.
    pub changed: bool,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn submission(&self) -> Option<&Submission> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::Submit(submission) => Some(submission),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanSession {
    phase: ScanPhase,
    mode: ScanMode,
    last_accepted_code: Option<String>,
    last_result: Option<ScanResult>,
    last_error: Option<String>,
    validation_error: Option<LocalValidationError>,
    closed: bool,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &ScanPhase {
        &self.phase
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn last_accepted_code(&self) -> Option<&str> {
        self.last_accepted_code.as_deref()
    }

    pub fn last_result(&self) -> Option<&ScanResult> {
        self.last_result.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn validation_error(&self) -> Option<LocalValidationError> {
        self.validation_error
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn cooldown_remaining(&self) -> u32 {
        match self.phase {
            ScanPhase::Cooldown { remaining } => remaining,
            _ => 0,
        }
    }

    pub fn draft(&self) -> Option<&ConfirmationDraft> {
        match &self.phase {
            ScanPhase::AwaitingConfirmation { draft } => Some(draft),
            _ => None,
        }
    }

    pub fn apply(&mut self, input: SessionInput, policy: &ScanPolicy) -> Transition {
        if self.closed {
            return Transition::unchanged();
        }

        match input {
            SessionInput::Scan(event) => self.on_scan(event, policy),
            SessionInput::SelectMode(mode) => self.on_select_mode(mode),
            SessionInput::UpdateDraft(patch) => self.on_update_draft(patch),
            SessionInput::ConfirmSubmit => self.on_confirm(policy),
            SessionInput::CancelConfirmation => self.on_cancel(),
            SessionInput::SubmissionSucceeded { ticket, result } => {
                self.on_succeeded(ticket, result, policy)
            }
            SessionInput::SubmissionFailed { ticket, error } => self.on_failed(ticket, error),
            SessionInput::Tick => self.on_tick(),
            SessionInput::TearDown => {
                self.closed = true;
                self.phase = ScanPhase::Idle;
                Transition::unchanged().with(Effect::StopCooldown)
            }
        }
    }

    fn on_scan(&mut self, event: ScanEvent, policy: &ScanPolicy) -> Transition {
        // Only typed input is trimmed; decoded payloads are taken as-is.
        let code = match event.source {
            ScanSource::Manual => event.code.trim(),
            ScanSource::Camera => event.code.as_str(),
        };
        if code.trim().is_empty() {
            return match event.source {
                ScanSource::Manual => {
                    self.validation_error = Some(LocalValidationError::EmptyManualCode);
                    Transition::changed()
                }
                ScanSource::Camera => Transition::unchanged(),
            };
        }

        if !matches!(self.phase, ScanPhase::Idle) {
            return Transition::unchanged();
        }
        if self.last_accepted_code.as_deref() == Some(code) {
            return Transition::unchanged();
        }

        self.validation_error = None;

        match policy.submit {
            SubmitPolicy::Immediate => {
                let submission =
                    Submission::new(code.to_string(), self.mode, ScanMetadata::attendance(), false);
                self.begin_submission(submission)
            }
            SubmitPolicy::ConfirmFirst => {
                self.phase = ScanPhase::AwaitingConfirmation {
                    draft: ConfirmationDraft::new(code),
                };
                Transition::changed()
            }
        }
    }

    fn begin_submission(&mut self, submission: Submission) -> Transition {
        self.last_error = None;
        self.phase = ScanPhase::Submitting {
            submission: submission.clone(),
        };
        Transition::changed().with(Effect::Submit(submission))
    }

    fn on_select_mode(&mut self, mode: ScanMode) -> Transition {
        if mode == self.mode {
            return Transition::unchanged();
        }
        self.mode = mode;
        self.last_result = None;
        Transition::changed()
    }

    fn on_update_draft(&mut self, patch: DraftPatch) -> Transition {
        let ScanPhase::AwaitingConfirmation { draft } = &mut self.phase else {
            return Transition::unchanged();
        };
        draft.apply(patch);
        self.validation_error = None;
        Transition::changed()
    }

    fn on_confirm(&mut self, policy: &ScanPolicy) -> Transition {
        let ScanPhase::AwaitingConfirmation { draft } = &self.phase else {
            return Transition::unchanged();
        };

        match draft.metadata(self.mode, policy.approval) {
            Ok(metadata) => {
                let submission = Submission::new(draft.code.clone(), self.mode, metadata, true);
                self.validation_error = None;
                self.begin_submission(submission)
            }
            Err(err) => {
                self.validation_error = Some(err);
                Transition::changed()
            }
        }
    }

    fn on_cancel(&mut self) -> Transition {
        if !matches!(self.phase, ScanPhase::AwaitingConfirmation { .. }) {
            return Transition::unchanged();
        }
        self.phase = ScanPhase::Idle;
        self.validation_error = None;
        Transition::changed()
    }

    /// Takes the in-flight submission if `ticket` belongs to it.
    fn take_in_flight(&mut self, ticket: Uuid) -> Option<Submission> {
        let in_flight = matches!(
            &self.phase,
            ScanPhase::Submitting { submission } if submission.ticket == ticket
        );
        if !in_flight {
            return None;
        }

        match std::mem::take(&mut self.phase) {
            ScanPhase::Submitting { submission } => Some(submission),
            _ => None,
        }
    }

    fn on_succeeded(&mut self, ticket: Uuid, result: ScanResult, policy: &ScanPolicy) -> Transition {
        let Some(submission) = self.take_in_flight(ticket) else {
            return Transition::unchanged();
        };

        if submission.mode != self.mode {
            // Issued under the other mode; the result no longer describes
            // what the operator is looking at.
            return Transition::changed();
        }

        let message = match submission.mode {
            ScanMode::CheckIn => format!("Check-in recorded for {}", result.subject.name),
            ScanMode::CheckOut => format!("Check-out recorded for {}", result.subject.name),
        };

        self.last_result = Some(result);
        let notify = Effect::Notify(Notification::success(message));

        let remaining = policy.cooldown_for(submission.confirmed);
        if remaining == 0 {
            // No hold: re-armed at once, the result stays on screen.
            self.last_accepted_code = None;
            return Transition::changed().with(notify);
        }

        self.last_accepted_code = Some(submission.code);
        self.phase = ScanPhase::Cooldown { remaining };

        Transition::changed().with(notify).with(Effect::StartCooldown)
    }

    fn on_failed(&mut self, ticket: Uuid, error: SubmissionError) -> Transition {
        let Some(submission) = self.take_in_flight(ticket) else {
            return Transition::unchanged();
        };

        if submission.mode != self.mode {
            return Transition::changed();
        }

        self.last_error = Some(error.message().to_string());
        Transition::changed().with(Effect::Notify(Notification::error(error.message())))
    }

    fn on_tick(&mut self) -> Transition {
        let ScanPhase::Cooldown { remaining } = self.phase else {
            return Transition::unchanged().with(Effect::StopCooldown);
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.phase = ScanPhase::Cooldown { remaining };
            return Transition::changed();
        }

        self.phase = ScanPhase::Idle;
        self.last_accepted_code = None;
        self.last_result = None;
        Transition::changed().with(Effect::StopCooldown)
    }
}
