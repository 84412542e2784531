#[cfg(feature = "desktop")]
pub mod commands;
pub mod controller;
pub mod events;
pub mod policy;
pub mod state;

pub use controller::{ControllerError, ScanController, ScanSnapshot};
pub use events::{EventSink, Notification, NotificationLevel, SessionEvent};
pub use policy::{ApprovalRule, Deployment, ScanPolicy, ScanRoute, SubmitPolicy};
pub use state::{
    ConfirmationDraft, DraftPatch, LocalValidationError, Reason, ScanEvent, ScanMode, ScanPhase,
    ScanSession, ScanSource,
};
