use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub const IMMEDIATE_COOLDOWN_SECS: u32 = 2;
pub const CONFIRMATION_COOLDOWN_SECS: u32 = 3;
/// Staff and visitor stations hold the result a little longer.
pub const TRANSACTION_COOLDOWN_SECS: u32 = 3;

/// Physical form factor of the scan station.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Deployment {
    Handheld,
    Desk,
}

impl Default for Deployment {
    fn default() -> Self {
        Deployment::Desk
    }
}

impl FromStr for Deployment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "handheld" | "mobile" => Ok(Deployment::Handheld),
            "desk" | "desktop" => Ok(Deployment::Desk),
            other => Err(format!("unknown deployment '{other}'")),
        }
    }
}

/// Which backend scan endpoint the station posts to. Admin covers the
/// TUP and security desks; staff and visitor stations record plain
/// transactions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanRoute {
    Admin,
    Staff,
    Visitor,
}

impl Default for ScanRoute {
    fn default() -> Self {
        ScanRoute::Admin
    }
}

impl ScanRoute {
    pub fn endpoint(&self) -> &'static str {
        match self {
            ScanRoute::Admin => "logs/scan",
            ScanRoute::Staff => "logs/staff/scan",
            ScanRoute::Visitor => "logs/user/scan",
        }
    }

    pub fn immediate_cooldown_secs(&self) -> u32 {
        match self {
            ScanRoute::Admin => IMMEDIATE_COOLDOWN_SECS,
            ScanRoute::Staff | ScanRoute::Visitor => TRANSACTION_COOLDOWN_SECS,
        }
    }
}

impl FromStr for ScanRoute {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" | "tup" | "security" => Ok(ScanRoute::Admin),
            "staff" => Ok(ScanRoute::Staff),
            "visitor" | "user" | "student" => Ok(ScanRoute::Visitor),
            other => Err(format!("unknown scan route '{other}'")),
        }
    }
}

impl fmt::Display for ScanRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanRoute::Admin => "admin",
            ScanRoute::Staff => "staff",
            ScanRoute::Visitor => "visitor",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SubmitPolicy {
    /// Send the decoded code straight to the backend.
    Immediate,
    /// Open a confirmation draft and wait for the operator.
    ConfirmFirst,
}

impl SubmitPolicy {
    /// Handheld stations never prompt. Desk stations prompt only on the
    /// admin route, where reason and approver are recorded.
    pub fn for_station(deployment: Deployment, route: ScanRoute) -> Self {
        match (deployment, route) {
            (Deployment::Handheld, _) => SubmitPolicy::Immediate,
            (Deployment::Desk, ScanRoute::Admin) => SubmitPolicy::ConfirmFirst,
            (Deployment::Desk, ScanRoute::Staff | ScanRoute::Visitor) => SubmitPolicy::Immediate,
        }
    }
}

/// When `approvedBy` must accompany a check-out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalRule {
    /// Only when the operator ticks the "approved" flag on the draft.
    WhenFlagged,
    /// On every check-out.
    Always,
    /// Never collected.
    Never,
}

impl Default for ApprovalRule {
    fn default() -> Self {
        ApprovalRule::WhenFlagged
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanPolicy {
    pub submit: SubmitPolicy,
    pub approval: ApprovalRule,
    immediate_cooldown_secs: u32,
    confirmation_cooldown_secs: u32,
}

impl ScanPolicy {
    pub fn new(submit: SubmitPolicy) -> Self {
        Self {
            submit,
            approval: ApprovalRule::default(),
            immediate_cooldown_secs: IMMEDIATE_COOLDOWN_SECS,
            confirmation_cooldown_secs: CONFIRMATION_COOLDOWN_SECS,
        }
    }

    pub fn for_station(deployment: Deployment, route: ScanRoute) -> Self {
        Self::new(SubmitPolicy::for_station(deployment, route))
            .with_cooldowns(route.immediate_cooldown_secs(), CONFIRMATION_COOLDOWN_SECS)
    }

    pub fn with_approval(mut self, approval: ApprovalRule) -> Self {
        self.approval = approval;
        self
    }

    /// A zero cooldown re-arms the session as soon as the result lands.
    pub fn with_cooldowns(mut self, immediate_secs: u32, confirmation_secs: u32) -> Self {
        self.immediate_cooldown_secs = immediate_secs;
        self.confirmation_cooldown_secs = confirmation_secs;
        self
    }

    pub fn cooldown_for(&self, confirmed: bool) -> u32 {
        if confirmed {
            self.confirmation_cooldown_secs
        } else {
            self.immediate_cooldown_secs
        }
    }
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::for_station(Deployment::default(), ScanRoute::default())
    }
}
