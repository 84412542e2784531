use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::{
    decoder::{CameraConfig, Facing, ScanRegion},
    scan::{
        policy::CONFIRMATION_COOLDOWN_SECS,
        ApprovalRule, Deployment, ScanPolicy, ScanRoute, SubmitPolicy,
    },
};

pub const API_URL_ENV: &str = "GATESCAN_API_URL";
pub const DEPLOYMENT_ENV: &str = "GATESCAN_DEPLOYMENT";
pub const ROUTE_ENV: &str = "GATESCAN_ROUTE";
pub const DEBUG_ENV: &str = "GATESCAN_DEBUG";

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerSettings {
    pub api_base_url: String,
    pub deployment: Deployment,
    pub route: ScanRoute,
    /// Forces a submit policy regardless of deployment and route.
    pub policy_override: Option<SubmitPolicy>,
    /// Unset means the route's own default.
    pub immediate_cooldown_secs: Option<u32>,
    pub confirmation_cooldown_secs: u32,
    pub approval_rule: ApprovalRule,
    pub request_timeout_secs: u64,
    pub facing: Facing,
    pub region: ScanRegion,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            deployment: Deployment::default(),
            route: ScanRoute::default(),
            policy_override: None,
            immediate_cooldown_secs: None,
            confirmation_cooldown_secs: CONFIRMATION_COOLDOWN_SECS,
            approval_rule: ApprovalRule::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            facing: Facing::default(),
            region: ScanRegion::default(),
        }
    }
}

impl ScannerSettings {
    pub fn scan_policy(&self) -> ScanPolicy {
        let submit = self
            .policy_override
            .unwrap_or_else(|| SubmitPolicy::for_station(self.deployment, self.route));
        let immediate = self
            .immediate_cooldown_secs
            .unwrap_or_else(|| self.route.immediate_cooldown_secs());

        ScanPolicy::new(submit)
            .with_cooldowns(immediate, self.confirmation_cooldown_secs)
            .with_approval(self.approval_rule)
    }

    pub fn camera(&self) -> CameraConfig {
        CameraConfig {
            facing: self.facing,
            region: self.region.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Applies environment overrides. Unparseable values are logged and
    /// skipped so a typo never stops the station from booting.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }

        if let Some(raw) = lookup(DEPLOYMENT_ENV) {
            match raw.parse() {
                Ok(deployment) => self.deployment = deployment,
                Err(err) => log::warn!("ignoring {DEPLOYMENT_ENV}: {err}"),
            }
        }

        if let Some(raw) = lookup(ROUTE_ENV) {
            match raw.parse() {
                Ok(route) => self.route = route,
                Err(err) => log::warn!("ignoring {ROUTE_ENV}: {err}"),
            }
        }
    }
}

/// True when `GATESCAN_DEBUG` is set to anything but `0`/`false`.
pub fn verbose_logging() -> bool {
    flag_enabled(std::env::var(DEBUG_ENV).ok())
}

fn flag_enabled(value: Option<String>) -> bool {
    match value {
        Some(raw) => !matches!(raw.trim().to_ascii_lowercase().as_str(), "" | "0" | "false"),
        None => false,
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScannerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::with_lookup(path, |key| std::env::var(key).ok())
    }

    fn with_lookup(path: PathBuf, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("settings at {} unreadable ({err}); using defaults", path.display());
                ScannerSettings::default()
            })
        } else {
            ScannerSettings::default()
        };
        data.apply_overrides(lookup);

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> ScannerSettings {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, settings: ScannerSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: ScannerSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", self.path.display()))?;
        *self.data.write().unwrap() = data;
        Ok(())
    }

    fn persist(&self, data: &ScannerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::with_lookup(dir.path().join("settings.json"), no_env).unwrap();

        let settings = store.settings();
        assert_eq!(settings, ScannerSettings::default());
        assert_eq!(settings.scan_policy().submit, SubmitPolicy::ConfirmFirst);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::with_lookup(path, no_env).unwrap();
        assert_eq!(store.settings(), ScannerSettings::default());
    }

    #[test]
    fn update_persists_and_reload_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::with_lookup(path.clone(), no_env).unwrap();

        let mut settings = store.settings();
        settings.deployment = Deployment::Handheld;
        settings.route = ScanRoute::Visitor;
        settings.immediate_cooldown_secs = Some(5);
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::with_lookup(path.clone(), no_env).unwrap();
        assert_eq!(reopened.settings(), settings);

        let mut edited = settings.clone();
        edited.api_base_url = "https://gate.example.edu/api".into();
        fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();
        store.reload().unwrap();
        assert_eq!(store.settings().api_base_url, "https://gate.example.edu/api");
    }

    #[test]
    fn partial_file_fills_remaining_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "route": "staff", "facing": "user" }"#).unwrap();

        let settings = SettingsStore::with_lookup(path, no_env).unwrap().settings();
        assert_eq!(settings.route, ScanRoute::Staff);
        assert_eq!(settings.facing, Facing::User);
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(settings.region, ScanRegion::default());
    }

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (API_URL_ENV, " https://override.example/api "),
            (DEPLOYMENT_ENV, "mobile"),
            (ROUTE_ENV, "nonsense"),
        ]);

        let store = SettingsStore::with_lookup(dir.path().join("settings.json"), |key| {
            env.get(key).map(|value| value.to_string())
        })
        .unwrap();

        let settings = store.settings();
        assert_eq!(settings.api_base_url, "https://override.example/api");
        assert_eq!(settings.deployment, Deployment::Handheld);
        assert_eq!(settings.route, ScanRoute::Admin);
        assert_eq!(settings.scan_policy().submit, SubmitPolicy::Immediate);
    }

    #[test]
    fn policy_override_and_cooldowns_shape_the_policy() {
        let settings = ScannerSettings {
            policy_override: Some(SubmitPolicy::Immediate),
            immediate_cooldown_secs: Some(0),
            confirmation_cooldown_secs: 7,
            approval_rule: ApprovalRule::Always,
            ..ScannerSettings::default()
        };

        let policy = settings.scan_policy();
        assert_eq!(policy.submit, SubmitPolicy::Immediate);
        assert_eq!(policy.approval, ApprovalRule::Always);
        assert_eq!(policy.cooldown_for(false), 0);
        assert_eq!(policy.cooldown_for(true), 7);
    }

    #[test]
    fn unset_immediate_cooldown_follows_the_route() {
        let admin = ScannerSettings::default();
        assert_eq!(admin.scan_policy().cooldown_for(false), 2);

        let staff = ScannerSettings {
            deployment: Deployment::Handheld,
            route: ScanRoute::Staff,
            ..ScannerSettings::default()
        };
        assert_eq!(staff.scan_policy().cooldown_for(false), 3);

        let pinned = ScannerSettings {
            immediate_cooldown_secs: Some(1),
            ..staff
        };
        assert_eq!(pinned.scan_policy().cooldown_for(false), 1);
    }

    #[test]
    fn debug_flag_parsing() {
        assert!(!flag_enabled(None));
        assert!(!flag_enabled(Some("0".into())));
        assert!(!flag_enabled(Some("False".into())));
        assert!(flag_enabled(Some("1".into())));
        assert!(flag_enabled(Some("yes".into())));
    }
}
