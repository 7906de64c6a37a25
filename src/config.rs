use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::actions::ActionSpec;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub allow_commands: bool,
}

/// Global fallbacks applied to every gesture that does not override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_smoothing() -> f32 {
    0.35
}
fn default_hold_ms() -> u64 {
    200
}
fn default_cooldown_ms() -> u64 {
    650
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            smoothing: default_smoothing(),
            hold_ms: default_hold_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Single,
    Hold,
    Toggle,
    Analog,
}

/// One metric, or two combined into a derived virtual metric (min of both,
/// i.e. both must be raised — the combined-eyebrow style trigger).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MetricSource {
    Single(String),
    Combined([String; 2]),
}

impl MetricSource {
    pub fn names(&self) -> &[String] {
        match self {
            MetricSource::Single(m) => std::slice::from_ref(m),
            MetricSource::Combined(ms) => ms.as_slice(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GestureConfig {
    pub id: String,
    pub metric: MetricSource,
    pub threshold: f32,
    #[serde(default)]
    pub deadzone: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    pub mode: TriggerMode,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub steps: Vec<String>,
    pub timeout_ms: u64,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MorseConfig {
    pub gesture: String,
    /// Holds shorter than this are S, the rest L.
    pub long_ms: u64,
    /// Max gap between symbols of one sequence.
    pub gap_ms: u64,
    /// Silence after which the accumulated sequence is resolved.
    pub end_ms: u64,
    /// Pattern over {S,L} -> action binding, e.g. "SSL" = "key:ENTER".
    pub patterns: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub meta: Meta,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, rename = "gesture")]
    pub gestures: Vec<GestureConfig>,
    #[serde(default, rename = "chain")]
    pub chains: Vec<ChainConfig>,
    #[serde(default, rename = "morse")]
    pub morse: Vec<MorseConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate gesture id '{0}'")]
    DuplicateGesture(String),
    #[error("gesture '{gesture}' has invalid threshold/deadzone ({threshold}, {deadzone})")]
    BadThreshold {
        gesture: String,
        threshold: f32,
        deadzone: f32,
    },
    #[error("gesture '{0}' has smoothing outside [0, 1]")]
    BadSmoothing(String),
    #[error("{referer} references unknown gesture '{gesture}'")]
    UnknownGesture { referer: String, gesture: String },
    #[error("chain needs at least two steps")]
    ShortChain,
    #[error("{what} must be a positive duration")]
    ZeroTimeout { what: String },
    #[error("morse timeouts for '{0}' must satisfy gap_ms <= end_ms")]
    BadMorseTimeouts(String),
    #[error("gesture '{0}' is a morse source and cannot be used elsewhere")]
    MorseConflict(String),
    #[error("morse pattern '{0}' must be a non-empty string over {{S, L}}")]
    BadPattern(String),
    #[error("binding '{binding}' is invalid: {reason}")]
    BadAction { binding: String, reason: String },
    #[error("binding '{0}' uses cmd: but allow_commands = false")]
    CommandsNotAllowed(String),
    #[error("gesture '{0}' is analog and needs an axis: binding")]
    AnalogNeedsAxis(String),
    #[error("axis: binding on '{0}' requires analog mode")]
    AxisNeedsAnalog(String),
}

impl Profile {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for g in &self.gestures {
            if g.id.trim().is_empty() || !ids.insert(g.id.as_str()) {
                return Err(ConfigError::DuplicateGesture(g.id.clone()));
            }
            if !(0.0..=1.0).contains(&g.threshold)
                || g.threshold <= 0.0
                || g.deadzone < 0.0
                || g.deadzone > g.threshold
            {
                return Err(ConfigError::BadThreshold {
                    gesture: g.id.clone(),
                    threshold: g.threshold,
                    deadzone: g.deadzone,
                });
            }
            if let Some(s) = g.smoothing {
                if !(0.0..=1.0).contains(&s) {
                    return Err(ConfigError::BadSmoothing(g.id.clone()));
                }
            }
            let spec = parse_binding(&g.action, self.meta.allow_commands)?;
            match (g.mode, &spec) {
                (TriggerMode::Analog, ActionSpec::PadAxis { .. }) => {}
                (TriggerMode::Analog, _) => {
                    return Err(ConfigError::AnalogNeedsAxis(g.id.clone()));
                }
                (_, ActionSpec::PadAxis { .. }) => {
                    return Err(ConfigError::AxisNeedsAnalog(g.id.clone()));
                }
                _ => {}
            }
        }
        if !(0.0..=1.0).contains(&self.defaults.smoothing) {
            return Err(ConfigError::BadSmoothing("defaults".into()));
        }

        let morse_sources: HashSet<&str> = self.morse.iter().map(|m| m.gesture.as_str()).collect();

        for c in &self.chains {
            if c.steps.len() < 2 {
                return Err(ConfigError::ShortChain);
            }
            if c.timeout_ms == 0 {
                return Err(ConfigError::ZeroTimeout {
                    what: "chain timeout_ms".into(),
                });
            }
            for step in &c.steps {
                if !ids.contains(step.as_str()) {
                    return Err(ConfigError::UnknownGesture {
                        referer: "chain".into(),
                        gesture: step.clone(),
                    });
                }
                if morse_sources.contains(step.as_str()) {
                    return Err(ConfigError::MorseConflict(step.clone()));
                }
            }
            let spec = parse_binding(&c.action, self.meta.allow_commands)?;
            if matches!(spec, ActionSpec::PadAxis { .. }) {
                return Err(ConfigError::AxisNeedsAnalog("chain".into()));
            }
        }

        let mut seen_sources = HashSet::new();
        for m in &self.morse {
            if !ids.contains(m.gesture.as_str()) {
                return Err(ConfigError::UnknownGesture {
                    referer: "morse".into(),
                    gesture: m.gesture.clone(),
                });
            }
            if !seen_sources.insert(m.gesture.as_str()) {
                return Err(ConfigError::MorseConflict(m.gesture.clone()));
            }
            if m.long_ms == 0 || m.gap_ms == 0 || m.end_ms == 0 {
                return Err(ConfigError::ZeroTimeout {
                    what: format!("morse timeouts for '{}'", m.gesture),
                });
            }
            if m.gap_ms > m.end_ms {
                return Err(ConfigError::BadMorseTimeouts(m.gesture.clone()));
            }
            for (pattern, binding) in &m.patterns {
                if pattern.is_empty() || !pattern.chars().all(|c| c == 'S' || c == 'L') {
                    return Err(ConfigError::BadPattern(pattern.clone()));
                }
                let spec = parse_binding(binding, self.meta.allow_commands)?;
                if matches!(spec, ActionSpec::PadAxis { .. }) {
                    return Err(ConfigError::AxisNeedsAnalog("morse".into()));
                }
            }
        }
        Ok(())
    }
}

fn parse_binding(binding: &str, allow_commands: bool) -> std::result::Result<ActionSpec, ConfigError> {
    let spec = ActionSpec::parse(binding).map_err(|reason| ConfigError::BadAction {
        binding: binding.to_string(),
        reason,
    })?;
    if matches!(spec, ActionSpec::Command { .. }) && !allow_commands {
        return Err(ConfigError::CommandsNotAllowed(binding.to_string()));
    }
    Ok(spec)
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> PathBuf {
    let home = UserDirs::new().unwrap().home_dir().to_path_buf();
    home.join(".config").join("facectl")
}

fn profiles_dir() -> PathBuf {
    config_dir().join("profiles")
}

fn active_ptr_path() -> PathBuf {
    config_dir().join("active")
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir();
        let profdir = profiles_dir();
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = active_ptr_path();
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = Self::load_profile(&active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// Reload the active profile; keeps the previous one on error.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = Self::load_profile(&self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = Self::load_profile(name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    fn load_profile(name: &str) -> Result<Profile> {
        let path = profiles_dir().join(format!("{name}.toml"));
        let txt = fs::read_to_string(&path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let profile: Profile =
            toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
        profile
            .validate()
            .map_err(|e| anyhow!("invalid profile '{name}': {e}"))?;
        Ok(profile)
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "metrics_socket": crate::ipc::runtime::metrics_socket_path(),
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:") {
                if line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
                {
                    return true;
                }
            }
        }
    }
    false
}
