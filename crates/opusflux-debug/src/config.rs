//! Debugger settings loaded from `debug.toml`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::DebugError;
use crate::event::EventKind;
use crate::profile::TrackingProfile;

pub const DEFAULT_INTERNAL_TYPE_PREFIXES: [&str; 2] =
    ["System.Activities.Expressions", "flux.expressions"];

const MAX_HIGHLIGHT_DWELL_MS: u64 = 10_000;

/// Which correlated events may suspend the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakOn {
    #[default]
    Any,
    Entered,
}

impl BreakOn {
    fn parse(text: &str) -> Result<Self, DebugError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "entered" => Ok(Self::Entered),
            _ => Err(DebugError::InvalidConfig(
                format!("invalid debug.break_on '{text}'").into(),
            )),
        }
    }

    #[must_use]
    pub fn allows(self, kind: EventKind) -> bool {
        match self {
            Self::Any => true,
            Self::Entered => kind == EventKind::StateEntered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugSettings {
    pub highlight_dwell: Duration,
    pub abort_grace: Duration,
    pub break_on: BreakOn,
    pub internal_type_prefixes: Vec<SmolStr>,
    pub profile: TrackingProfile,
    pub log_level: SmolStr,
    pub log_capacity: usize,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            highlight_dwell: Duration::ZERO,
            abort_grace: Duration::from_millis(5000),
            break_on: BreakOn::Any,
            internal_type_prefixes: DEFAULT_INTERNAL_TYPE_PREFIXES
                .iter()
                .map(|prefix| SmolStr::new(prefix))
                .collect(),
            profile: TrackingProfile::default(),
            log_level: SmolStr::new("info"),
            log_capacity: 1000,
        }
    }
}

impl DebugSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DebugError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|err| DebugError::InvalidConfig(format!("debug.toml: {err}").into()))?;
        parse_debug_toml_from_text(&text, "debug.toml")
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DebugError> {
        parse_debug_toml_from_text(text, "debug.toml")
    }
}

pub fn validate_debug_toml_text(text: &str) -> Result<(), DebugError> {
    parse_debug_toml_from_text(text, "debug.toml").map(|_| ())
}

fn parse_debug_toml_from_text(text: &str, file_name: &str) -> Result<DebugSettings, DebugError> {
    let raw: DebugToml = toml::from_str(text)
        .map_err(|err| DebugError::InvalidConfig(format!("{file_name}: {err}").into()))?;
    raw.into_config()
        .map_err(|err| prefix_invalid_config(file_name, err))
}

fn prefix_invalid_config(file_name: &str, err: DebugError) -> DebugError {
    match err {
        DebugError::InvalidConfig(message) => {
            DebugError::InvalidConfig(format!("{file_name}: {message}").into())
        }
        other => other,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DebugToml {
    #[serde(default)]
    debug: DebugSection,
    #[serde(default)]
    tracking: TrackingSection,
    #[serde(default)]
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DebugSection {
    highlight_dwell_ms: Option<u64>,
    abort_grace_ms: Option<u64>,
    break_on: Option<String>,
    internal_type_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrackingSection {
    profile: Option<String>,
    activities: Option<Vec<String>>,
    states: Option<Vec<String>>,
    variables: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
    capacity: Option<usize>,
}

impl DebugToml {
    fn into_config(self) -> Result<DebugSettings, DebugError> {
        let defaults = DebugSettings::default();

        let highlight_dwell_ms = self.debug.highlight_dwell_ms.unwrap_or(0);
        if highlight_dwell_ms > MAX_HIGHLIGHT_DWELL_MS {
            return Err(DebugError::InvalidConfig(
                format!("debug.highlight_dwell_ms must be <= {MAX_HIGHLIGHT_DWELL_MS}").into(),
            ));
        }
        let abort_grace_ms = self.debug.abort_grace_ms.unwrap_or(5000);
        if abort_grace_ms == 0 {
            return Err(DebugError::InvalidConfig(
                "debug.abort_grace_ms must be >= 1".into(),
            ));
        }
        let break_on = match self.debug.break_on.as_deref() {
            Some(text) => BreakOn::parse(text)?,
            None => defaults.break_on,
        };
        let internal_type_prefixes = match self.debug.internal_type_prefixes {
            Some(prefixes) => {
                if prefixes.iter().any(|prefix| prefix.trim().is_empty()) {
                    return Err(DebugError::InvalidConfig(
                        "debug.internal_type_prefixes entries must not be empty".into(),
                    ));
                }
                prefixes.into_iter().map(SmolStr::from).collect()
            }
            None => defaults.internal_type_prefixes,
        };

        let profile = TrackingProfile {
            name: match self.tracking.profile {
                Some(name) if name.trim().is_empty() => {
                    return Err(DebugError::InvalidConfig(
                        "tracking.profile must not be empty".into(),
                    ));
                }
                Some(name) => SmolStr::from(name),
                None => defaults.profile.name,
            },
            activities: queries("tracking.activities", self.tracking.activities)?
                .unwrap_or(defaults.profile.activities),
            states: queries("tracking.states", self.tracking.states)?
                .unwrap_or(defaults.profile.states),
            variables: queries("tracking.variables", self.tracking.variables)?
                .unwrap_or(defaults.profile.variables),
        };

        let log_level = match self.log.level {
            Some(level) if level.trim().is_empty() => {
                return Err(DebugError::InvalidConfig(
                    "log.level must not be empty".into(),
                ));
            }
            Some(level) => SmolStr::from(level.trim()),
            None => defaults.log_level,
        };
        let log_capacity = self.log.capacity.unwrap_or(defaults.log_capacity);
        if log_capacity == 0 {
            return Err(DebugError::InvalidConfig("log.capacity must be >= 1".into()));
        }

        Ok(DebugSettings {
            highlight_dwell: Duration::from_millis(highlight_dwell_ms),
            abort_grace: Duration::from_millis(abort_grace_ms),
            break_on,
            internal_type_prefixes,
            profile,
            log_level,
            log_capacity,
        })
    }
}

fn queries(field: &str, values: Option<Vec<String>>) -> Result<Option<Vec<SmolStr>>, DebugError> {
    let Some(values) = values else {
        return Ok(None);
    };
    if values.is_empty() {
        return Err(DebugError::InvalidConfig(
            format!("{field} must list at least one query").into(),
        ));
    }
    Ok(Some(values.into_iter().map(SmolStr::from).collect()))
}
