use serde::Serialize;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ISSUE CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ISSUE_MISSING_ASSET: &str = "VT-ASSET";
pub const ISSUE_INVALID_PROP: &str = "VT-PROP";
pub const ISSUE_COMPUTED: &str = "VT-COMPUTED";
pub const ISSUE_FILTER: &str = "VT-FILTER";
pub const ISSUE_STRUCTURE: &str = "VT-STRUCT";

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD ISSUES
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything that can degrade a build. None of these abort tree
/// construction: they are logged, recorded and the build moves on.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BuildIssue {
    #[error("There is no partial \"{name}\"")]
    MissingPartial { name: String },

    #[error("Failed to resolve component: \"{name}\"{}", .reason.as_ref().map(|r| format!(". Reason: {}", r)).unwrap_or_default())]
    UnresolvedComponent {
        name: String,
        reason: Option<String>,
    },

    #[error("There is no filter \"{name}\"")]
    MissingFilter { name: String },

    #[error("The \"data\" option type is not valid")]
    InvalidDataOption,

    #[error("Missing required prop: {prop}")]
    MissingRequiredProp { prop: String },

    #[error("Invalid prop: type check failed for \"{prop}\". Expected {expected}, got {got}")]
    PropTypeMismatch {
        prop: String,
        expected: String,
        got: String,
    },

    #[error("Invalid prop: custom validator check failed for \"{prop}\"")]
    PropValidatorFailed { prop: String },

    #[error("Computed property \"{name}\" compilation error: {error}")]
    ComputedFailed { name: String, error: String },

    #[error("Filter \"{filter}\" failed: {error}")]
    FilterFailed { filter: String, error: String },

    #[error("No element in instance")]
    MissingRootElement,

    #[error("There is no root template. Can't start rendering")]
    MissingRootTemplate,

    #[error("Deviance in instances ready check detected (pending count {count})")]
    ReadyCountDeviance { count: i64 },

    #[error("Native tag \"{tag}\" matched component name \"{name}\"")]
    NativeTagMatchedComponent { tag: String, name: String },

    #[error("The activate hook can't be fired on loop instances")]
    ActivateOnLoopInstance,

    #[error("Something went wrong while building child instances: {detail}")]
    ChildAccounting { detail: String },

    #[error("{count} async component(s) never resolved")]
    StalledAsyncComponents { count: usize },
}

impl BuildIssue {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingPartial { .. }
            | Self::UnresolvedComponent { .. }
            | Self::MissingFilter { .. }
            | Self::NativeTagMatchedComponent { .. } => ISSUE_MISSING_ASSET,
            Self::MissingRequiredProp { .. }
            | Self::PropTypeMismatch { .. }
            | Self::PropValidatorFailed { .. } => ISSUE_INVALID_PROP,
            Self::ComputedFailed { .. } => ISSUE_COMPUTED,
            Self::FilterFailed { .. } => ISSUE_FILTER,
            Self::InvalidDataOption
            | Self::MissingRootElement
            | Self::MissingRootTemplate
            | Self::ReadyCountDeviance { .. }
            | Self::ActivateOnLoopInstance
            | Self::ChildAccounting { .. }
            | Self::StalledAsyncComponents { .. } => ISSUE_STRUCTURE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Warn,
    Error,
}

/// A recorded issue together with the instance context it was raised in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub level: Level,
    pub code: &'static str,
    pub issue: BuildIssue,
    pub context: String,
}
