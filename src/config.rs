use serde::{Deserialize, Serialize};

/// Process-wide render options, fixed when a [`crate::Renderer`] is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    /// `true`: an instance sees only the global registries plus its own.
    /// `false`: global, then the parent's merged registries, then its own.
    pub strict: bool,
    /// Whether a component's template replaces its host element by default.
    /// Components may override this with their own `replace` option.
    pub replace: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            strict: false,
            replace: true,
        }
    }
}

impl RenderConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_partial_json() {
        assert_eq!(
            RenderConfig::default(),
            RenderConfig {
                strict: false,
                replace: true
            }
        );
        let cfg = RenderConfig::from_json(r#"{"strict": true}"#).unwrap();
        assert!(cfg.strict);
        assert!(cfg.replace);
    }
}
