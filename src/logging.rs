//! Diagnostics plumbing.
//!
//! Every issue raised while building goes two ways: out through `tracing`
//! with a `vm` field describing the instance, and into the session's
//! diagnostics list so callers can inspect what degraded.

use std::fmt;

use tracing::{debug, error, warn};

use crate::error::{BuildIssue, Diagnostic, Level};
use crate::instance::InstanceKey;
use crate::renderer::Session;

/// Instance description attached to every log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub component: Option<String>,
    pub kind: &'static str,
    /// Component names from the root down to the instance.
    pub path: Vec<String>,
}

impl LogContext {
    pub fn detached() -> Self {
        Self {
            component: None,
            kind: "none",
            path: vec![],
        }
    }

    pub(crate) fn of(session: &Session, key: InstanceKey) -> Self {
        let Some(instance) = session.instances.get(key) else {
            return Self::detached();
        };

        let mut path = vec![];
        let mut cursor = Some(key);
        while let Some(k) = cursor {
            let Some(inst) = session.instances.get(k) else {
                break;
            };
            if let Some(name) = &inst.component_name {
                path.push(name.clone());
            }
            cursor = inst.state.parent;
        }
        path.reverse();

        Self {
            component: instance.component_name.clone(),
            kind: instance.kind().as_str(),
            path,
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.kind,
            self.component.as_deref().unwrap_or("<anonymous>")
        )?;
        if !self.path.is_empty() {
            write!(f, " ({})", self.path.join(" > "))?;
        }
        Ok(())
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
/// Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

impl Session {
    pub(crate) fn report(&mut self, key: Option<InstanceKey>, level: Level, issue: BuildIssue) {
        let context = match key {
            Some(k) => LogContext::of(self, k),
            None => LogContext::detached(),
        };

        match level {
            Level::Debug => debug!(vm = %context, code = issue.code(), "{}", issue),
            Level::Warn => warn!(vm = %context, code = issue.code(), "{}", issue),
            Level::Error => error!(vm = %context, code = issue.code(), "{}", issue),
        }

        self.diagnostics.push(Diagnostic {
            level,
            code: issue.code(),
            issue,
            context: context.to_string(),
        });
    }
}
