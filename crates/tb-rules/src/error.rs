use std::sync::Arc;

use tb_compiler::CompileError;

/// Failures reported on the manager's error stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RulesError {
    /// The embedded dataset failed with nothing left to drop. The previous
    /// rules stay published.
    #[error("rule list '{name}' failed to compile with embedded tracker data: {source}")]
    FallbackCompileFailure {
        name: String,
        #[source]
        source: Arc<CompileError>,
    },
    #[error("compilation task for '{name}' did not finish: {reason}")]
    TaskFailed { name: String, reason: String },
}

impl RulesError {
    pub fn name(&self) -> &str {
        match self {
            RulesError::FallbackCompileFailure { name, .. } | RulesError::TaskFailed { name, .. } => name,
        }
    }
}
