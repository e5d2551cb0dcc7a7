//! Compiler configuration.

use crate::bytecode::MAX_RESUME_POINTS;
use std::sync::Arc;

/// Knobs for the compiler and the generator lowering pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Filename recorded in code objects.
    pub filename: Arc<str>,
    /// Register file size per function (at most 256).
    pub max_registers: usize,
    /// Suspension points allowed per generator.
    pub max_resume_points: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            filename: "<module>".into(),
            max_registers: 256,
            max_resume_points: MAX_RESUME_POINTS,
        }
    }
}

impl CompilerConfig {
    /// Set the filename.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<Arc<str>>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set the register limit; clamped to 256.
    #[must_use]
    pub fn with_max_registers(mut self, limit: usize) -> Self {
        self.max_registers = limit.min(256);
        self
    }

    /// Set the suspension point limit; clamped to the header capacity.
    #[must_use]
    pub fn with_max_resume_points(mut self, limit: u32) -> Self {
        self.max_resume_points = limit.min(MAX_RESUME_POINTS);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_clamped() {
        let config = CompilerConfig::default()
            .with_max_registers(10_000)
            .with_max_resume_points(u32::MAX);
        assert_eq!(config.max_registers, 256);
        assert_eq!(config.max_resume_points, MAX_RESUME_POINTS);
    }
}
