//! VM configuration.

use relay_compiler::CompilerConfig;

/// Default call depth limit.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

/// Knobs for the virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum nested call depth before `RecursionError`.
    pub recursion_limit: usize,
    /// Close suspended generators when their last reference is dropped.
    pub close_on_drop: bool,
    /// Settings for compiling loaded modules.
    pub compiler: CompilerConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            close_on_drop: true,
            compiler: CompilerConfig::default(),
        }
    }
}

impl VmConfig {
    /// Set the call depth limit.
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Enable or disable close-on-drop.
    #[must_use]
    pub fn with_close_on_drop(mut self, enabled: bool) -> Self {
        self.close_on_drop = enabled;
        self
    }

    /// Replace the compiler settings.
    #[must_use]
    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.recursion_limit, 1000);
        assert!(config.close_on_drop);
        assert_eq!(config.compiler.max_registers, 256);
    }

    #[test]
    fn test_builders() {
        let config = VmConfig::default()
            .with_recursion_limit(10)
            .with_close_on_drop(false)
            .with_compiler(CompilerConfig::default().with_filename("t.py"));
        assert_eq!(config.recursion_limit, 10);
        assert!(!config.close_on_drop);
        assert_eq!(&*config.compiler.filename, "t.py");
    }
}
