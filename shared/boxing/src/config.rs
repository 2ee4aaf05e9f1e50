use std::time::Duration;

/// Engine configuration. `cpu_only` mirrors the CPU-only test switch of the
/// surrounding system: every boxing must target a host placement and
/// accelerator placements fail fast.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxingConfig {
    pub cpu_only: bool,
    pub transport_timeout: Duration,
}

impl Default for BoxingConfig {
    fn default() -> Self {
        BoxingConfig {
            cpu_only: false,
            transport_timeout: Duration::from_secs(30),
        }
    }
}

impl BoxingConfig {
    /// Default configuration with `cpu_only` taken from the `WEFT_CPU_ONLY`
    /// environment variable.
    pub fn from_env() -> Self {
        let cpu_only = std::env::var("WEFT_CPU_ONLY")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        BoxingConfig {
            cpu_only,
            ..Default::default()
        }
    }
}
