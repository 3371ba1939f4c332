//! Kernel configuration.

use std::thread;
use std::time::Duration;

use crate::klog::Level;

/// Boot-time configuration for a [`Kernel`](crate::kernel::Kernel).
///
/// Defaults mirror the simulated hardware: a 2048-slot receive ring, a
/// 10 000-entry log buffer, and one worker per available core.
#[derive(Clone, Copy, Debug)]
pub struct KernelConfig {
    /// Worker threads in the execution engine.
    pub workers: usize,
    /// Park timeout for idle workers.
    pub idle_backoff: Duration,
    /// Receive ring slot count (usable capacity is one less).
    pub ring_capacity: usize,
    /// Kernel log buffer capacity.
    pub log_capacity: usize,
    /// Minimum severity echoed to the console.
    pub console_level: Level,
    /// Seed for packet-id generation.
    pub rng_seed: u64,
}

impl KernelConfig {
    /// Validates the configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(
            self.idle_backoff > Duration::ZERO,
            "idle_backoff must be > 0"
        );
        assert!(self.ring_capacity >= 2, "ring_capacity must be at least 2");
        assert!(self.log_capacity > 0, "log_capacity must be > 0");
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            idle_backoff: Duration::from_micros(50),
            ring_capacity: 2048,
            log_capacity: 10_000,
            console_level: Level::Info,
            rng_seed: 0x853c_49e6_748f_ea9b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KernelConfig;

    #[test]
    fn default_config_is_valid() {
        KernelConfig::default().validate();
    }

    #[test]
    #[should_panic(expected = "workers must be > 0")]
    fn zero_workers_is_invalid() {
        KernelConfig {
            workers: 0,
            ..KernelConfig::default()
        }
        .validate();
    }

    #[test]
    #[should_panic(expected = "ring_capacity")]
    fn degenerate_ring_is_invalid() {
        KernelConfig {
            ring_capacity: 1,
            ..KernelConfig::default()
        }
        .validate();
    }
}
