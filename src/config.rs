//! Runtime configuration.
//!
//! Defaults resolve from the environment (via dotenvy) so deployments can
//! tune timeouts and pool sizes without code changes:
//!
//! - `AGENTLOOM_STEP_TIMEOUT_SECS` — per LLM/tool call timeout (default 60)
//! - `AGENTLOOM_QUIESCENCE_SECS` — grace for in-flight calls on pause/cancel (default 5)
//! - `AGENTLOOM_WORKER_POOL` — parallel-branch pool size (default: available parallelism)

use std::time::Duration;

use crate::events::{EventBus, EventSink, MemorySink, StdOutSink};

/// Declarative sink selection for the event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Event-hub configuration carried by [`RuntimeConfig`].
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub buffer_capacity: usize,
    pub sinks: Vec<SinkConfig>,
}

impl HubConfig {
    pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        Self {
            buffer_capacity: if buffer_capacity == 0 {
                Self::DEFAULT_BUFFER_CAPACITY
            } else {
                buffer_capacity
            },
            sinks,
        }
    }

    #[must_use]
    pub fn stdout_only() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn silent() -> Self {
        Self::new(Self::DEFAULT_BUFFER_CAPACITY, Vec::new())
    }

    /// Materialize an [`EventBus`] with the configured sinks.
    #[must_use]
    pub fn build_event_bus(&self) -> EventBus {
        let sinks: Vec<Box<dyn EventSink>> = self
            .sinks
            .iter()
            .map(|s| -> Box<dyn EventSink> {
                match s {
                    SinkConfig::StdOut => Box::new(StdOutSink),
                    SinkConfig::Memory => Box::new(MemorySink::new()),
                }
            })
            .collect();
        EventBus::with_capacity(sinks, self.buffer_capacity)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::stdout_only()
    }
}

/// Knobs for one executor instance.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Worker pool size for parallel branch batches.
    pub worker_pool_size: usize,
    /// Timeout applied to every LLM call and tool call.
    pub step_timeout: Duration,
    /// Grace given to in-flight calls after a pause/cancel signal.
    pub quiescence: Duration,
    /// Write a `Periodic` checkpoint every N steps of an event-loop visit.
    pub periodic_checkpoint_every: Option<u32>,
    pub hub: HubConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        let step_timeout = env_secs("AGENTLOOM_STEP_TIMEOUT_SECS", 60);
        let quiescence = env_secs("AGENTLOOM_QUIESCENCE_SECS", 5);
        let worker_pool_size = std::env::var("AGENTLOOM_WORKER_POOL")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });
        Self {
            worker_pool_size,
            step_timeout,
            quiescence,
            periodic_checkpoint_every: None,
            hub: HubConfig::default(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    #[must_use]
    pub fn with_quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_periodic_checkpoints(mut self, every_steps: u32) -> Self {
        self.periodic_checkpoint_every = Some(every_steps.max(1));
        self
    }

    #[must_use]
    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hub = hub;
        self
    }
}

fn env_secs(var: &str, default: u64) -> Duration {
    let secs = std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let hub = HubConfig::new(0, vec![SinkConfig::StdOut]);
        assert_eq!(hub.buffer_capacity, HubConfig::DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn builder_knobs() {
        let config = RuntimeConfig::default()
            .with_step_timeout(Duration::from_secs(5))
            .with_worker_pool_size(2)
            .with_periodic_checkpoints(4);
        assert_eq!(config.step_timeout, Duration::from_secs(5));
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.periodic_checkpoint_every, Some(4));
    }
}
