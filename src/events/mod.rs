//! Runtime event log and observability fan-out.
//!
//! The [`EventLog`] is the durable, append-only record of every step,
//! queryable at three levels (runs, nodes, steps). The [`EventBus`] and
//! [`EventHub`] are the live side: sinks and subscribers that watch a run
//! without being able to mutate it.

pub mod attention;
pub mod bus;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod log;
pub mod sink;
pub mod step;

pub use attention::{AttentionCategory, AttentionCounters};
pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter};
pub use event::RuntimeEvent;
pub use hub::{EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use log::{EventLog, NodeRollup, RunSummary};
pub use sink::{ChannelSink, EventSink, MemorySink, SinkError, StdOutSink};
pub use step::{StepDraft, StepKind, StepRecord};
