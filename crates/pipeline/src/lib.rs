pub mod config;
pub mod media;
pub mod filter;
pub mod scan;
pub mod ffprobe;
pub mod probe;
pub mod inventory;
pub mod job;
pub mod plan;
pub mod pool;
pub mod transcode;
pub mod verify;
pub mod script;
pub mod report;
pub mod run;

pub use config::{OutputLayout, PipelineConfig, ProbeFailurePolicy};
pub use media::{AnomalyReason, AnomalyRecord, MediaMetadata, MediaPath};
pub use filter::PathFilter;
pub use scan::{Discoverer, DiscoveryError};
pub use ffprobe::{FfprobeProber, ProbeError, Prober, RawProbe};
pub use probe::{MetadataProbe, ProbeOutcome};
pub use inventory::{Inventory, InventorySummary};
pub use job::{JobStatus, TranscodeJob};
pub use plan::{JobPlanner, PlanningError};
pub use pool::{CancelToken, PoolOutcome, WorkerPool};
pub use transcode::{retry_failed, ExecutionReport, FfmpegInvoker, Invocation, ToolInvoker, TranscodeExecutor};
pub use verify::{VerificationRecord, Verifier};
pub use report::{RunCounts, RunReport};
pub use run::{Pipeline, Survey};
