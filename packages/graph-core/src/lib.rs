//! The ingest pipeline's engine: the batch claim protocol, the lease lock,
//! the staging/merge layer, cross-document dedup, description regeneration,
//! the description-job planner, crash recovery, and the broker-driven
//! worker loops that wire all of it together.

pub mod batch;
pub mod dedup;
pub mod description;
pub mod error;
pub mod jobs;
pub mod lease;
pub mod merge;
pub mod queue;
pub mod recovery;
pub mod stage;
pub mod staging;

pub use error::{CoreError, Result};
pub use lease::{acquire as acquire_lease, project_lock_key, AcquireMode, Lease, LeaseOptions};
pub use queue::worker::{
    run_delete_consumer, run_description_consumer, run_graph_consumer, run_preprocess_consumer,
    run_recovery_loop, WorkerDeps,
};
pub use queue::{Broker, NatsBroker};
pub use staging::StagingStore;
