//! Per-client replication of scene hierarchies

pub mod config;
pub mod engine;
pub mod external;
pub mod hierarchy;
pub mod movement;
pub mod ownership;
pub mod policy;
pub mod priority;
pub mod quality;
pub mod reason;
pub mod session;
pub mod spatial;

pub use config::{SpatialStrategy, StreamingConfig};
pub use engine::{StreamingEngine, TickReport};
pub use external::{ClientTransport, IdResolver, SequentialIdResolver, SpatialQuery};
pub use hierarchy::{HierarchyMember, HierarchyRegistry, StreamableHierarchy};
pub use movement::{AxisAngle, MovementCache, MovementUpdate, PoseSample, angular_velocity_between};
pub use ownership::{OwnershipContext, ReparentOutcome};
pub use policy::{AdmissionPolicy, AdmitAll, LayerTagPolicy};
pub use priority::{AdmissionQueue, HierarchyPriority};
pub use quality::{QualityConfig, QualityController, QualityTier, median};
pub use reason::StreamReason;
pub use session::{ClientSession, DeltaReport, SessionContext, SessionDue, StartOutcome, StopOutcome};
pub use spatial::{
    BruteForceQuery, SortedAxisQuery, SpatialDelta, SpatialStreamingIndex,
    query_for_strategy,
};
