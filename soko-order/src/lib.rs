pub mod allocator;
pub mod lifecycle;
pub mod settlement;
pub mod validation;

pub use allocator::{Assignment, CourierAllocator, SelectionPolicy, UniformRandom};
pub use lifecycle::{EngineError, LifecycleEngine};
pub use settlement::{BackfillReport, SettlementReconciler, MAX_BACKFILL_PAGE};
pub use validation::{has_delivery_evidence, ValidationTracker};
