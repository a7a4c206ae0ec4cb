pub mod app_config;
pub mod database;
pub mod gateway;
pub mod memory;
pub mod pg;

pub use database::DbClient;
pub use gateway::HttpPaymentGateway;
pub use memory::MemoryStore;
pub use pg::{
    PgCourierRepository, PgDeliveryRepository, PgNotifier, PgOrderRepository,
    PgPaymentRepository, PgValidationRepository,
};
