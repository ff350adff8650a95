pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::*;
pub use handlers::SchedulerState;
pub use models::*;
pub use router::scheduler_routes;
pub use services::*;
