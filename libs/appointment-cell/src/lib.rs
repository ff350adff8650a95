pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod test_support;

pub use handlers::AppointmentState;
pub use models::*;
pub use router::{appointment_routes, gps_routes};
pub use services::*;
