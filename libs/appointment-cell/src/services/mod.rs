pub mod directory;
pub mod email;
pub mod engine;
pub mod geo;
pub mod lifecycle;
pub mod notifications;
pub mod store;
pub mod token;
pub mod validation;

pub use directory::*;
pub use email::*;
pub use engine::*;
pub use geo::*;
pub use lifecycle::*;
pub use notifications::*;
pub use store::*;
pub use token::*;
pub use validation::*;
