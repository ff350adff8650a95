pub mod sweeps;
pub mod worker;

pub use sweeps::*;
pub use worker::*;
