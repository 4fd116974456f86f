pub mod errors;
pub mod market;
pub mod portfolio;
pub mod ports;
pub mod risk;
pub mod types;
