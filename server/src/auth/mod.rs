pub mod gate;
pub mod jwt;

pub use gate::{AuthGate, Principal};
