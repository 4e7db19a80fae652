//! Service wiring

pub mod outcomes;
pub mod state;

pub use outcomes::OutcomeSettler;
pub use state::AppState;
