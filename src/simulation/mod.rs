// simulation/mod.rs
// Re-exports and module declarations for simulation submodules

pub mod clock;
pub mod controller;
pub mod history;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ControllerStatus, SimulationController};
pub use history::{HistoryArchive, HistoryBuffer};
pub use scheduler::{Branch, IterationReport, RealtimeScheduler, Stepper};

#[cfg(test)]
mod tests;
