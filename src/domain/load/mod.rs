pub mod imbalance;
pub mod load_tracker;

pub use imbalance::ImbalanceDetector;
pub use load_tracker::{LoadTracker, LoadWindow};
