pub mod greedy;
pub mod propagation;
pub mod transfer_container;

pub use greedy::load_balance;
pub use propagation::{LevelInventory, plan_round, transfers_involving};
pub use transfer_container::TransferContainer;
