pub mod balancer;
pub mod client;
pub mod controller;
pub mod hierarchy;
pub mod load;
pub mod log_sink;
pub mod model;
pub mod node;
pub mod sync;
pub mod utils;
