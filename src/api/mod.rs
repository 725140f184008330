pub mod config_dto;
pub mod hierarchy_dto;
pub mod message;
