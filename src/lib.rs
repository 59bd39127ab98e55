pub mod checker;
pub mod command;
pub mod config;
pub mod contract;
pub mod executor;
pub mod identity;
pub mod runner;
pub mod verify_cmd;
