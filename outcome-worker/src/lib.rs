pub mod config;
pub mod dead_letter;
pub mod error;
pub mod processors;
pub mod registry;
pub mod worker;
