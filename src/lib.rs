pub mod catalog;
pub mod config;
pub mod formatter;
pub mod handlers;
pub mod model;
pub mod push;
pub mod push_state;
