pub mod components;
pub mod config;
pub mod console;
pub mod model;
pub mod session;
