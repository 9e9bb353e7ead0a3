pub mod config;
pub mod engine;
pub mod logging;
pub mod settings;
pub mod startup;
pub mod update;
pub mod version;
