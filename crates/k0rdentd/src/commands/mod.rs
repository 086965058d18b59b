pub mod config;
pub mod export;
pub mod install;
pub mod registry;
pub mod uninstall;
pub mod version;
