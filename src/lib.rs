pub mod api;
pub mod cleanup;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod policy;
pub mod shutdown;
pub mod watcher;
