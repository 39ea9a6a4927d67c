pub mod api;
pub mod collab;
pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod registry;
pub mod shutdown;
