// Library exports for Agora
// Integration tests drive the repositories and the router through these

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;
pub mod store;
pub mod uploads;
