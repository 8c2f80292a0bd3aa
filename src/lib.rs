// Library exports for Folio
// This allows integration tests and external code to use Folio modules

pub mod auth;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod profile;
pub mod routes;
pub mod state;
