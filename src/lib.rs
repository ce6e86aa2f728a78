//! Topic-driven quote scraping service.
//!
//! Background jobs load a topic page, pick a container selector, extract
//! validated quote records, fetch their images, and persist the results.
//! Progress is observable through a pub/sub broadcaster.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
