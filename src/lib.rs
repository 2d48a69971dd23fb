pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod forest;
pub mod models;
