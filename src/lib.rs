pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod filter;
pub mod permissions;
pub mod store;
pub mod validation;
