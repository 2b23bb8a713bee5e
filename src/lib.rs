pub mod auth;
pub mod clients;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod slug;
pub mod uploads;
pub mod validation;
