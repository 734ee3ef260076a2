pub mod auth;
pub mod channel;
pub mod config;
pub mod db;
pub mod grant;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod migrations;
pub mod model;
pub mod notification;
pub mod server;
