pub mod auth;
pub mod config;
pub mod db;
pub mod http;
pub mod kissflow;
pub mod netsuite;
pub mod oauth;
pub mod sheets;
pub mod state;
pub mod store;
