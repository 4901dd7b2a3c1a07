pub mod backup;
pub mod broker;
pub mod chunk;
pub mod config;
pub mod db;
pub mod export;
pub mod model;
pub mod monitor;
pub mod oauth;
pub mod provider;
pub mod store;
pub mod sync;
pub mod transport;
