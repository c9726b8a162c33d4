pub mod client;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod eth;
pub mod explorer;
pub mod metadata;
pub mod model;
pub mod nft;
pub mod nft_storage;
pub mod rotation;
pub mod rpc_cache;
pub mod runtime;
pub mod server;
pub mod service;
pub mod setup;
pub mod utils;
pub mod wallet_storage;
