pub mod api;
pub mod config;
pub mod error;
pub mod guard;
pub mod insight;
pub mod interfaces;
pub mod observability;
pub mod polling;
pub mod types;
pub mod utils;

// Base mainnet, where the storefront's marketplace lives
pub const BASE_CHAIN_ID: u64 = 8453;
