pub mod market_reader;

pub use market_reader::MarketReader;
