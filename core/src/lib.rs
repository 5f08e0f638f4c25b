pub mod client;
pub mod error;
pub mod fetcher;
pub mod filewriter;
pub mod hashutil;
pub mod progress;
pub mod transport;
pub mod urlutil;
pub mod wire;

pub use client::Client;
pub use error::{Result, TransferError};
pub use fetcher::Fetcher;
pub use filewriter::FileWriter;
