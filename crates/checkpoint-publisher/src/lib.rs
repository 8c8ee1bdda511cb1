pub mod batcher;
pub mod blockapi;
pub mod config;
pub mod dnslink;
pub mod error;
pub mod ipfs;
pub mod ledger;
pub mod merger;
pub mod pin;
pub mod run;

pub use error::{Error, ErrorKind, Result};
