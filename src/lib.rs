//! Image cache and feed store for a manga reader.
//!
//! Covers and chapter pages are downloaded in strict order into a
//! content-addressed cache, feeds are kept in sync with what actually made
//! it to disk, and a capped snapshot of each feed survives restarts.

pub mod backend;
pub mod config;
pub mod error;

pub use backend::store::{LoadReport, ReaderState, Store};
pub use config::{MAX_FEED_ITEMS, Settings};
pub use error::{Error, Result};
