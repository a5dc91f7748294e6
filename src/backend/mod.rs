pub mod cache;
pub mod downloader;
pub mod feed;
pub mod fs;
pub mod library;
pub mod mangadex;
pub mod paths;
pub mod persistence;
pub mod process;
pub mod provider;
pub mod storage;
pub mod store;
