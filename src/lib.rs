pub mod archive;
pub mod catalog;
pub mod chunker;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod state;
pub mod store;
