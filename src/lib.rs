//! Chunked file server.
//!
//! Files are stored as a metadata record plus an ordered set of fixed-size
//! chunk records, and streamed back by reassembling the chunks in sequence.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
