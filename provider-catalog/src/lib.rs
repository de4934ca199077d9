//! # Catalog Provider
//!
//! HTTP client for the audiobook catalog server.
//!
//! ## Overview
//!
//! - Book details with chapters and audio files
//! - Library listing, stats and paginated item ids
//! - Progress push (single and batch) and pull
//! - Bookmark pull
//! - Health check and per-track download
//!
//! Every request goes through the `HttpClient` bridge; the server location
//! and token come from a `CatalogSession`.

pub mod client;
pub mod error;
pub mod types;

pub use client::HttpCatalogClient;
pub use error::{CatalogError, Result};
