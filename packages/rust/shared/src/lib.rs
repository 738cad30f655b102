//! Shared types, error model, and configuration for listingscout.
//!
//! This crate is the foundation depended on by all other listingscout crates.
//! It provides:
//! - [`ListingScoutError`]: the unified error type
//! - Domain types ([`Listing`], [`ListingRecord`])
//! - Configuration ([`AppConfig`], [`ScrapeConfig`], [`OutputPaths`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, LoggingConfig, OutputConfig, OutputPaths, ScrapeConfig, ScrapeSettings, SiteConfig,
    config_dir, config_file_path, init_config, init_config_at, load_config, load_config_from,
};
pub use error::{ListingScoutError, Result};
pub use types::{DESCRIPTION_SEPARATOR, FEATURE_SEPARATOR, Listing, ListingRecord};
