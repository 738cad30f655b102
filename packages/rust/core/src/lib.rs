//! Pipeline orchestration and data cleaning for listingscout.
//!
//! This crate ties the crawler and storage together into the tasks the CLI
//! exposes (`scrape-urls`, `scrape-details`, `clean-data`, `full-pipeline`,
//! `merge-db`) and owns the cleaning rules for the CSV export.

pub mod cleaning;
pub mod merge;
pub mod pipeline;
pub mod urls;

pub use cleaning::{CleanStats, CleanedListing, DataCleaner};
pub use merge::merge_databases;
pub use pipeline::{
    CleanReport, DetailsReport, FullPipelineReport, PipelineContext, ProgressReporter,
    SilentProgress, UrlsReport, run_clean_data, run_full_pipeline, run_scrape_details,
    run_scrape_urls,
};
pub use urls::{load_urls, save_urls};
