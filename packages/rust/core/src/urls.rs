//! The listing URL file shared between `scrape-urls` and `scrape-details`.

use std::path::Path;

use tracing::info;

use listingscout_shared::{ListingScoutError, Result};

/// Write `urls` as a pretty-printed JSON array. An empty list writes nothing.
///
/// Returns whether the file was written.
pub fn save_urls(path: &Path, urls: &[String]) -> Result<bool> {
    if urls.is_empty() {
        info!(path = %path.display(), "no URLs to save");
        return Ok(false);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ListingScoutError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(urls)
        .map_err(|e| ListingScoutError::parse(format!("failed to serialize URLs: {e}")))?;
    std::fs::write(path, json).map_err(|e| ListingScoutError::io(path, e))?;

    info!(path = %path.display(), count = urls.len(), "saved listing URLs");
    Ok(true)
}

/// Read a URL file written by [`save_urls`].
pub fn load_urls(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| ListingScoutError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| {
        ListingScoutError::parse(format!("invalid URL file {}: {e}", path.display()))
    })
}
