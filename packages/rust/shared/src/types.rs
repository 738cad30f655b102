//! Core domain types for scraped listings.

use serde::{Deserialize, Serialize};

/// Separator used when flattening [`Listing::features`] into a single column.
pub const FEATURE_SEPARATOR: &str = "; ";

/// Separator used when flattening [`Listing::property_description`].
pub const DESCRIPTION_SEPARATOR: &str = ". ";

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// A single listing as extracted from its detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Headline shown on the detail page.
    pub listing_title: Option<String>,
    /// Site-wide property code. Listings without one are never stored.
    pub property_id: Option<String>,
    /// Total asking price, as displayed (e.g. `5,2 tỷ`).
    pub total_price: Option<String>,
    /// Price per square meter, as displayed.
    pub unit_price: Option<String>,
    /// The detail page URL this listing was scraped from.
    pub property_url: String,
    /// Primary image (first candidate of the preloaded `imagesrcset`).
    pub image_url: Option<String>,
    /// City, from the breadcrumb structured data.
    pub city: Option<String>,
    /// District, from the breadcrumb structured data.
    pub district: Option<String>,
    /// Access alley width, as displayed.
    pub alley_width: Option<String>,
    /// Key features rendered as `"title: text"`.
    #[serde(default)]
    pub features: Vec<String>,
    /// Description paragraphs or bullet points.
    #[serde(default)]
    pub property_description: Vec<String>,
}

impl Listing {
    /// Create an empty listing for the given detail page URL.
    pub fn new(property_url: impl Into<String>) -> Self {
        Self {
            property_url: property_url.into(),
            ..Self::default()
        }
    }

    /// Features flattened into one column, or `None` when there are none.
    pub fn features_joined(&self) -> Option<String> {
        join_non_empty(&self.features, FEATURE_SEPARATOR)
    }

    /// Description flattened into one column, or `None` when empty.
    pub fn description_joined(&self) -> Option<String> {
        join_non_empty(&self.property_description, DESCRIPTION_SEPARATOR)
    }

    /// The property id, if present and not blank.
    pub fn property_id(&self) -> Option<&str> {
        self.property_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

fn join_non_empty(parts: &[String], sep: &str) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(sep))
    }
}

// ---------------------------------------------------------------------------
// ListingRecord
// ---------------------------------------------------------------------------

/// One stored version of a listing, as read back from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Monotonic row id; a higher id is a newer version.
    pub id: i64,
    pub property_id: Option<String>,
    pub listing_title: Option<String>,
    pub total_price: Option<String>,
    pub unit_price: Option<String>,
    pub property_url: Option<String>,
    pub image_url: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub alley_width: Option<String>,
    /// Features joined with [`FEATURE_SEPARATOR`].
    pub features: Option<String>,
    /// Description joined with [`DESCRIPTION_SEPARATOR`].
    pub property_description: Option<String>,
    /// Set on every version of a property that has been seen more than once.
    pub has_updated: bool,
    /// SQLite `CURRENT_TIMESTAMP` text of the insert.
    pub updated_at: Option<String>,
}
