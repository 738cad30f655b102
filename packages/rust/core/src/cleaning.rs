//! Cleaning of stored listings into a flat CSV export.
//!
//! The cleaner reads the latest version of every property, normalises the
//! display strings scraped from the site, and derives numeric columns:
//!
//! - `total_price_vnd` from Vietnamese price notation (`5,2 tỷ`, `850 triệu`,
//!   `12 tỷ 500 triệu`, or plain digits)
//! - `unit_price_vnd_per_m2` from the per-square-meter price
//! - `alley_width_m` from the alley description
//! - `area_m2` from the `Diện tích` feature, or total / unit price

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument};

use listingscout_shared::{ListingRecord, ListingScoutError, Result};
use listingscout_storage::Storage;

const TY: f64 = 1_000_000_000.0;
const TRIEU: f64 = 1_000_000.0;
const NGHIN: f64 = 1_000.0;

/// A number followed by an optional Vietnamese magnitude word.
static PRICE_TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)*)\s*(tỷ|tỉ|ty|triệu|trieu|tr|nghìn|ngàn|ngan)?\b")
        .expect("valid regex")
});

static AREA_FEATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)diện\s+tích\s*:\s*(\d+(?:[.,]\d+)?)").expect("valid regex")
});

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)").expect("valid regex"));

// ---------------------------------------------------------------------------
// Output row
// ---------------------------------------------------------------------------

/// One row of the cleaned export. Column order follows field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedListing {
    pub property_id: String,
    pub listing_title: Option<String>,
    pub total_price: Option<String>,
    pub total_price_vnd: Option<i64>,
    pub unit_price: Option<String>,
    pub unit_price_vnd_per_m2: Option<i64>,
    pub area_m2: Option<f64>,
    pub alley_width: Option<String>,
    pub alley_width_m: Option<f64>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub features: Option<String>,
    pub property_description: Option<String>,
    pub property_url: Option<String>,
    pub image_url: Option<String>,
    pub has_updated: bool,
    pub updated_at: Option<String>,
}

/// Counters from a cleaning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanStats {
    pub loaded: usize,
    pub kept: usize,
    pub dropped_no_id: usize,
    pub unparsed_total_price: usize,
    pub unparsed_unit_price: usize,
    pub missing_area: usize,
}

// ---------------------------------------------------------------------------
// DataCleaner
// ---------------------------------------------------------------------------

/// Load, clean, and export listings.
#[derive(Debug, Default)]
pub struct DataCleaner {
    records: Vec<ListingRecord>,
    cleaned: Vec<CleanedListing>,
}

impl DataCleaner {
    /// Load the latest version of every property from `storage`.
    #[instrument(skip_all)]
    pub async fn load(storage: &Storage) -> Result<Self> {
        let records = storage.latest_listings().await?;
        info!(rows = records.len(), "loaded latest listings");
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<ListingRecord>) -> Self {
        Self {
            records,
            cleaned: Vec::new(),
        }
    }

    /// Apply every cleaning rule. Calling it again re-cleans from the loaded rows.
    pub fn clean(&mut self) -> CleanStats {
        let mut stats = CleanStats {
            loaded: self.records.len(),
            ..CleanStats::default()
        };

        let mut cleaned: Vec<CleanedListing> = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let Some(row) = clean_record(record) else {
                stats.dropped_no_id += 1;
                continue;
            };

            if row.total_price.is_some() && row.total_price_vnd.is_none() {
                stats.unparsed_total_price += 1;
            }
            if row.unit_price.is_some() && row.unit_price_vnd_per_m2.is_none() {
                stats.unparsed_unit_price += 1;
            }
            if row.area_m2.is_none() {
                stats.missing_area += 1;
            }
            cleaned.push(row);
        }

        cleaned.sort_by(|a, b| a.property_id.cmp(&b.property_id));
        stats.kept = cleaned.len();
        self.cleaned = cleaned;

        info!(
            loaded = stats.loaded,
            kept = stats.kept,
            dropped_no_id = stats.dropped_no_id,
            unparsed_total_price = stats.unparsed_total_price,
            "cleaned listings"
        );
        stats
    }

    pub fn cleaned(&self) -> &[CleanedListing] {
        &self.cleaned
    }

    /// Write the cleaned rows to `path` as CSV with a header row.
    ///
    /// Returns the number of data rows written.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> Result<usize> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ListingScoutError::io(parent, e))?;
        }

        let mut writer =
            csv::Writer::from_path(path).map_err(|e| ListingScoutError::io(path, e.into()))?;
        for row in &self.cleaned {
            writer
                .serialize(row)
                .map_err(|e| ListingScoutError::io(path, e.into()))?;
        }
        writer.flush().map_err(|e| ListingScoutError::io(path, e))?;

        info!(rows = self.cleaned.len(), "cleaned data written");
        Ok(self.cleaned.len())
    }
}

fn clean_record(record: &ListingRecord) -> Option<CleanedListing> {
    let property_id = clean_text(record.property_id.as_deref())?;

    let total_price = clean_text(record.total_price.as_deref());
    let unit_price = clean_text(record.unit_price.as_deref());
    let alley_width = clean_text(record.alley_width.as_deref());
    let features = clean_text(record.features.as_deref());

    let total_price_vnd = total_price.as_deref().and_then(parse_vnd);
    let unit_price_vnd_per_m2 = unit_price.as_deref().and_then(parse_unit_price);
    let area_m2 = features
        .as_deref()
        .and_then(area_from_features)
        .or_else(|| area_from_prices(total_price_vnd, unit_price_vnd_per_m2));

    if total_price.is_some() && total_price_vnd.is_none() {
        debug!(%property_id, raw = ?total_price, "unparseable total price");
    }

    Some(CleanedListing {
        listing_title: clean_text(record.listing_title.as_deref()),
        total_price_vnd,
        unit_price_vnd_per_m2,
        area_m2,
        alley_width_m: alley_width.as_deref().and_then(parse_meters),
        alley_width,
        total_price,
        unit_price,
        city: clean_text(record.city.as_deref()),
        district: clean_text(record.district.as_deref()),
        features,
        property_description: clean_text(record.property_description.as_deref()),
        property_url: clean_text(record.property_url.as_deref()),
        image_url: clean_text(record.image_url.as_deref()),
        has_updated: record.has_updated,
        updated_at: record.updated_at.clone(),
        property_id,
    })
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

/// Collapse whitespace runs to single spaces; blank becomes `None`.
pub fn clean_text(raw: Option<&str>) -> Option<String> {
    let text = raw?.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

/// Parse a Vietnamese price into whole VND.
///
/// Terms with a magnitude word are summed (`12 tỷ 500 triệu`). Without any
/// magnitude word a single number is read as a plain VND amount, with `.`
/// and `,` treated as thousands separators.
pub fn parse_vnd(raw: &str) -> Option<i64> {
    let text = raw.to_lowercase();
    let mut total = 0.0;
    let mut has_unit = false;
    let mut bare: Vec<&str> = Vec::new();

    for caps in PRICE_TERM_RE.captures_iter(&text) {
        let number = caps.get(1)?.as_str();
        match caps.get(2).map(|m| m.as_str()) {
            Some(unit) => {
                has_unit = true;
                total += parse_scaled(number)? * multiplier(unit);
            }
            None => bare.push(number),
        }
    }

    if has_unit {
        return (total > 0.0).then(|| total.round() as i64);
    }

    match bare.as_slice() {
        [number] => {
            let digits: String = number.chars().filter(char::is_ascii_digit).collect();
            digits.parse::<i64>().ok().filter(|v| *v > 0)
        }
        _ => None,
    }
}

/// Parse a per-square-meter price such as `120,5 triệu/m²`.
pub fn parse_unit_price(raw: &str) -> Option<i64> {
    let amount = raw.split('/').next()?;
    parse_vnd(amount)
}

/// First decimal number in `raw`, read as meters.
pub fn parse_meters(raw: &str) -> Option<f64> {
    let caps = DECIMAL_RE.captures(raw)?;
    parse_decimal(caps.get(1)?.as_str())
}

/// Area from a flattened feature list containing `Diện tích: 50 m²`.
pub fn area_from_features(features: &str) -> Option<f64> {
    let caps = AREA_FEATURE_RE.captures(features)?;
    parse_decimal(caps.get(1)?.as_str()).filter(|a| *a > 0.0)
}

fn area_from_prices(total: Option<i64>, unit: Option<i64>) -> Option<f64> {
    match (total, unit) {
        (Some(total), Some(unit)) if total > 0 && unit > 0 => {
            let area = total as f64 / unit as f64;
            Some((area * 100.0).round() / 100.0)
        }
        _ => None,
    }
}

fn multiplier(unit: &str) -> f64 {
    match unit {
        "tỷ" | "tỉ" | "ty" => TY,
        "triệu" | "trieu" | "tr" => TRIEU,
        _ => NGHIN,
    }
}

/// A number in front of a magnitude word: one separator is a decimal mark
/// (`5,2`), several are thousands separators (`1.200.000`).
fn parse_scaled(number: &str) -> Option<f64> {
    let separators = number.chars().filter(|c| *c == '.' || *c == ',').count();
    if separators <= 1 {
        parse_decimal(number)
    } else {
        number
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok()
    }
}

fn parse_decimal(number: &str) -> Option<f64> {
    number.replace(',', ".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, property_id: Option<&str>) -> ListingRecord {
        ListingRecord {
            id,
            property_id: property_id.map(String::from),
            listing_title: Some("  Bán   nhà\n riêng ".into()),
            total_price: Some("12 tỷ 500 triệu".into()),
            unit_price: Some("250 triệu/m²".into()),
            property_url: Some(format!("https://onehousing.vn/p/{id}")),
            image_url: None,
            city: Some("Hà Nội".into()),
            district: Some(" Cầu Giấy ".into()),
            alley_width: Some("Ngõ rộng 3,5 m".into()),
            features: Some("Số tầng: 5; Diện tích: 48,5 m²".into()),
            property_description: Some("   ".into()),
            has_updated: false,
            updated_at: Some("2026-01-01 00:00:00".into()),
        }
    }

    #[test]
    fn vietnamese_prices() {
        assert_eq!(parse_vnd("5,2 tỷ"), Some(5_200_000_000));
        assert_eq!(parse_vnd("850 triệu"), Some(850_000_000));
        assert_eq!(parse_vnd("12 tỷ 500 triệu"), Some(12_500_000_000));
        assert_eq!(parse_vnd("Giá: 3 Tỷ"), Some(3_000_000_000));
        assert_eq!(parse_vnd("2.500.000.000 đ"), Some(2_500_000_000));
        assert_eq!(parse_vnd("1500000000"), Some(1_500_000_000));
    }

    #[test]
    fn unparseable_prices_are_none() {
        assert_eq!(parse_vnd("Thỏa thuận"), None);
        assert_eq!(parse_vnd(""), None);
        assert_eq!(parse_vnd("0 tỷ"), None);
    }

    #[test]
    fn unit_prices() {
        assert_eq!(parse_unit_price("120,5 triệu/m²"), Some(120_500_000));
        assert_eq!(parse_unit_price("250 tr/m²"), Some(250_000_000));
        assert_eq!(parse_unit_price("Liên hệ"), None);
    }

    #[test]
    fn alley_width_in_meters() {
        assert_eq!(parse_meters("Ngõ rộng 3,5 m"), Some(3.5));
        assert_eq!(parse_meters("Mặt tiền 12m"), Some(12.0));
        assert_eq!(parse_meters("Ngõ nhỏ"), None);
    }

    #[test]
    fn area_prefers_feature_then_prices() {
        assert_eq!(area_from_features("Hướng: Tây; Diện tích: 50 m²"), Some(50.0));
        assert_eq!(area_from_features("Hướng: Tây"), None);
        assert_eq!(
            area_from_prices(Some(12_500_000_000), Some(250_000_000)),
            Some(50.0)
        );
        assert_eq!(area_from_prices(Some(1), None), None);
    }

    #[test]
    fn clean_drops_missing_ids_and_sorts() {
        let mut cleaner = DataCleaner::from_records(vec![
            record(3, Some("OH-2")),
            record(1, None),
            record(2, Some("  ")),
            record(4, Some("OH-1")),
        ]);

        let stats = cleaner.clean();
        assert_eq!(stats.loaded, 4);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.dropped_no_id, 2);

        let ids: Vec<&str> = cleaner
            .cleaned()
            .iter()
            .map(|r| r.property_id.as_str())
            .collect();
        assert_eq!(ids, vec!["OH-1", "OH-2"]);
    }

    #[test]
    fn clean_normalises_fields() {
        let mut cleaner = DataCleaner::from_records(vec![record(1, Some(" OH-7 "))]);
        cleaner.clean();
        let row = &cleaner.cleaned()[0];

        assert_eq!(row.property_id, "OH-7");
        assert_eq!(row.listing_title.as_deref(), Some("Bán nhà riêng"));
        assert_eq!(row.district.as_deref(), Some("Cầu Giấy"));
        assert_eq!(row.property_description, None);
        assert_eq!(row.total_price_vnd, Some(12_500_000_000));
        assert_eq!(row.unit_price_vnd_per_m2, Some(250_000_000));
        assert_eq!(row.area_m2, Some(48.5));
        assert_eq!(row.alley_width_m, Some(3.5));
    }

    #[test]
    fn area_falls_back_to_price_ratio() {
        let mut rec = record(1, Some("OH-1"));
        rec.features = None;
        let mut cleaner = DataCleaner::from_records(vec![rec]);
        cleaner.clean();
        assert_eq!(cleaner.cleaned()[0].area_m2, Some(50.0));
    }

    #[test]
    fn unparsed_prices_are_counted() {
        let mut rec = record(1, Some("OH-1"));
        rec.total_price = Some("Thỏa thuận".into());
        rec.features = None;
        let mut cleaner = DataCleaner::from_records(vec![rec]);
        let stats = cleaner.clean();

        assert_eq!(stats.unparsed_total_price, 1);
        assert_eq!(stats.missing_area, 1);
        assert_eq!(cleaner.cleaned()[0].total_price_vnd, None);
    }

    #[test]
    fn save_writes_header_and_rows() {
        let dir = std::env::temp_dir().join(format!("ls_clean_{}", uuid::Uuid::now_v7()));
        let path = dir.join("listing_details_cleaned.csv");

        let mut cleaner = DataCleaner::from_records(vec![record(1, Some("OH-1"))]);
        cleaner.clean();
        assert_eq!(cleaner.save(&path).unwrap(), 1);

        let csv = std::fs::read_to_string(&path).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("property_id,listing_title,total_price,total_price_vnd"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("OH-1,Bán nhà riêng,12 tỷ 500 triệu,12500000000"));
        assert!(lines.next().is_none());
    }
}
