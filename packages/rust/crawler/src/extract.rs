//! Pure HTML extraction for menu pages and listing detail pages.
//!
//! Nothing here touches the network; missing elements produce `None` or an
//! empty list, never an error.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use listingscout_shared::Listing;

const LISTING_CARD: &str = r#"a[data-role="property-card"]"#;
const TITLE: &str = "#detail_title";
const PROPERTY_ID: &str = "#container-property div:nth-child(5) div.flex.cursor-pointer p";
const TOTAL_PRICE: &str = "#total-price";
const UNIT_PRICE: &str = "#unit-price";
const ALLEY_WIDTH: &str = r#"#overview_content div[data-impression-index="1"]"#;
const PRELOAD_IMAGE: &str = r#"link[rel="preload"][as="image"]"#;
const JSON_LD: &str = r#"script[type="application/ld+json"]"#;
const FEATURE_ITEM: &str = "#key-feature-item";
const FEATURE_TITLE: &str = "#item_title";
const FEATURE_TEXT: &str = "#key-feature-text";
const DESCRIPTION_BLOCK: &str = r#"div[data-testid="property-description"]"#;
const DESCRIPTION_ITEMS: &str = r#"ul[aria-label="description-heading"].relative li"#;

/// Breadcrumb positions carrying the city and district names.
const CITY_POSITION: i64 = 2;
const DISTRICT_POSITION: i64 = 3;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

/// Visible text of an element with whitespace runs collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element matching `css`, if it exists and is not blank.
fn first_text(doc: &Html, css: &str) -> Option<String> {
    doc.select(&selector(css))
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Menu pages
// ---------------------------------------------------------------------------

/// Listing detail URLs linked from a menu page, in page order.
///
/// Absolute `http(s)` links are kept verbatim; anything else is resolved
/// against `base_url`.
pub fn extract_listing_urls(html: &str, base_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut urls = Vec::new();

    for card in doc.select(&selector(LISTING_CARD)) {
        let Some(href) = card.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }

        if href.starts_with("http") {
            urls.push(href.to_string());
        } else if let Ok(resolved) = base_url.join(href) {
            urls.push(resolved.to_string());
        }
    }

    urls
}

// ---------------------------------------------------------------------------
// Detail pages
// ---------------------------------------------------------------------------

/// Extract every known field from a listing detail page.
pub fn extract_listing(html: &str, property_url: &str) -> Listing {
    let doc = Html::parse_document(html);

    let (city, district) = breadcrumb_location(&doc);

    Listing {
        listing_title: first_text(&doc, TITLE),
        property_id: first_text(&doc, PROPERTY_ID),
        total_price: first_text(&doc, TOTAL_PRICE),
        unit_price: first_text(&doc, UNIT_PRICE),
        property_url: property_url.to_string(),
        image_url: preload_image(&doc),
        city,
        district,
        alley_width: first_text(&doc, ALLEY_WIDTH),
        features: features(&doc),
        property_description: description(&doc),
    }
}

/// First candidate URL of the preloaded hero image's `imagesrcset`.
fn preload_image(doc: &Html) -> Option<String> {
    let srcset = doc
        .select(&selector(PRELOAD_IMAGE))
        .find_map(|el| el.value().attr("imagesrcset"))?;
    first_srcset_url(srcset)
}

/// `"a.jpg 640w, b.jpg 1080w"` → `"a.jpg"`.
pub(crate) fn first_srcset_url(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .next()
        .map(str::trim)
        .and_then(|candidate| candidate.split_whitespace().next())
        .filter(|url| !url.is_empty())
        .map(String::from)
}

/// City and district from the first `BreadcrumbList` JSON-LD block.
fn breadcrumb_location(doc: &Html) -> (Option<String>, Option<String>) {
    for script in doc.select(&selector(JSON_LD)) {
        let raw = script.text().collect::<String>();
        let Ok(json) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if json.get("@type").and_then(Value::as_str) != Some("BreadcrumbList") {
            continue;
        }

        let mut city = None;
        let mut district = None;
        let items = json
            .get("itemListElement")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item in items {
            let name = item.get("name").and_then(Value::as_str).map(String::from);
            match item.get("position").and_then(position_of) {
                Some(CITY_POSITION) => city = name,
                Some(DISTRICT_POSITION) => district = name,
                _ => {}
            }
        }
        return (city, district);
    }

    (None, None)
}

fn position_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// `"title: text"` for each key-feature block having both parts.
fn features(doc: &Html) -> Vec<String> {
    let title_sel = selector(FEATURE_TITLE);
    let text_sel = selector(FEATURE_TEXT);

    doc.select(&selector(FEATURE_ITEM))
        .filter_map(|item| {
            let title = item.select(&title_sel).next().map(element_text)?;
            let text = item.select(&text_sel).next().map(element_text)?;
            (!title.is_empty() && !text.is_empty()).then(|| format!("{title}: {text}"))
        })
        .collect()
}

/// The description block's text, or the description bullet list.
fn description(doc: &Html) -> Vec<String> {
    if let Some(text) = first_text(doc, DESCRIPTION_BLOCK) {
        return vec![text];
    }

    doc.select(&selector(DESCRIPTION_ITEMS))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}
