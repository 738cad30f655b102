//! libSQL storage layer for listing history.
//!
//! The [`Storage`] struct wraps a local libSQL database holding every scraped
//! version of every listing plus scrape-run bookkeeping.
//!
//! **History rules:**
//! - A listing is never replaced. Each save inserts a new row.
//! - Once a property has been seen twice, every row for it carries
//!   `has_updated = 1`.
//! - "Latest" means the row with the highest `id` for a `property_id`.

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use listingscout_shared::{Listing, ListingRecord, ListingScoutError, Result};
use uuid::Uuid;

const LISTING_COLUMNS: &str = "id, property_id, listing_title, total_price, unit_price, \
     property_url, image_url, city, district, alley_width, features, \
     property_description, has_updated, updated_at";

/// What [`Storage::save_listing`] did with a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First version of this property.
    Inserted,
    /// The property was already known; a new version was appended.
    NewVersion,
    /// The listing had no property id and was not stored.
    Skipped,
}

/// One row of the `scrape_runs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRun {
    pub id: String,
    pub task: String,
    pub started_at: String,
    /// `None` while the task is running, or if it never finished.
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ListingScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        tracing::info!(path = %path.display(), "database initialized");
        Ok(storage)
    }

    /// Open an existing database at `path` without migrating or writing.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ListingScoutError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ListingScoutError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ListingScoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing operations
    // -----------------------------------------------------------------------

    /// Append `listing` as a new version, flagging history when the property
    /// was seen before.
    pub async fn save_listing(&self, listing: &Listing) -> Result<SaveOutcome> {
        self.check_writable()?;

        let Some(property_id) = listing.property_id() else {
            tracing::warn!(url = %listing.property_url, "skipping listing without property_id");
            return Ok(SaveOutcome::Skipped);
        };

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let mut rows = tx
            .query(
                "SELECT COUNT(*) FROM listings WHERE property_id = ?1",
                params![property_id],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;
        let existing: i64 = match rows.next().await {
            Ok(Some(row)) => row.get(0).unwrap_or(0),
            _ => 0,
        };
        drop(rows);

        let outcome = if existing > 0 {
            tx.execute(
                "UPDATE listings SET has_updated = 1 WHERE property_id = ?1",
                params![property_id],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;
            tracing::debug!(property_id, versions = existing + 1, "appending new version");
            SaveOutcome::NewVersion
        } else {
            SaveOutcome::Inserted
        };

        let has_updated: i64 = if outcome == SaveOutcome::NewVersion { 1 } else { 0 };
        tx.execute(
            "INSERT INTO listings (
                 listing_title, property_id, total_price, unit_price,
                 property_url, image_url, city, district, alley_width,
                 features, property_description, has_updated, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, CURRENT_TIMESTAMP)",
            params![
                listing.listing_title.as_deref(),
                property_id,
                listing.total_price.as_deref(),
                listing.unit_price.as_deref(),
                listing.property_url.as_str(),
                listing.image_url.as_deref(),
                listing.city.as_deref(),
                listing.district.as_deref(),
                listing.alley_width.as_deref(),
                listing.features_joined(),
                listing.description_joined(),
                has_updated,
            ],
        )
        .await
        .map_err(|e| ListingScoutError::Storage(format!("{property_id}: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        Ok(outcome)
    }

    /// The most recent version of each property.
    pub async fn latest_listings(&self) -> Result<Vec<ListingRecord>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings
             WHERE id IN (SELECT MAX(id) FROM listings GROUP BY property_id)
             ORDER BY id"
        );
        self.query_listings(&sql, params![]).await
    }

    /// Every stored version of one property, oldest first.
    pub async fn listing_history(&self, property_id: &str) -> Result<Vec<ListingRecord>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE property_id = ?1 ORDER BY id"
        );
        self.query_listings(&sql, params![property_id]).await
    }

    /// Every stored row, oldest first.
    pub async fn all_listings(&self) -> Result<Vec<ListingRecord>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings ORDER BY id");
        self.query_listings(&sql, params![]).await
    }

    /// Total number of stored rows (all versions).
    pub async fn count_listings(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM listings", params![])
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| ListingScoutError::Storage(e.to_string()))?;
                Ok(count as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(ListingScoutError::Storage(e.to_string())),
        }
    }

    async fn query_listings(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ListingRecord>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?
        {
            results.push(row_to_listing_record(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    /// Copy rows from the database at `other` whose `property_id` is unknown
    /// here. All versions of a new property are copied, with their original
    /// flags and timestamps. Returns the number of rows added.
    pub async fn merge_from(&self, other: &Path) -> Result<u64> {
        self.check_writable()?;

        if !other.exists() {
            return Err(ListingScoutError::io(
                other,
                std::io::Error::new(std::io::ErrorKind::NotFound, "database to merge not found"),
            ));
        }

        let source = Storage::open_readonly(other).await?;
        let incoming = source.all_listings().await?;
        drop(source);

        let known = self.known_property_ids().await?;

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let mut added = 0u64;
        for record in &incoming {
            let Some(property_id) = record.property_id.as_deref() else {
                continue;
            };
            if known.contains(property_id) {
                continue;
            }

            tx.execute(
                "INSERT INTO listings (
                     property_id, listing_title, total_price, unit_price,
                     property_url, image_url, city, district, alley_width,
                     features, property_description, has_updated, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                           COALESCE(?13, CURRENT_TIMESTAMP))",
                params![
                    property_id,
                    record.listing_title.as_deref(),
                    record.total_price.as_deref(),
                    record.unit_price.as_deref(),
                    record.property_url.as_deref(),
                    record.image_url.as_deref(),
                    record.city.as_deref(),
                    record.district.as_deref(),
                    record.alley_width.as_deref(),
                    record.features.as_deref(),
                    record.property_description.as_deref(),
                    i64::from(record.has_updated),
                    record.updated_at.as_deref(),
                ],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(format!("merge {property_id}: {e}")))?;
            added += 1;
        }

        tx.commit()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        tracing::info!(
            source = %other.display(),
            incoming = incoming.len(),
            added,
            "merged listings"
        );
        Ok(added)
    }

    async fn known_property_ids(&self) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT property_id FROM listings WHERE property_id IS NOT NULL",
                params![],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let mut ids = HashSet::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(id) = row.get::<String>(0) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    // -----------------------------------------------------------------------
    // Scrape run operations
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline task. Returns the generated run ID.
    pub async fn insert_scrape_run(&self, task: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO scrape_runs (id, task, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), task, now.as_str()],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a scrape run finished with its stats.
    pub async fn finish_scrape_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE scrape_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Stats of a finished run, if any.
    pub async fn scrape_run_stats(&self, run_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM scrape_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(ListingScoutError::Storage(e.to_string())),
        }
    }

    /// The most recent runs, newest first.
    pub async fn recent_scrape_runs(&self, limit: u32) -> Result<Vec<ScrapeRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, task, started_at, finished_at, stats_json FROM scrape_runs \
                 ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?
        {
            runs.push(ScrapeRun {
                id: row
                    .get::<String>(0)
                    .map_err(|e| ListingScoutError::Storage(e.to_string()))?,
                task: row
                    .get::<String>(1)
                    .map_err(|e| ListingScoutError::Storage(e.to_string()))?,
                started_at: row.get::<String>(2).unwrap_or_default(),
                finished_at: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(runs)
    }
}

/// Convert a database row (selected with `LISTING_COLUMNS`) to a [`ListingRecord`].
fn row_to_listing_record(row: &libsql::Row) -> Result<ListingRecord> {
    Ok(ListingRecord {
        id: row
            .get::<i64>(0)
            .map_err(|e| ListingScoutError::Storage(e.to_string()))?,
        property_id: row.get::<String>(1).ok(),
        listing_title: row.get::<String>(2).ok(),
        total_price: row.get::<String>(3).ok(),
        unit_price: row.get::<String>(4).ok(),
        property_url: row.get::<String>(5).ok(),
        image_url: row.get::<String>(6).ok(),
        city: row.get::<String>(7).ok(),
        district: row.get::<String>(8).ok(),
        alley_width: row.get::<String>(9).ok(),
        features: row.get::<String>(10).ok(),
        property_description: row.get::<String>(11).ok(),
        has_updated: row.get::<i64>(12).unwrap_or(0) != 0,
        updated_at: row.get::<String>(13).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("ls_test_{}.db", Uuid::now_v7()))
    }

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        Storage::open(&temp_db_path()).await.expect("open test db")
    }

    fn listing(property_id: &str, price: &str) -> Listing {
        Listing {
            listing_title: Some(format!("Nhà {property_id}")),
            property_id: Some(property_id.into()),
            total_price: Some(price.into()),
            unit_price: Some("100 triệu/m²".into()),
            property_url: format!("https://onehousing.vn/p/{property_id}"),
            city: Some("Hà Nội".into()),
            district: Some("Cầu Giấy".into()),
            features: vec!["Hướng: Nam".into(), "Số tầng: 4".into()],
            property_description: vec!["Nhà đẹp".into(), "Ô tô đỗ cửa".into()],
            ..Listing::default()
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db_path();
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn first_save_inserts_without_flag() {
        let storage = test_storage().await;
        let outcome = storage
            .save_listing(&listing("OH-1", "5 tỷ"))
            .await
            .expect("save");
        assert_eq!(outcome, SaveOutcome::Inserted);

        let rows = storage.listing_history("OH-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].has_updated);
        assert_eq!(rows[0].features.as_deref(), Some("Hướng: Nam; Số tầng: 4"));
        assert_eq!(
            rows[0].property_description.as_deref(),
            Some("Nhà đẹp. Ô tô đỗ cửa")
        );
        assert!(rows[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn repeat_save_appends_and_flags_all_versions() {
        let storage = test_storage().await;
        storage.save_listing(&listing("OH-1", "5 tỷ")).await.unwrap();
        storage.save_listing(&listing("OH-2", "3 tỷ")).await.unwrap();
        let outcome = storage
            .save_listing(&listing("OH-1", "4,8 tỷ"))
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::NewVersion);

        let history = storage.listing_history("OH-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.has_updated));

        let other = storage.listing_history("OH-2").await.unwrap();
        assert!(!other[0].has_updated);

        assert_eq!(storage.count_listings().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn save_without_property_id_is_skipped() {
        let storage = test_storage().await;
        let mut l = listing("x", "1 tỷ");
        l.property_id = None;
        assert_eq!(storage.save_listing(&l).await.unwrap(), SaveOutcome::Skipped);
        assert_eq!(storage.count_listings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn latest_listings_picks_highest_id_per_property() {
        let storage = test_storage().await;
        storage.save_listing(&listing("OH-1", "5 tỷ")).await.unwrap();
        storage.save_listing(&listing("OH-2", "3 tỷ")).await.unwrap();
        storage.save_listing(&listing("OH-1", "4,5 tỷ")).await.unwrap();

        let latest = storage.latest_listings().await.expect("latest");
        assert_eq!(latest.len(), 2);
        let oh1 = latest
            .iter()
            .find(|r| r.property_id.as_deref() == Some("OH-1"))
            .expect("OH-1 present");
        assert_eq!(oh1.total_price.as_deref(), Some("4,5 tỷ"));
    }

    #[tokio::test]
    async fn merge_adds_only_unknown_properties() {
        let master = test_storage().await;
        master.save_listing(&listing("OH-1", "5 tỷ")).await.unwrap();

        let other_path = temp_db_path();
        {
            let other = Storage::open(&other_path).await.unwrap();
            other.save_listing(&listing("OH-1", "9 tỷ")).await.unwrap();
            other.save_listing(&listing("OH-3", "2 tỷ")).await.unwrap();
            other.save_listing(&listing("OH-3", "2,1 tỷ")).await.unwrap();
        }

        let added = master.merge_from(&other_path).await.expect("merge");
        assert_eq!(added, 2);

        let oh1 = master.listing_history("OH-1").await.unwrap();
        assert_eq!(oh1.len(), 1);
        assert_eq!(oh1[0].total_price.as_deref(), Some("5 tỷ"));

        let oh3 = master.listing_history("OH-3").await.unwrap();
        assert_eq!(oh3.len(), 2);
        assert!(oh3.iter().all(|r| r.has_updated));

        // Merging again adds nothing.
        assert_eq!(master.merge_from(&other_path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn merge_missing_source_fails() {
        let master = test_storage().await;
        let result = master.merge_from(&temp_db_path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn scrape_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage
            .insert_scrape_run("scrape_urls")
            .await
            .expect("insert run");
        assert!(!run_id.is_empty());
        assert_eq!(storage.scrape_run_stats(&run_id).await.unwrap(), None);

        storage
            .finish_scrape_run(&run_id, r#"{"urls": 20}"#)
            .await
            .expect("finish run");
        let stats = storage.scrape_run_stats(&run_id).await.unwrap();
        assert_eq!(stats.as_deref(), Some(r#"{"urls": 20}"#));
    }

    #[tokio::test]
    async fn recent_runs_newest_first() {
        let storage = test_storage().await;
        let first = storage.insert_scrape_run("scrape_urls").await.unwrap();
        let second = storage.insert_scrape_run("scrape_details").await.unwrap();
        storage.finish_scrape_run(&first, "{}").await.unwrap();

        let runs = storage.recent_scrape_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].finished_at, None);
        assert_eq!(runs[1].task, "scrape_urls");
        assert_eq!(runs[1].stats_json.as_deref(), Some("{}"));

        assert_eq!(storage.recent_scrape_runs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db_path();
        let rw = Storage::open(&tmp).await.unwrap();
        rw.save_listing(&listing("OH-1", "1 tỷ")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.latest_listings().await.unwrap().len(), 1);
        let result = ro.save_listing(&listing("OH-2", "1 tỷ")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
