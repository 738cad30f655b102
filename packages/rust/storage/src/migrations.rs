//! SQL migration definitions for the listing database.
//!
//! Migrations are applied in order on database open. The `listings` table
//! layout matches databases written by earlier scraper versions, so those
//! files can be opened and merged directly.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: listings history",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Every scraped version of every listing; never updated in place except
-- for the has_updated flag.
CREATE TABLE IF NOT EXISTS listings (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id          TEXT,
    listing_title        TEXT,
    total_price          TEXT,
    unit_price           TEXT,
    property_url         TEXT,
    image_url            TEXT,
    city                 TEXT,
    district             TEXT,
    alley_width          TEXT,
    features             TEXT,
    property_description TEXT,
    has_updated          INTEGER DEFAULT 0,
    updated_at           TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_property_id ON listings (property_id);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Scrape run bookkeeping",
            sql: r#"
CREATE TABLE IF NOT EXISTS scrape_runs (
    id          TEXT PRIMARY KEY,
    task        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_scrape_runs_task ON scrape_runs (task);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ascending_and_recorded() {
        let migrations = all_migrations();
        for pair in migrations.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        for m in &migrations {
            assert!(
                m.sql
                    .contains(&format!("INTO schema_migrations (version) VALUES ({})", m.version)),
                "migration {} does not record itself",
                m.version
            );
        }
    }
}
