//! Merging a downloaded listings database into the master database.

use std::path::Path;

use tracing::{info, instrument};

use listingscout_shared::Result;
use listingscout_storage::Storage;

/// Add every listing from `downloaded` whose property is not yet in `master`.
///
/// `master` is created if it does not exist. Returns the number of rows added.
#[instrument(skip_all, fields(downloaded = %downloaded.display(), master = %master.display()))]
pub async fn merge_databases(downloaded: &Path, master: &Path) -> Result<u64> {
    let storage = Storage::open(master).await?;
    let before = storage.count_listings().await?;
    let added = storage.merge_from(downloaded).await?;

    info!(before, added, after = before + added, "databases merged");
    Ok(added)
}
