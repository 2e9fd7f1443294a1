//! Discovery of handler manifests on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MailerError, Result};

use super::{ActionTable, ManifestAction};

/// Files ending in this suffix are handler manifests.
pub const HANDLER_FILE_SUFFIX: &str = ".json";

/// Scan `root` for `<exchange>/<action>.json` handler manifests.
///
/// Every immediate subdirectory of `root` is an exchange. Other files in
/// exchange directories (templates, notes) are ignored. Fails if `root` or
/// any exchange directory cannot be listed, or if a manifest cannot be
/// loaded.
pub async fn load_actions(root: &Path) -> Result<ActionTable> {
    let mut table = ActionTable::new();

    for exchange_dir in list_dir(root).await? {
        if !tokio::fs::metadata(&exchange_dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            continue;
        }
        let Some(exchange) = file_name(&exchange_dir) else {
            continue;
        };

        for file in list_dir(&exchange_dir).await? {
            let Some(action) = file_name(&file)
                .and_then(|name| name.strip_suffix(HANDLER_FILE_SUFFIX).map(str::to_string))
                .filter(|action| !action.is_empty())
            else {
                continue;
            };

            let handler = ManifestAction::from_file(&file).await?;
            tracing::debug!(
                exchange = %exchange,
                action = %action,
                path = %file.display(),
                "Loaded action handler"
            );
            table.insert(exchange.clone(), action, Arc::new(handler));
        }
    }

    tracing::info!(
        root = %root.display(),
        exchanges = table.exchanges().len(),
        actions = table.len(),
        "Action handlers loaded"
    );

    Ok(table)
}

async fn list_dir(path: &Path) -> Result<Vec<PathBuf>> {
    let read_error = |source| MailerError::DirectoryRead {
        path: path.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(path).await.map_err(read_error)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}
