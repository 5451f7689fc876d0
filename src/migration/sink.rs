//! Long-term storage for migrated archive rows.

use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
};

use snafu::ResultExt;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, IoSnafu};

use super::MigrationRecord;

/// Destination for migrated records.
///
/// `write` must only return `Ok` once the record is durable; the engine deletes the
/// database row as soon as it does. Writing the same record again must be harmless.
pub trait ArchiveSink: Send + Sync + 'static {
    /// Directory reported in the migration status.
    fn root(&self) -> &Path;

    fn write<'a>(
        &'a self,
        record: &'a MigrationRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, Error>> + Send + 'a>>;
}

/// Writes one JSON file per record below a root directory.
///
/// Files are written to a temporary sibling, synced and then renamed into place, so a
/// crash never leaves a partially written record at the final path.
#[derive(Debug, Clone)]
pub struct FileArchive {
    root: PathBuf,
}

impl FileArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, record: &MigrationRecord) -> PathBuf {
        self.root.join(record.relative_path())
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<MigrationRecord, Error> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.context(IoSnafu { path })?;
        MigrationRecord::from_bytes(&bytes)
    }

    async fn write_file(&self, record: &MigrationRecord) -> Result<PathBuf, Error> {
        let path = self.path_for(record);
        let bytes = record.to_bytes()?;

        let parent = path
            .parent()
            .ok_or_else(|| Error::internal(eyre::eyre!("archive path has no parent")))?;
        tokio::fs::create_dir_all(parent)
            .await
            .context(IoSnafu { path: parent })?;

        let tmp = path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp)
                .await
                .context(IoSnafu { path: &tmp })?;
            file.write_all(&bytes).await.context(IoSnafu { path: &tmp })?;
            file.sync_all().await.context(IoSnafu { path: &tmp })?;
        }

        tokio::fs::rename(&tmp, &path)
            .await
            .context(IoSnafu { path: &path })?;

        #[cfg(unix)]
        tokio::fs::File::open(parent)
            .await
            .context(IoSnafu { path: parent })?
            .sync_all()
            .await
            .context(IoSnafu { path: parent })?;

        Ok(path)
    }
}

impl ArchiveSink for FileArchive {
    fn root(&self) -> &Path {
        &self.root
    }

    fn write<'a>(
        &'a self,
        record: &'a MigrationRecord,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, Error>> + Send + 'a>> {
        Box::pin(self.write_file(record))
    }
}
