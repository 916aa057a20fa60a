use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info, warn};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{FileRecord, ShardId};
use crate::directory::distributed::DistributedDirectory;
use crate::storage::chunk_store::ChunkStore;

/// A file that reached local disk intact
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub shard: ShardId,
    pub name: String,
    pub length: u64,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct ExportFailure {
    pub shard: ShardId,
    pub name: String,
    pub error: Error,
}

/// Outcome of an export. Failed files leave nothing behind in the target directory.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub copied: Vec<ExportedFile>,
    pub failed: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.copied.iter().map(|f| f.length).sum()
    }

    /// The copied files, or `CopyIncomplete` naming the first failure
    pub fn into_result(self) -> Result<Vec<ExportedFile>> {
        match self.failed.first() {
            None => Ok(self.copied),
            Some(first) => Err(Error::new(
                ErrorKind::CopyIncomplete,
                format!(
                    "{} of {} files failed to export, first {}/{}: {}",
                    self.failed.len(),
                    self.failed.len() + self.copied.len(),
                    first.shard,
                    first.name,
                    first.error
                ),
            )),
        }
    }
}

struct CopyTask {
    store: Arc<ChunkStore>,
    record: FileRecord,
    target: PathBuf,
}

impl DistributedDirectory {
    /// Copy every file of every shard to `target/<shard>/<name>`
    pub fn copy_to_local(&self, target: impl AsRef<Path>) -> Result<ExportReport> {
        let shards = self.shard_ids();
        self.export(&shards, target.as_ref())
    }

    pub fn copy_shard_to_local(&self, shard: &ShardId, target: impl AsRef<Path>) -> Result<ExportReport> {
        self.export(std::slice::from_ref(shard), target.as_ref())
    }

    fn export(&self, shards: &[ShardId], target: &Path) -> Result<ExportReport> {
        // Listing is all-or-nothing; per-file failures are reported, not raised
        let mut tasks = Vec::new();
        for shard in shards {
            let store = self.chunk_store(shard)?;
            validate_component(shard.as_str())?;
            let shard_dir = target.join(shard.as_str());
            fs::create_dir_all(&shard_dir)?;

            for record in store.records()? {
                tasks.push(CopyTask {
                    store: store.clone(),
                    record,
                    target: shard_dir.clone(),
                });
            }
        }

        info!(
            "Export: copying {} files from {} shards to {}",
            tasks.len(),
            shards.len(),
            target.display()
        );

        let threads = self.config().export_threads;
        let results: Vec<(ShardId, String, Result<ExportedFile>)> = if threads <= 1 || tasks.len() <= 1 {
            tasks.iter().map(run_task).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::new(ErrorKind::Internal, format!("export thread pool: {}", e)))?;
            pool.install(|| tasks.par_iter().map(run_task).collect())
        };

        let mut report = ExportReport::default();
        for (shard, name, result) in results {
            match result {
                Ok(file) => report.copied.push(file),
                Err(error) => {
                    warn!("Export: {}/{} failed: {}", shard, name, error);
                    report.failed.push(ExportFailure { shard, name, error });
                }
            }
        }
        report.copied.sort_by(|a, b| (&a.shard, &a.name).cmp(&(&b.shard, &b.name)));
        report.failed.sort_by(|a, b| (&a.shard, &a.name).cmp(&(&b.shard, &b.name)));

        info!(
            "Export: {} files ({} bytes) copied, {} failed",
            report.copied.len(),
            report.total_bytes(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn run_task(task: &CopyTask) -> (ShardId, String, Result<ExportedFile>) {
    let result = copy_file(&task.store, &task.record, &task.target);
    (task.store.shard().clone(), task.record.name.clone(), result)
}

/// Stream one file chunk by chunk into `dir/<name>`.
///
/// Bytes go to a temp file in `dir` that is renamed into place only once the
/// local length matches the record.
pub fn copy_file(store: &ChunkStore, record: &FileRecord, dir: &Path) -> Result<ExportedFile> {
    validate_component(&record.name)?;
    let path = dir.join(&record.name);
    let mut temp = NamedTempFile::new_in(dir)?;

    let mut written = 0u64;
    for index in 0..record.chunk_count {
        let chunk = store.read_chunk(record, index).map_err(|e| incomplete(record, written, e))?;
        temp.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    temp.as_file().sync_all()?;

    let local_length = temp.as_file().metadata()?.len();
    if local_length != record.length {
        return Err(Error::new(
            ErrorKind::CopyIncomplete,
            format!(
                "'{}' copied {} of {} bytes",
                record.name, local_length, record.length
            ),
        ));
    }

    temp.persist(&path)?;
    debug!("Export: {} -> {} ({} bytes)", record.name, path.display(), written);

    Ok(ExportedFile {
        shard: store.shard().clone(),
        name: record.name.clone(),
        length: local_length,
        path,
    })
}

fn incomplete(record: &FileRecord, written: u64, cause: Error) -> Error {
    Error::new(
        ErrorKind::CopyIncomplete,
        format!(
            "'{}' stopped after {} of {} bytes: {}",
            record.name, written, record.length, cause
        ),
    )
}

/// Names become single path components under the target directory
fn validate_component(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("'{}' cannot be used as a local file name", name),
        ));
    }
    Ok(())
}
