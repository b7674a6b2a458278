use std::{
    fs::File,
    io::{BufReader, Read},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Sequential reader over a zip archive holding one JSON record per entry.
///
/// Directory entries are skipped. Records are decoded lazily, one entry at
/// a time, so an archive never has to fit in memory. Dropping the reader
/// closes the underlying file.
pub struct ReadingArchive {
    path: PathBuf,
    zip: ZipArchive<BufReader<File>>,
    cursor: usize,
}

impl ReadingArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let zip = ZipArchive::new(BufReader::new(file)).map_err(|e| {
            Error::Archive {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            zip,
            cursor: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries, directories included.
    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.len() == 0
    }

    /// Raw JSON text of the next record, or `None` at the end.
    pub fn next_plain(&mut self) -> Option<Result<String>> {
        while self.cursor < self.zip.len() {
            let index = self.cursor;
            self.cursor += 1;

            let mut entry = match self.zip.by_index(index) {
                Ok(entry) => entry,
                Err(e) => return Some(Err(entry_error(&self.path, index, e))),
            };
            if entry.is_dir() {
                continue;
            }

            let mut json = String::new();
            return Some(
                entry
                    .read_to_string(&mut json)
                    .map(|_| json)
                    .map_err(|e| entry_error(&self.path, index, e)),
            );
        }
        None
    }

    /// Decode the next record as `T`.
    pub fn next_record<T: DeserializeOwned>(&mut self) -> Option<Result<T>> {
        let index = self.cursor;
        let json = match self.next_plain()? {
            Ok(json) => json,
            Err(e) => return Some(Err(e)),
        };
        Some(
            serde_json::from_str(&json)
                .map_err(|e| entry_error(&self.path, index, e)),
        )
    }

    /// Iterate over the remaining records decoded as `T`.
    pub fn records<T: DeserializeOwned>(&mut self) -> Records<'_, T> {
        Records {
            archive: self,
            _marker: PhantomData,
        }
    }

    /// Decode every remaining record, logging and dropping the ones that
    /// fail. Returns the records and the number of failures.
    pub fn read_all<T: DeserializeOwned>(&mut self) -> (Vec<T>, usize) {
        let mut records = Vec::new();
        let mut failures = 0;
        for record in self.records::<T>() {
            match record {
                Ok(r) => records.push(r),
                Err(e) => {
                    failures += 1;
                    tracing::warn!("skipping record: {e}");
                }
            }
        }
        (records, failures)
    }

    /// Size of the archive file in MiB, for progress output.
    pub fn size_mb(&self) -> f64 {
        std::fs::metadata(&self.path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}

fn entry_error(path: &Path, index: usize, e: impl std::fmt::Display) -> Error {
    Error::Archive {
        path: path.to_path_buf(),
        message: format!("entry {index}: {e}"),
    }
}

impl std::fmt::Debug for ReadingArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingArchive")
            .field("path", &self.path)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

pub struct Records<'a, T> {
    archive: &'a mut ReadingArchive,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> Iterator for Records<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.archive.next_record()
    }
}

/// Write `records` as a zip archive with one JSON entry per record.
///
/// Entries are named `0.json`, `1.json`, ... in iteration order.
pub fn write_archive<T: serde::Serialize>(
    path: &Path,
    records: &[T],
) -> Result<()> {
    use std::io::Write;

    let file = File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (i, record) in records.iter().enumerate() {
        zip.start_file(format!("{i}.json"), options)?;
        zip.write_all(&serde_json::to_vec(record)?)?;
    }
    zip.finish()?;
    Ok(())
}
