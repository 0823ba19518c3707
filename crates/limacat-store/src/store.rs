use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path} line {line}: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode record for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Directory of JSON Lines files
///
/// Every save rewrites the whole file. The catalog is a few thousand
/// records at most, so there's no point in anything cleverer.
#[derive(Debug, Clone)]
pub struct JsonLinesStore {
    data_dir: PathBuf,
}

impl JsonLinesStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Full path of a file inside the store
    pub fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    /// Load every record from a JSON Lines file
    ///
    /// A missing file is an empty collection. Blank lines are skipped.
    pub fn load_lines<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);

        let handle = match File::open(&path) {
            Ok(handle) => handle,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist yet, starting empty", path.display());
                return Ok(Vec::new());
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let mut items = Vec::new();
        for (index, line) in BufReader::new(handle).lines().enumerate() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let item = serde_json::from_str(&line).map_err(|source| StoreError::Decode {
                path: path.clone(),
                line: index + 1,
                source,
            })?;
            items.push(item);
        }

        debug!("Loaded {} records from {}", items.len(), path.display());
        Ok(items)
    }

    /// Replace a JSON Lines file with `items`, one compact record per line
    pub fn save_lines<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        let path = self.path(file);

        self.write_atomically(&path, |writer| {
            for item in items {
                serde_json::to_writer(&mut *writer, item).map_err(|source| StoreError::Encode {
                    path: path.clone(),
                    source,
                })?;
                writer.write_all(b"\n").map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
            Ok(())
        })?;

        debug!("Saved {} records to {}", items.len(), path.display());
        Ok(())
    }

    /// Load a single pretty-printed JSON document, `None` when missing
    pub fn load_document<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>> {
        let path = self.path(file);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let document = serde_json::from_str(&contents).map_err(|source| StoreError::Decode {
            path: path.clone(),
            line: source.line(),
            source,
        })?;

        Ok(Some(document))
    }

    /// Save a single JSON document, pretty-printed so humans can read progress
    pub fn save_document<T: Serialize>(&self, file: &str, document: &T) -> Result<()> {
        let path = self.path(file);

        self.write_atomically(&path, |writer| {
            serde_json::to_writer_pretty(&mut *writer, document).map_err(|source| {
                StoreError::Encode {
                    path: path.clone(),
                    source,
                }
            })?;
            writer.write_all(b"\n").map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })
        })
    }

    /// Write to a sibling temp file and rename it over the target
    fn write_atomically<F>(&self, path: &Path, write: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<()>,
    {
        let tmp_path = path.with_extension("tmp");
        let io_err = |source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        };

        let file = File::create(&tmp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush().map_err(io_err)?;
        drop(writer);

        fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
