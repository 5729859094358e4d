//! Serialized forms of a handle's engine state
//!
//! Directory form: one file per engine blob, `<dir>/hnsw.index.<key>`, plus the
//! manifest `<dir>/hnsw.index._meta` listing keys one per line in the order the
//! engine reported them. Stream form: the engine's own framing.
//!
//! Loading always builds a fresh engine index from the handle's remembered
//! options and only replaces the handle's index once the engine accepted the
//! blobs.

use crate::error::{AdapterError, Result};
use crate::handle::IndexHandle;
use crate::logging::TaskTimer;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use vecbridge_engine::{BinarySet, Error as EngineError, ErrorType};

/// File name prefix shared by every blob file and the manifest
pub const FILE_PREFIX: &str = "hnsw.index";
/// Manifest key suffix
pub const MANIFEST_KEY: &str = "_meta";

const TMP_SUFFIX: &str = ".tmp";

/// Path of the blob file for `key` under `dir`
pub fn blob_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", FILE_PREFIX, key))
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    blob_path(dir, MANIFEST_KEY)
}

/// Write `set` as blob files plus manifest
pub fn write_directory(set: &BinarySet, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut manifest = String::new();
    for (key, blob) in set.iter() {
        check_key(key, ErrorType::InternalError)?;
        write_atomic(&blob_path(dir, key), blob)?;
        manifest.push_str(key);
        manifest.push('\n');
    }
    // manifest last so a partial write never lists missing blobs
    write_atomic(&manifest_path(dir), manifest.as_bytes())?;
    Ok(())
}

/// Read the manifest and every blob it lists, preserving manifest order
pub fn read_directory(dir: &Path) -> Result<BinarySet> {
    let manifest = fs::read_to_string(manifest_path(dir))?;
    let mut set = BinarySet::new();
    for key in manifest.lines() {
        if key.is_empty() {
            continue;
        }
        check_key(key, ErrorType::InvalidBinary)?;
        let blob = fs::read(blob_path(dir, key))?;
        set.set(key, blob);
    }
    Ok(set)
}

/// Keys become file name suffixes, so they must stay inside the directory
fn check_key(key: &str, kind: ErrorType) -> Result<()> {
    if key == MANIFEST_KEY || key.contains(['/', '\\', '\n', '\r']) {
        return Err(EngineError::new(
            kind,
            format!("blob key '{}' cannot be used as a file name", key),
        )
        .into());
    }
    Ok(())
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp_path = PathBuf::from(tmp);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        AdapterError::Io(e)
    })?;
    Ok(())
}

impl IndexHandle {
    pub fn serialize_to_directory(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let _timer = TaskTimer::new("serialize index");
        tracing::debug!("TRACE LOG[serialize]: dir={}", dir.display());
        let set = self.index.serialize().map_err(|e| {
            tracing::error!(code = e.code(), "serialize failed: {}", e);
            e
        })?;
        write_directory(&set, dir)?;
        tracing::debug!("   serialize success, keys={}", set.len());
        Ok(())
    }

    pub fn serialize_to_stream(&self, writer: &mut dyn Write) -> Result<()> {
        let _timer = TaskTimer::new("fserialize index");
        tracing::debug!("TRACE LOG[fserialize]");
        self.index.serialize_to(writer).map_err(|e| {
            tracing::error!(code = e.code(), "fserialize failed: {}", e);
            AdapterError::from(e)
        })
    }

    /// Stream form written to a single file
    pub fn serialize_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.serialize_to_stream(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Replace this handle's index with the state stored under `dir`
    pub fn deserialize_from_directory(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let _timer = TaskTimer::new("deserialize index");
        tracing::debug!("TRACE LOG[deserialize_bin]: dir={}", dir.display());
        let set = read_directory(dir).map_err(|e| {
            tracing::error!(code = e.code(), "read serialized index failed: {}", e);
            e
        })?;
        let mut fresh = self.new_engine_index()?;
        fresh.deserialize(&set).map_err(|e| {
            tracing::error!(code = e.code(), "deserialize failed: {}", e);
            e
        })?;
        self.index = fresh;
        tracing::debug!("   deserialize success, count={}", self.count());
        Ok(())
    }

    pub fn deserialize_from_stream(&mut self, reader: &mut dyn Read) -> Result<()> {
        let _timer = TaskTimer::new("fdeserialize index");
        tracing::debug!("TRACE LOG[fdeserialize]");
        let mut fresh = self.new_engine_index()?;
        fresh.deserialize_from(reader).map_err(|e| {
            tracing::error!(code = e.code(), "fdeserialize failed: {}", e);
            e
        })?;
        self.index = fresh;
        Ok(())
    }

    pub fn deserialize_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        self.deserialize_from_stream(&mut reader)
    }
}
