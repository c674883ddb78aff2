//! Writing into the output tree.
//!
//! Every file goes through a content hash check first, so a rebuild with
//! unchanged sources leaves the tree (and its modification times) untouched.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

/// A 32-byte BLAKE3 hash used for change detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<Utf8Path>) -> io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(fs::File::open(path.as_ref())?)?;
        Ok(hasher.finalize().into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Writes `data` to `path` unless the file already holds the same bytes.
/// Returns whether anything was written.
pub fn write_if_changed(path: &Utf8Path, data: &[u8]) -> io::Result<bool> {
    if path.is_file() && Hash32::hash_file(path)? == Hash32::hash(data) {
        tracing::debug!(%path, "unchanged");
        return Ok(false);
    }

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)?;
    Ok(true)
}

/// Copies `src` to `dst` unless `dst` already holds the same bytes.
pub fn copy_if_changed(src: &Utf8Path, dst: &Utf8Path) -> io::Result<bool> {
    if dst.is_file() && Hash32::hash_file(src)? == Hash32::hash_file(dst)? {
        tracing::debug!(path = %dst, "unchanged");
        return Ok(false);
    }

    if let Some(dir) = dst.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::copy(src, dst)?;
    Ok(true)
}

/// Content hashes of every file below `dir`, keyed by relative path.
pub fn fingerprint(dir: &Utf8Path) -> io::Result<BTreeMap<Utf8PathBuf, Hash32>> {
    fn walk(
        base: &Utf8Path,
        dir: &Utf8Path,
        acc: &mut BTreeMap<Utf8PathBuf, Hash32>,
    ) -> io::Result<()> {
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(base, path, acc)?;
            } else {
                let rel = path.strip_prefix(base).unwrap_or(path).to_path_buf();
                acc.insert(rel, Hash32::hash_file(path)?);
            }
        }
        Ok(())
    }

    let mut acc = BTreeMap::new();
    if dir.is_dir() {
        walk(dir, dir, &mut acc)?;
    }
    Ok(acc)
}
