//! Write-to-sibling-then-rename.
//!
//! The temp file lives in the destination directory so the rename never
//! crosses a filesystem. If any step fails the temp file is unlinked when
//! its handle drops, and the destination keeps its previous content.

use std::io::{self, Write as _};
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub(crate) struct WriteOptions {
    pub fsync: bool,
    pub create_parents: bool,
}

/// Atomically replace `path` with `bytes`. Blocking.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], opts: WriteOptions) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
    if opts.create_parents {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = tempfile::Builder::new()
        .prefix(".stepkit-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    if opts.fsync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically replace `dest` with a copy of `source`, keeping its
/// permissions. Returns the number of bytes copied. Blocking.
pub(crate) fn copy_atomic(source: &Path, dest: &Path, opts: WriteOptions) -> io::Result<u64> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
    if opts.create_parents {
        std::fs::create_dir_all(parent)?;
    }

    let mut input = std::fs::File::open(source)?;
    let permissions = input.metadata()?.permissions();
    let mut tmp = tempfile::Builder::new()
        .prefix(".stepkit-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    let copied = io::copy(&mut input, &mut tmp)?;
    tmp.flush()?;
    tmp.as_file().set_permissions(permissions)?;
    if opts.fsync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(copied)
}
