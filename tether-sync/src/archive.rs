//! Gzip-compressed tar archives of a watched tree.
//!
//! ## Packing
//!
//! Every non-ignored regular file becomes an entry carrying its content and
//! mode. Symlinks become link entries with no payload; their targets are
//! neither read nor descended into. Directories are implied by entry names
//! and not written on their own.
//!
//! ## Unpacking
//!
//! Entries are restored in archive order. Regular files, directories, hard
//! links and symlinks are recreated; anything else is skipped. A failure
//! aborts the unpack and leaves whatever was already written on disk. Entries
//! never write through a symlink: names with `..` or a root are refused, as
//! is any entry whose parent directory on disk is a symlink.

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tar::{Archive, Builder, EntryType, Header};

use tether_core::portable_path;

use crate::error::{io_err, SyncError};
use crate::{ignore, perm, walk};

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Counts for a finished pack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    pub files: usize,
    pub symlinks: usize,
    /// Uncompressed payload bytes.
    pub bytes: u64,
}

impl PackSummary {
    pub fn entries(&self) -> usize {
        self.files + self.symlinks
    }
}

/// Counts for a finished unpack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub files: usize,
    pub dirs: usize,
    pub links: usize,
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Pack
// ---------------------------------------------------------------------------

/// Pack `root` into `writer`, returning the writer once the gzip stream is
/// finished.
pub fn pack_into<W: Write>(root: &Path, writer: W) -> Result<(W, PackSummary), SyncError> {
    let ignores = ignore::resolve(root)?;
    let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));
    let mut summary = PackSummary::default();

    for entry in walk::tree(root, &ignores) {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = portable_path(rel);

        if file_type.is_symlink() {
            append_symlink(&mut builder, entry.path(), &name)?;
            summary.symlinks += 1;
        } else if file_type.is_file() {
            match append_file(&mut builder, entry.path(), &name)? {
                Some(size) => {
                    summary.files += 1;
                    summary.bytes += size;
                }
                None => tracing::debug!("skipping vanished file {name}"),
            }
        } else {
            tracing::debug!("skipping special file {name}");
        }
    }

    let encoder = builder.into_inner().map_err(|e| io_err(root, e))?;
    let writer = encoder.finish().map_err(|e| io_err(root, e))?;
    tracing::debug!(
        "packed {} files and {} symlinks from {}",
        summary.files,
        summary.symlinks,
        root.display()
    );
    Ok((writer, summary))
}

/// Pack `root` into an in-memory buffer.
pub fn pack(root: &Path) -> Result<Vec<u8>, SyncError> {
    pack_into(root, Vec::new()).map(|(buf, _)| buf)
}

/// Pack `root` into the file at `dest`, creating parent directories.
pub fn pack_to_file(root: &Path, dest: &Path) -> Result<PackSummary, SyncError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = File::create(dest).map_err(|e| io_err(dest, e))?;
    let (writer, summary) = pack_into(root, BufWriter::new(file))?;
    writer
        .into_inner()
        .map_err(|e| io_err(dest, e.into_error()))?
        .sync_all()
        .map_err(|e| io_err(dest, e))?;
    Ok(summary)
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
) -> Result<Option<u64>, SyncError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    let meta = file.metadata().map_err(|e| io_err(path, e))?;

    let mut header = Header::new_gnu();
    header.set_metadata(&meta);
    header.set_entry_type(EntryType::Regular);
    header.set_size(meta.len());
    header.set_mode(perm::mode_bits(&meta) & 0o7777);

    builder
        .append_data(&mut header, name, (&mut file).take(meta.len()))
        .map_err(|e| io_err(path, e))?;
    Ok(Some(meta.len()))
}

fn append_symlink<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
) -> Result<(), SyncError> {
    let target = fs::read_link(path).map_err(|e| io_err(path, e))?;
    let meta = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;

    let mut header = Header::new_gnu();
    header.set_metadata(&meta);
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);

    builder
        .append_link(&mut header, name, link_target_name(&target))
        .map_err(|e| io_err(path, e))
}

#[cfg(windows)]
fn link_target_name(target: &Path) -> String {
    target.to_string_lossy().replace('\\', "/")
}

#[cfg(not(windows))]
fn link_target_name(target: &Path) -> String {
    target.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Unpack
// ---------------------------------------------------------------------------

/// Extract a gzip-compressed tar stream under `dest`.
pub fn unpack<R: Read>(source: R, dest: &Path) -> Result<UnpackSummary, SyncError> {
    let mut archive = Archive::new(GzDecoder::new(source));
    let mut summary = UnpackSummary::default();

    for entry in archive.entries().map_err(|e| io_err(dest, e))? {
        let mut entry = entry.map_err(|e| io_err(dest, e))?;
        let name = entry.path().map_err(|e| io_err(dest, e))?.into_owned();
        let rel = contained(&name)?;
        let target = dest.join(&rel);
        no_symlinked_ancestors(dest, &rel)?;

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {
                let mode = entry.header().mode().map_err(|e| io_err(&target, e))?;
                ensure_parent(&target)?;
                if is_symlink(&target)? {
                    fs::remove_file(&target).map_err(|e| io_err(&target, e))?;
                }
                let mut file = File::create(&target).map_err(|e| io_err(&target, e))?;
                io::copy(&mut entry, &mut file).map_err(|e| io_err(&target, e))?;
                drop(file);
                perm::set_mode(&target, mode).map_err(|e| io_err(&target, e))?;
                summary.files += 1;
            }
            EntryType::Link => {
                let link = required_link_name(&mut entry, &target)?;
                let source_rel = contained(&link)?;
                no_symlinked_ancestors(dest, &source_rel)?;
                let source = dest.join(&source_rel);
                ensure_parent(&target)?;
                match fs::hard_link(&source, &target) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                    Err(err) => return Err(io_err(&target, err)),
                }
                summary.links += 1;
            }
            EntryType::Symlink => {
                let link = required_link_name(&mut entry, &target)?;
                ensure_parent(&target)?;
                match make_symlink(&link, &target) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                    Err(err) => return Err(io_err(&target, err)),
                }
                summary.links += 1;
            }
            EntryType::Directory => {
                let mode = entry.header().mode().map_err(|e| io_err(&target, e))?;
                if is_symlink(&target)? {
                    return Err(SyncError::UnsafeEntryPath {
                        path: name.display().to_string(),
                    });
                }
                fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
                perm::set_mode(&target, mode).map_err(|e| io_err(&target, e))?;
                summary.dirs += 1;
            }
            other => {
                tracing::debug!("skipping {other:?} entry {}", name.display());
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Rebuild an entry name from its normal components, rejecting anything
/// that could resolve outside the destination.
fn contained(name: &Path) -> Result<PathBuf, SyncError> {
    let mut out = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::UnsafeEntryPath {
                    path: name.display().to_string(),
                })
            }
        }
    }
    Ok(out)
}

fn required_link_name<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    target: &Path,
) -> Result<PathBuf, SyncError> {
    match entry.link_name().map_err(|e| io_err(target, e))? {
        Some(link) => Ok(link.into_owned()),
        None => Err(io_err(
            target,
            io::Error::new(ErrorKind::InvalidData, "link entry without a target"),
        )),
    }
}

/// Reject `rel` if an existing directory on its way under `dest` is a
/// symlink, which an earlier entry could have planted to redirect writes.
fn no_symlinked_ancestors(dest: &Path, rel: &Path) -> Result<(), SyncError> {
    let mut current = dest.to_path_buf();
    let mut parents = rel.components();
    parents.next_back();
    for part in parents {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(SyncError::UnsafeEntryPath {
                    path: rel.display().to_string(),
                })
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) => return Err(io_err(&current, err)),
        }
    }
    Ok(())
}

fn is_symlink(path: &Path) -> Result<bool, SyncError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(meta.file_type().is_symlink()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

fn ensure_parent(path: &Path) -> Result<(), SyncError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| io_err(parent, e)),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn make_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn make_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link, target)
}
