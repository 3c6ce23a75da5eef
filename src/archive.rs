//! Tar archive construction for container copies
//!
//! Builds in-memory tar archives from a directory tree, a zip file, or a
//! single blob. Entries are re-owned to a fixed uid/gid; modes and mtimes
//! of directory trees are preserved. Windows targets get the layer layout
//! Windows daemons import: `Files/` and `Hives/` roots, every parent
//! directory written once before its children.

use crate::error::{PackError, PackResult};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tar::{EntryType, Header};
use walkdir::WalkDir;

/// Predicate deciding whether a source path is copied
pub type FileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// 1980-01-01T00:00:01Z, used for generated files
pub const NORMALIZED_MTIME: u64 = 315_532_801;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

const LAYER_FILES: &str = "Files";
const LAYER_HIVES: &str = "Hives";

/// Archive layout expected by the target container OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarFlavor {
    Posix,
    /// Windows layer tar: drive-less names under `Files/`, relative to `c:\`
    Windows,
}

/// Where an archive must be extracted and how its entries are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarTarget {
    /// Container path the archive is extracted into
    pub copy_root: String,
    /// Entry-name prefix standing in for the destination directory
    pub prefix: String,
    pub flavor: TarFlavor,
}

impl TarTarget {
    /// Split an absolute container destination into copy root and entry prefix
    pub fn for_destination(dst: &str, flavor: TarFlavor) -> Self {
        match flavor {
            TarFlavor::Posix => Self {
                copy_root: "/".to_string(),
                prefix: dst.trim_matches('/').to_string(),
                flavor,
            },
            TarFlavor::Windows => {
                let without_drive = match dst.split_once(':') {
                    Some((drive, rest)) if drive.len() == 1 => rest,
                    _ => dst,
                };
                Self {
                    copy_root: "c:\\".to_string(),
                    prefix: without_drive
                        .replace('\\', "/")
                        .trim_matches('/')
                        .to_string(),
                    flavor,
                }
            }
        }
    }

    fn entry_name(&self, relative: &Path) -> String {
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        match (self.prefix.is_empty(), relative.is_empty()) {
            (true, _) => relative,
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{}", self.prefix, relative),
        }
    }
}

/// Ownership and selection rules for archive entries
#[derive(Clone)]
pub struct ArchiveOptions {
    pub uid: u32,
    pub gid: u32,
    /// Emit an entry for the destination directory itself
    pub include_root: bool,
    pub filter: Option<FileFilter>,
}

impl ArchiveOptions {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            include_root: true,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<FileFilter>) -> Self {
        self.filter = filter;
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(path))
    }
}

/// Tar writer that lays entries out for a [`TarFlavor`]
pub struct LayerWriter {
    builder: tar::Builder<Vec<u8>>,
    flavor: TarFlavor,
    /// Directories already written, Windows layout only
    written: HashSet<String>,
}

impl LayerWriter {
    pub fn new(flavor: TarFlavor) -> Self {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        Self {
            builder,
            flavor,
            written: HashSet::new(),
        }
    }

    pub fn append_data<R: Read>(&mut self, header: &mut Header, name: &str, data: R) -> io::Result<()> {
        match self.layer_name(name, header.entry_type())? {
            Some(name) => self.builder.append_data(header, name, data),
            None => Ok(()),
        }
    }

    pub fn append_link(&mut self, header: &mut Header, name: &str, link: impl AsRef<Path>) -> io::Result<()> {
        match self.layer_name(name, header.entry_type())? {
            Some(name) => self.builder.append_link(header, name, link),
            None => Ok(()),
        }
    }

    pub fn into_inner(mut self) -> io::Result<Vec<u8>> {
        if self.flavor == TarFlavor::Windows {
            self.init_layer()?;
        }
        self.builder.into_inner()
    }

    /// Final entry name, or `None` for a directory the layout already holds
    fn layer_name(&mut self, name: &str, entry_type: EntryType) -> io::Result<Option<String>> {
        let name = name.trim_start_matches("./").trim_matches('/');
        if self.flavor == TarFlavor::Posix {
            return Ok(Some(name.to_string()));
        }

        self.init_layer()?;
        let full = format!("{}/{}", LAYER_FILES, name);
        let mut parent = LAYER_FILES.to_string();
        let components: Vec<&str> = name.split('/').collect();
        for component in &components[..components.len().saturating_sub(1)] {
            parent = format!("{}/{}", parent, component);
            self.write_layer_dir(&parent)?;
        }

        if entry_type == EntryType::Directory && !self.written.insert(full.clone()) {
            return Ok(None);
        }
        Ok(Some(full))
    }

    fn init_layer(&mut self) -> io::Result<()> {
        if self.written.is_empty() {
            self.write_layer_dir(LAYER_FILES)?;
            self.write_layer_dir(LAYER_HIVES)?;
        }
        Ok(())
    }

    fn write_layer_dir(&mut self, name: &str) -> io::Result<()> {
        if !self.written.insert(name.to_string()) {
            return Ok(());
        }
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(NORMALIZED_MTIME);
        header.set_uid(0);
        header.set_gid(0);
        self.builder.append_data(&mut header, name, io::empty())
    }
}

/// Check whether `path` is a zip archive by its magic bytes
pub fn is_zip(path: &Path) -> PackResult<bool> {
    let mut file =
        File::open(path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == ZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(PackError::io(format!("reading {}", path.display()), e)),
    }
}

/// Archive a directory or zip file for extraction at `target`
pub fn tar_from_path(
    src: &Path,
    target: &TarTarget,
    options: &ArchiveOptions,
) -> PackResult<Vec<u8>> {
    if !src.exists() {
        return Err(PackError::PathNotFound(src.to_path_buf()));
    }

    let mut builder = LayerWriter::new(target.flavor);

    if src.is_dir() {
        write_dir_to_tar(&mut builder, src, target, options)?;
    } else if is_zip(src)? {
        write_zip_to_tar(&mut builder, src, target, options)?;
    } else {
        return Err(PackError::archive(
            src.display().to_string(),
            "app path must be a directory or zip file",
        ));
    }

    builder
        .into_inner()
        .map_err(|e| PackError::archive(src.display().to_string(), e))
}

/// Archive holding a single file at container path `path`
pub fn single_file_tar(
    path: &str,
    contents: &[u8],
    mode: u32,
    flavor: TarFlavor,
) -> PackResult<(TarTarget, Vec<u8>)> {
    let target = TarTarget::for_destination(path, flavor);
    let mut builder = LayerWriter::new(flavor);

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_mtime(NORMALIZED_MTIME);
    header.set_uid(0);
    header.set_gid(0);

    builder
        .append_data(&mut header, &target.prefix, contents)
        .map_err(|e| PackError::archive(path, e))?;
    let bytes = builder
        .into_inner()
        .map_err(|e| PackError::archive(path, e))?;

    let root = TarTarget {
        copy_root: target.copy_root,
        prefix: String::new(),
        flavor,
    };
    Ok((root, bytes))
}

fn base_header(entry_type: EntryType, mode: u32, mtime: u64, options: &ArchiveOptions) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(0);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_uid(u64::from(options.uid));
    header.set_gid(u64::from(options.gid));
    header
}

fn write_dir_to_tar(
    builder: &mut LayerWriter,
    src: &Path,
    target: &TarTarget,
    options: &ArchiveOptions,
) -> PackResult<()> {
    let context = src.display().to_string();
    let mut walker = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| PackError::archive(&context, e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| PackError::archive(&context, e))?;
        let is_root = relative.as_os_str().is_empty();

        if is_root && (!options.include_root || target.prefix.is_empty()) {
            continue;
        }
        if !is_root && !options.accepts(entry.path()) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| PackError::archive(&context, e))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        let name = target.entry_name(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let mut header = base_header(EntryType::Directory, file_mode(&metadata, 0o755), mtime, options);
            builder
                .append_data(&mut header, &name, io::empty())
                .map_err(|e| PackError::archive(&context, e))?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())
                .map_err(|e| PackError::io(format!("reading link {}", entry.path().display()), e))?;
            let mut header = base_header(EntryType::Symlink, file_mode(&metadata, 0o777), mtime, options);
            builder
                .append_link(&mut header, &name, &link)
                .map_err(|e| PackError::archive(&context, e))?;
        } else if file_type.is_file() {
            let file = File::open(entry.path())
                .map_err(|e| PackError::io(format!("opening {}", entry.path().display()), e))?;
            let mut header = base_header(EntryType::Regular, file_mode(&metadata, 0o644), mtime, options);
            header.set_size(metadata.len());
            builder
                .append_data(&mut header, &name, file)
                .map_err(|e| PackError::archive(&context, e))?;
        }
        // Sockets, fifos and devices are not copied
    }

    Ok(())
}

fn write_zip_to_tar(
    builder: &mut LayerWriter,
    src: &Path,
    target: &TarTarget,
    options: &ArchiveOptions,
) -> PackResult<()> {
    let context = src.display().to_string();
    let file =
        File::open(src).map_err(|e| PackError::io(format!("opening {}", src.display()), e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| PackError::archive(&context, e))?;

    if options.include_root && !target.prefix.is_empty() {
        let mut header = base_header(EntryType::Directory, 0o755, NORMALIZED_MTIME, options);
        builder
            .append_data(&mut header, &target.prefix, io::empty())
            .map_err(|e| PackError::archive(&context, e))?;
    }

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| PackError::archive(&context, e))?;
        let relative: PathBuf = match entry.enclosed_name() {
            Some(path) => path,
            None => continue,
        };
        if !options.accepts(&relative) {
            continue;
        }

        let name = target.entry_name(&relative);
        let mode = entry.unix_mode().unwrap_or(0);

        if entry.is_dir() {
            let mut header = base_header(EntryType::Directory, permission_bits(mode, 0o755), NORMALIZED_MTIME, options);
            builder
                .append_data(&mut header, &name, io::empty())
                .map_err(|e| PackError::archive(&context, e))?;
            continue;
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| PackError::io(format!("reading {} from {}", name, context), e))?;

        if mode & 0o170000 == 0o120000 {
            let link = String::from_utf8_lossy(&contents).into_owned();
            let mut header = base_header(EntryType::Symlink, 0o777, NORMALIZED_MTIME, options);
            builder
                .append_link(&mut header, &name, link)
                .map_err(|e| PackError::archive(&context, e))?;
        } else {
            let mut header = base_header(EntryType::Regular, permission_bits(mode, 0o644), NORMALIZED_MTIME, options);
            header.set_size(contents.len() as u64);
            builder
                .append_data(&mut header, &name, contents.as_slice())
                .map_err(|e| PackError::archive(&context, e))?;
        }
    }

    Ok(())
}

fn permission_bits(mode: u32, fallback: u32) -> u32 {
    match mode & 0o7777 {
        0 => fallback,
        bits => bits,
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata, _fallback: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata, fallback: u32) -> u32 {
    fallback
}
