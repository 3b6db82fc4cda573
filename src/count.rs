use ignore::WalkBuilder;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, trace};
use zip::ZipArchive;
use zip::read::ZipFile;
use zip::result::ZipError;

const CLASS_SUFFIXES: [&str; 2] = [".class", ".groovy"];
const ARCHIVE_SUFFIXES: [&str; 2] = [".war", ".jar"];

/// How a file or archive entry contributes to the loaded-classes count, judged by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Class,
    Archive,
    Other,
}

impl UnitKind {
    pub fn of(name: &str) -> Self {
        if CLASS_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            UnitKind::Class
        } else if ARCHIVE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            UnitKind::Archive
        } else {
            UnitKind::Other
        }
    }
}

/// Nested archives are named `outer.war!/WEB-INF/lib/inner.jar`.
#[derive(Debug, Error)]
pub enum CountError {
    #[error("Failed to walk application directory: {}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("Failed to open archive: {archive}")]
    ArchiveOpen {
        archive: String,
        #[source]
        source: ZipError,
    },

    #[error("Failed to read entry #{index} of archive: {archive}")]
    ArchiveEntry {
        archive: String,
        index: usize,
        #[source]
        source: ZipError,
    },

    #[error("Failed to extract nested archive {entry} from {archive}")]
    Extraction {
        archive: String,
        entry: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CountError>;

/// Counts class-like units under an application root, unwrapping every level of
/// WAR/JAR nesting.
///
/// Nested archives are extracted one at a time into a fresh temporary directory
/// that is removed as soon as the archive has been counted, so at most one
/// extraction per nesting level exists on disk at any moment.
#[derive(Debug, Clone, Default)]
pub struct ClassCounter {
    scratch_dir: Option<PathBuf>,
}

impl ClassCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract nested archives below `dir` instead of the system temp directory.
    pub fn with_scratch_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: Some(dir.into()),
        }
    }

    pub fn count_classes(&self, root: &Path) -> Result<u64> {
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(true)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut count = 0u64;
        for entry in walker {
            let entry = entry.map_err(|source| CountError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            if entry.depth() == 0 || entry.file_type().is_some_and(|t| t.is_dir()) {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            match UnitKind::of(&name) {
                UnitKind::Class => count += 1,
                UnitKind::Archive => {
                    let label = entry.path().display().to_string();
                    count += self.count_archive_file(entry.path(), &label)?;
                }
                UnitKind::Other => {}
            }
        }

        debug!(root = %root.display(), count, "counted application classes");
        Ok(count)
    }

    fn count_archive_file(&self, path: &Path, label: &str) -> Result<u64> {
        let open_failed = |source: ZipError| CountError::ArchiveOpen {
            archive: label.to_string(),
            source,
        };

        let file = File::open(path).map_err(|e| open_failed(e.into()))?;
        // SAFETY: The file is opened read-only and outlives the mapping, which is
        // dropped before this function returns.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| open_failed(e.into()))?;
        let mut archive = ZipArchive::new(Cursor::new(&mmap[..])).map_err(open_failed)?;

        debug!(archive = label, entries = archive.len(), "counting archive");
        self.count_archive(&mut archive, label)
    }

    fn count_archive<R: Read + Seek>(&self, archive: &mut ZipArchive<R>, label: &str) -> Result<u64> {
        let mut count = 0u64;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|source| CountError::ArchiveEntry {
                    archive: label.to_string(),
                    index,
                    source,
                })?;

            match UnitKind::of(entry.name()) {
                UnitKind::Class => count += 1,
                UnitKind::Archive => count += self.count_nested(&mut entry, label)?,
                UnitKind::Other => {}
            }
        }
        Ok(count)
    }

    fn count_nested(&self, entry: &mut ZipFile<'_>, label: &str) -> Result<u64> {
        let entry_name = entry.name().to_string();
        let extraction_failed = |source: io::Error| CountError::Extraction {
            archive: label.to_string(),
            entry: entry_name.clone(),
            source,
        };

        // Removed on drop, including when counting the nested archive fails.
        let scratch = self.scratch().map_err(extraction_failed)?;
        let extracted = scratch.path().join("archive");
        {
            let mut out = File::create(&extracted).map_err(extraction_failed)?;
            io::copy(entry, &mut out).map_err(extraction_failed)?;
        }
        trace!(entry = %entry_name, path = %extracted.display(), "extracted nested archive");

        let nested_label = format!("{label}!/{entry_name}");
        self.count_archive_file(&extracted, &nested_label)
    }

    fn scratch(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("memory-calculator-");
        match &self.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
    }
}

/// Count class-like units under `root` using the system temp directory for
/// nested extractions.
pub fn count_classes(root: &Path) -> Result<u64> {
    ClassCounter::new().count_classes(root)
}
