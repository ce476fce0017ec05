//! Static resource lookup and memory mapping under a document root.

use bytes::Bytes;
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// World-readable permission bit.
const OTHERS_READ: u32 = 0o004;

/// Outcome of looking a request path up under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Found { path: PathBuf, len: u64 },
    NotFound,
    Forbidden,
}

/// Response payload: a read-only file mapping or an in-memory page.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Mapped(Mmap),
    Inline(Bytes),
}

impl Body {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Mapped(map) => &map[..],
            Body::Inline(bytes) => &bytes[..],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Missing files and directories are `NotFound`; files without the
    /// world-readable bit and paths escaping the root are `Forbidden`.
    pub fn resolve(&self, request_path: &str) -> Resolved {
        let relative = request_path
            .split('?')
            .next()
            .unwrap_or(request_path)
            .trim_start_matches('/');
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Resolved::Forbidden;
        }

        let path = self.root.join(relative);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                if meta.permissions().mode() & OTHERS_READ == 0 {
                    Resolved::Forbidden
                } else {
                    Resolved::Found {
                        path,
                        len: meta.len(),
                    }
                }
            }
            _ => Resolved::NotFound,
        }
    }

    /// Maps the file read-only. Empty files produce [`Body::Empty`] since a
    /// zero-length mapping is not allowed.
    pub fn map(&self, path: &Path) -> io::Result<Body> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Body::Empty);
        }
        // SAFETY: read-only mapping; the file must not be truncated while mapped.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Body::Mapped(map))
    }
}
