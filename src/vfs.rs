//! In-memory virtual file system.
//!
//! A tree of inodes. Every node owns a lock over its mutable body, and path
//! resolution walks components holding only the lock of the node being
//! inspected, so unrelated subtrees never contend.
//!
//! Paths are absolute (`/a/b/c`). File content carries a non-cryptographic
//! integrity hash computed at write time; it detects accidental corruption
//! only.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::klog::KernelLog;
use crate::stdx::fast_hash;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// VFS caller errors.
#[derive(Debug)]
#[non_exhaustive]
pub enum VfsError {
    NotFound { path: String },
    AlreadyExists { path: String },
    NotADirectory { path: String },
    NotAFile { path: String },
    /// Path is not absolute, or names an empty component.
    MalformedPath { path: String },
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "not found: {path}"),
            Self::AlreadyExists { path } => write!(f, "already exists: {path}"),
            Self::NotADirectory { path } => write!(f, "not a directory: {path}"),
            Self::NotAFile { path } => write!(f, "not a file: {path}"),
            Self::MalformedPath { path } => write!(f, "malformed path: {path}"),
        }
    }
}

impl std::error::Error for VfsError {}

/// One row of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    pub id: u64,
    /// Content bytes for files, child count for directories.
    pub size: usize,
}

struct Inode {
    id: u64,
    kind: NodeKind,
    body: Mutex<InodeBody>,
}

#[derive(Default)]
struct InodeBody {
    data: Vec<u8>,
    content_hash: u64,
    children: BTreeMap<String, Arc<Inode>>,
}

impl Inode {
    fn new(id: u64, kind: NodeKind) -> Arc<Inode> {
        Arc::new(Inode {
            id,
            kind,
            body: Mutex::new(InodeBody::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InodeBody> {
        self.body.lock().expect("inode mutex poisoned")
    }
}

/// Thread-safe in-memory file tree.
pub struct Vfs {
    root: Arc<Inode>,
    next_inode: AtomicU64,
    log: Arc<KernelLog>,
}

impl Vfs {
    pub fn new(log: Arc<KernelLog>) -> Self {
        Self {
            root: Inode::new(0, NodeKind::Directory),
            next_inode: AtomicU64::new(1),
            log,
        }
    }

    /// Creates a file at `path` with `bytes` as content.
    pub fn create_file(&self, path: &str, bytes: &[u8]) -> Result<(), VfsError> {
        let (dir, name) = self.resolve_parent(path)?;
        let mut body = dir.lock();
        if body.children.contains_key(&name) {
            return Err(VfsError::AlreadyExists { path: path.into() });
        }

        let file = Inode::new(self.next_inode.fetch_add(1, Ordering::Relaxed), NodeKind::File);
        {
            let mut file_body = file.lock();
            file_body.data = bytes.to_vec();
            file_body.content_hash = fast_hash(bytes);
        }
        body.children.insert(name, file);
        self.log
            .trace(format!("vfs: created file {path} ({} bytes)", bytes.len()));
        Ok(())
    }

    /// Returns a copy of the file's content.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let node = self.resolve(path)?;
        if node.kind != NodeKind::File {
            return Err(VfsError::NotAFile { path: path.into() });
        }
        let data = node.lock().data.clone();
        Ok(data)
    }

    /// Creates a directory at `path`. The parent must already exist.
    pub fn mkdir(&self, path: &str) -> Result<(), VfsError> {
        let (dir, name) = self.resolve_parent(path)?;
        let mut body = dir.lock();
        if body.children.contains_key(&name) {
            return Err(VfsError::AlreadyExists { path: path.into() });
        }
        let new_dir = Inode::new(
            self.next_inode.fetch_add(1, Ordering::Relaxed),
            NodeKind::Directory,
        );
        body.children.insert(name, new_dir);
        self.log.trace(format!("vfs: created directory {path}"));
        Ok(())
    }

    /// Lists a directory's entries in name order.
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let node = self.resolve(path)?;
        if node.kind != NodeKind::Directory {
            return Err(VfsError::NotADirectory { path: path.into() });
        }

        let children: Vec<(String, Arc<Inode>)> = {
            let body = node.lock();
            body.children
                .iter()
                .map(|(name, child)| (name.clone(), Arc::clone(child)))
                .collect()
        };

        Ok(children
            .into_iter()
            .map(|(name, child)| {
                let body = child.lock();
                let size = match child.kind {
                    NodeKind::File => body.data.len(),
                    NodeKind::Directory => body.children.len(),
                };
                DirEntry {
                    name,
                    kind: child.kind,
                    id: child.id,
                    size,
                }
            })
            .collect())
    }

    /// Integrity hash of a file's content as of its last write.
    pub fn checksum(&self, path: &str) -> Result<u64, VfsError> {
        let node = self.resolve(path)?;
        if node.kind != NodeKind::File {
            return Err(VfsError::NotAFile { path: path.into() });
        }
        let hash = node.lock().content_hash;
        Ok(hash)
    }

    fn resolve(&self, path: &str) -> Result<Arc<Inode>, VfsError> {
        if !path.starts_with('/') {
            return Err(VfsError::MalformedPath { path: path.into() });
        }
        let mut current = Arc::clone(&self.root);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if current.kind != NodeKind::Directory {
                return Err(VfsError::NotADirectory { path: path.into() });
            }
            let child = current.lock().children.get(segment).map(Arc::clone);
            match child {
                Some(child) => current = child,
                None => return Err(VfsError::NotFound { path: path.into() }),
            }
        }
        Ok(current)
    }

    fn resolve_parent(&self, path: &str) -> Result<(Arc<Inode>, String), VfsError> {
        if !path.starts_with('/') {
            return Err(VfsError::MalformedPath { path: path.into() });
        }
        let trimmed = path.trim_end_matches('/');
        let Some((dir_path, name)) = trimmed.rsplit_once('/') else {
            return Err(VfsError::MalformedPath { path: path.into() });
        };
        if name.is_empty() {
            return Err(VfsError::MalformedPath { path: path.into() });
        }
        let dir_path = if dir_path.is_empty() { "/" } else { dir_path };
        let dir = self.resolve(dir_path)?;
        if dir.kind != NodeKind::Directory {
            return Err(VfsError::NotADirectory {
                path: dir_path.into(),
            });
        }
        Ok((dir, name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeKind, Vfs, VfsError};
    use crate::hal::Hal;
    use crate::klog::{KernelLog, Level};
    use crate::stdx::fast_hash;
    use std::sync::Arc;

    fn vfs() -> Vfs {
        let hal = Arc::new(Hal::new());
        Vfs::new(Arc::new(KernelLog::new(hal, 256, Level::Critical)))
    }

    #[test]
    fn create_and_read_roundtrip() {
        let fs = vfs();
        fs.mkdir("/etc").unwrap();
        fs.create_file("/etc/motd", b"hello").unwrap();
        assert_eq!(fs.read_file("/etc/motd").unwrap(), b"hello");
    }

    #[test]
    fn create_in_missing_directory_fails() {
        let fs = vfs();
        assert!(matches!(
            fs.create_file("/missing/file", b""),
            Err(VfsError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let fs = vfs();
        fs.create_file("/a", b"1").unwrap();
        assert!(matches!(
            fs.create_file("/a", b"2"),
            Err(VfsError::AlreadyExists { .. })
        ));
        assert!(matches!(fs.mkdir("/a"), Err(VfsError::AlreadyExists { .. })));
    }

    #[test]
    fn relative_paths_are_malformed() {
        let fs = vfs();
        assert!(matches!(
            fs.read_file("etc/motd"),
            Err(VfsError::MalformedPath { .. })
        ));
        assert!(matches!(
            fs.mkdir("relative"),
            Err(VfsError::MalformedPath { .. })
        ));
    }

    #[test]
    fn reading_a_directory_fails() {
        let fs = vfs();
        fs.mkdir("/dir").unwrap();
        assert!(matches!(
            fs.read_file("/dir"),
            Err(VfsError::NotAFile { .. })
        ));
    }

    #[test]
    fn listing_flags_kinds_and_sizes() {
        let fs = vfs();
        fs.mkdir("/dir").unwrap();
        fs.create_file("/dir/a", b"abc").unwrap();
        fs.mkdir("/dir/sub").unwrap();
        fs.create_file("/dir/sub/inner", b"").unwrap();

        let entries = fs.list("/dir").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].kind, NodeKind::File);
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[1].name, "sub");
        assert_eq!(entries[1].kind, NodeKind::Directory);
        assert_eq!(entries[1].size, 1);
    }

    #[test]
    fn listing_a_file_fails() {
        let fs = vfs();
        fs.create_file("/f", b"x").unwrap();
        assert!(matches!(
            fs.list("/f"),
            Err(VfsError::NotADirectory { .. })
        ));
    }

    #[test]
    fn checksum_matches_content() {
        let fs = vfs();
        fs.create_file("/f", b"payload").unwrap();
        assert_eq!(fs.checksum("/f").unwrap(), fast_hash(b"payload"));
    }

    #[test]
    fn root_lists_top_level_entries() {
        let fs = vfs();
        fs.mkdir("/sys").unwrap();
        fs.mkdir("/proc").unwrap();
        let names: Vec<String> = fs.list("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["proc", "sys"]);
    }

    #[test]
    fn concurrent_writers_target_disjoint_directories() {
        use std::thread;

        let fs = Arc::new(vfs());
        fs.mkdir("/a").unwrap();
        fs.mkdir("/b").unwrap();

        let handles: Vec<_> = [("/a", 0u32), ("/b", 1)]
            .into_iter()
            .map(|(dir, tag)| {
                let fs = Arc::clone(&fs);
                let dir = dir.to_owned();
                thread::spawn(move || {
                    for i in 0..200 {
                        fs.create_file(&format!("{dir}/f{tag}_{i}"), b"x").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(fs.list("/a").unwrap().len(), 200);
        assert_eq!(fs.list("/b").unwrap().len(), 200);
    }
}
