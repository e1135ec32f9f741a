use std::collections::VecDeque;
use std::fmt;
use std::io::{Cursor, Read};

use bytes::Bytes;

use crate::error::{StoreError, StoreResult};

/// A file or directory handed to, or returned from, a store.
///
/// A leaf is a single-pass byte stream: [`File::reader`] yields the bytes
/// once. A directory is a single-pass sequence of children: each call to
/// [`File::next_file`] hands out the next child, and `Ok(None)` marks the end.
/// Leaves fail `next_file` with [`StoreError::NotDirectory`]; directories fail
/// `reader` with [`StoreError::NotReader`].
pub trait File: Send {
    /// Display name (base name for directories).
    fn file_name(&self) -> &str;

    /// Full logical path. Empty until the file is placed in a directory.
    fn full_path(&self) -> &str;

    fn is_directory(&self) -> bool;

    /// The underlying byte stream of a leaf.
    fn reader(&mut self) -> StoreResult<&mut (dyn Read + Send)>;

    /// The next child of a directory, or `None` once exhausted.
    fn next_file(&mut self) -> StoreResult<Option<Box<dyn File>>>;

    /// Update the logical path. Implementations without a settable path
    /// ignore this.
    fn set_path(&mut self, _path: &str) {}

    /// Read the remaining bytes of a leaf.
    fn read_all(&mut self) -> StoreResult<Vec<u8>> {
        let name = self.file_name().to_string();
        let mut buf = Vec::new();
        self.reader()?
            .read_to_end(&mut buf)
            .map_err(|e| StoreError::io(format!("error reading from file {name:?}"), e))?;
        Ok(buf)
    }
}

impl<F: File + ?Sized> File for Box<F> {
    fn file_name(&self) -> &str {
        (**self).file_name()
    }

    fn full_path(&self) -> &str {
        (**self).full_path()
    }

    fn is_directory(&self) -> bool {
        (**self).is_directory()
    }

    fn reader(&mut self) -> StoreResult<&mut (dyn Read + Send)> {
        (**self).reader()
    }

    fn next_file(&mut self) -> StoreResult<Option<Box<dyn File>>> {
        (**self).next_file()
    }

    fn set_path(&mut self, path: &str) {
        (**self).set_path(path)
    }
}

/// Join a directory path and a child name the way a filesystem path would.
pub fn join_path(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    match dir.trim_end_matches('/') {
        "" if dir.starts_with('/') => format!("/{name}"),
        "" => name.to_string(),
        dir => format!("{dir}/{name}"),
    }
}

/// Split a child name into its directory part and base name.
fn split_name(name: &str) -> (&str, &str) {
    let name = name.trim_start_matches('/');
    name.rsplit_once('/').unwrap_or(("", name))
}

// ---------------------------------------------------------------------------
// Memfile
// ---------------------------------------------------------------------------

/// In-memory leaf file over any byte source.
pub struct Memfile {
    name: String,
    path: String,
    reader: Box<dyn Read + Send>,
}

impl Memfile {
    /// A leaf backed by a byte buffer.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::from_reader(name, Cursor::new(data.into()))
    }

    /// A leaf backed by an arbitrary reader, consumed once.
    pub fn from_reader(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            reader: Box::new(reader),
        }
    }

    /// Set the full path up front (builder style).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

impl File for Memfile {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn full_path(&self) -> &str {
        &self.path
    }

    fn is_directory(&self) -> bool {
        false
    }

    fn reader(&mut self) -> StoreResult<&mut (dyn Read + Send)> {
        Ok(self.reader.as_mut())
    }

    fn next_file(&mut self) -> StoreResult<Option<Box<dyn File>>> {
        Err(StoreError::NotDirectory)
    }

    fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }
}

impl fmt::Debug for Memfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memfile")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Memdir
// ---------------------------------------------------------------------------

/// A child of a [`Memdir`].
///
/// Nested in-memory directories are kept concrete so they can be found and
/// extended by name; anything else is held as an opaque [`File`].
pub enum Entry {
    Dir(Memdir),
    File(Box<dyn File>),
}

impl Entry {
    pub fn file_name(&self) -> &str {
        match self {
            Self::Dir(dir) => dir.file_name(),
            Self::File(file) => file.file_name(),
        }
    }

    fn set_path(&mut self, path: &str) {
        match self {
            Self::Dir(dir) => dir.set_path(path),
            Self::File(file) => file.set_path(path),
        }
    }

    fn into_file(self) -> Box<dyn File> {
        match self {
            Self::Dir(dir) => Box::new(dir),
            Self::File(file) => file,
        }
    }
}

impl From<Memdir> for Entry {
    fn from(dir: Memdir) -> Self {
        Self::Dir(dir)
    }
}

impl From<Memfile> for Entry {
    fn from(file: Memfile) -> Self {
        Self::File(Box::new(file))
    }
}

impl From<Box<dyn File>> for Entry {
    fn from(file: Box<dyn File>) -> Self {
        Self::File(file)
    }
}

/// In-memory directory: an ordered list of children under a path.
///
/// Children keep insertion order. Adding a child sets its path to
/// `join(dir, child name)`, and [`File::set_path`] on the directory
/// re-roots the whole subtree.
///
/// ```
/// use cafs_store::{Memdir, Memfile};
///
/// let tree = Memdir::new("/a")
///     .with(Memfile::from_bytes("a.txt", "foo"))
///     .with(Memdir::new("/c").with(Memfile::from_bytes("d.txt", "baz")));
/// assert_eq!(tree.len(), 2);
/// ```
pub struct Memdir {
    path: String,
    children: VecDeque<Entry>,
}

impl Memdir {
    /// An empty directory at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            children: VecDeque::new(),
        }
    }

    /// Append a child and return the directory (builder style).
    pub fn with(mut self, child: impl Into<Entry>) -> Self {
        self.add_child(child);
        self
    }

    /// Append a child, placing it under this directory's path.
    ///
    /// A child whose name carries directory segments (`x/y/f.txt`) is filed
    /// into those nested directories, which are created if missing.
    pub fn add_child(&mut self, child: impl Into<Entry>) {
        let mut entry = child.into();
        let (dirs, base) = split_name(entry.file_name());
        let (dirs, base) = (dirs.to_string(), base.to_string());
        let dir = self.make_dir_p(&dirs);
        entry.set_path(&join_path(&dir.path, &base));
        dir.children.push_back(entry);
    }

    /// Append each child in turn, as [`Memdir::add_child`] does.
    pub fn add_children<I>(&mut self, children: I)
    where
        I: IntoIterator,
        I::Item: Into<Entry>,
    {
        for child in children {
            self.add_child(child);
        }
    }

    /// Number of children not yet handed out by `next_file`.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` if no children remain.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The child directory named `name`. `""`, `"."` and `"/"` name `self`.
    pub fn child_dir(&mut self, name: &str) -> Option<&mut Memdir> {
        if matches!(name, "" | "." | "/") {
            return Some(self);
        }
        self.children.iter_mut().find_map(|entry| match entry {
            Entry::Dir(dir) if dir.file_name() == name => Some(dir),
            _ => None,
        })
    }

    /// Find or create the nested directory at relative path `rel`.
    pub fn make_dir_p(&mut self, rel: &str) -> &mut Memdir {
        let rel = rel.trim_matches('/');
        let (first, rest) = rel.split_once('/').unwrap_or((rel, ""));
        if matches!(first, "" | ".") {
            return if rest.is_empty() {
                self
            } else {
                self.make_dir_p(rest)
            };
        }

        let existing = self
            .children
            .iter()
            .position(|entry| matches!(entry, Entry::Dir(dir) if dir.file_name() == first));
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.add_child(Memdir::new(first));
                self.children.len() - 1
            }
        };
        match &mut self.children[idx] {
            Entry::Dir(dir) => dir.make_dir_p(rest),
            Entry::File(_) => unreachable!("index was chosen for a directory entry"),
        }
    }
}

impl File for Memdir {
    fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
    }

    fn full_path(&self) -> &str {
        &self.path
    }

    fn is_directory(&self) -> bool {
        true
    }

    fn reader(&mut self) -> StoreResult<&mut (dyn Read + Send)> {
        Err(StoreError::NotReader)
    }

    fn next_file(&mut self) -> StoreResult<Option<Box<dyn File>>> {
        Ok(self.children.pop_front().map(Entry::into_file))
    }

    fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
        for child in self.children.iter_mut() {
            let child_path = join_path(path, split_name(child.file_name()).1);
            child.set_path(&child_path);
        }
    }
}

impl fmt::Debug for Memdir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.children.iter().map(Entry::file_name).collect();
        f.debug_struct("Memdir")
            .field("path", &self.path)
            .field("children", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

/// Depth-first, pre-order traversal of a file tree.
///
/// `visit` is called with every node and its depth (the root is depth 0)
/// before the node's children. Directories are consumed by the walk.
pub fn walk<F>(root: &mut dyn File, mut visit: F) -> StoreResult<()>
where
    F: FnMut(&mut dyn File, usize) -> StoreResult<()>,
{
    walk_inner(root, 0, &mut visit)
}

fn walk_inner(
    file: &mut dyn File,
    depth: usize,
    visit: &mut dyn FnMut(&mut dyn File, usize) -> StoreResult<()>,
) -> StoreResult<()> {
    visit(file, depth)?;
    if file.is_directory() {
        while let Some(mut child) = file.next_file()? {
            walk_inner(child.as_mut(), depth + 1, visit)?;
        }
    }
    Ok(())
}
