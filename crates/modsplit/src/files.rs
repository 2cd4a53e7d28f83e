//! Collaborators the serializer reads from and writes to.
//!
//! Every name handed to these traits is a logical, `/`-separated path
//! relative to the collaborator's root. The filesystem implementations map
//! those onto real directories; [`MemoryFiles`] keeps everything in maps.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::error::ModError;
use crate::util::{join_logical, to_object_array};

/// How many suffixed names [`DirCreator::create_dir`] tries before giving up.
pub const MAX_DIR_ATTEMPTS: usize = 100;

pub trait TextReader {
    /// Read the text stored under `name`, or fail with [`ModError::NotFound`].
    fn read_text(&self, name: &str) -> Result<String>;
}

pub trait TextWriter {
    fn write_text(&self, text: &str, name: &str) -> Result<()>;
}

pub trait JsonReader {
    fn read_object(&self, name: &str) -> Result<Map<String, Value>>;
    fn read_object_array(&self, name: &str) -> Result<Vec<Map<String, Value>>>;
}

pub trait JsonWriter {
    fn write_object(&self, object: &Map<String, Value>, name: &str) -> Result<()>;
    fn write_object_array(&self, objects: &[Map<String, Value>], name: &str) -> Result<()>;
}

/// Files and folders directly inside one directory, as logical paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

pub trait DirExplorer {
    fn list(&self, dir: &str) -> Result<Listing>;
}

pub trait DirCreator {
    /// Create a directory under `parent`, returning the name actually used.
    ///
    /// Asking twice for the same suggestion under the same parent yields
    /// distinct names within one run.
    fn create_dir(&self, parent: &str, suggestion: &str) -> Result<String>;
}

macro_rules! impl_debug_for_dyn {
    ($($name:ident),+) => {
        $(
            impl std::fmt::Debug for dyn $name + '_ {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(stringify!($name))
                }
            }
        )+
    };
}

impl_debug_for_dyn!(TextReader, TextWriter, JsonReader, JsonWriter, DirExplorer, DirCreator);

/// Reads from several readers, returning the first hit.
#[derive(Debug)]
pub struct ReadChain<'a> {
    readers: Vec<&'a dyn TextReader>,
}

impl<'a> ReadChain<'a> {
    pub fn new(readers: Vec<&'a dyn TextReader>) -> Self {
        Self { readers }
    }
}

impl TextReader for ReadChain<'_> {
    fn read_text(&self, name: &str) -> Result<String> {
        for reader in &self.readers {
            match reader.read_text(name) {
                Ok(text) => return Ok(text),
                Err(err) if ModError::is_not_found(&err) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(ModError::not_found(name).into())
    }
}

fn read_file(path: &Path, name: &str) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ModError::not_found(name).into()),
        Err(err) => Err(err).with_context(|| format!("Failed to read {:?}", path)),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))
}

fn parse_object(text: &str, name: &str) -> Result<Map<String, Value>> {
    let value: Value =
        serde_json::from_str(text).with_context(|| format!("Failed to parse JSON in {}", name))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ModError::shape(name, "an object", &other).into()),
    }
}

fn parse_object_array(text: &str, name: &str) -> Result<Vec<Map<String, Value>>> {
    let value: Value =
        serde_json::from_str(text).with_context(|| format!("Failed to parse JSON in {}", name))?;
    to_object_array(name, value)
}

fn render_json<T: serde::Serialize + ?Sized>(value: &T, name: &str) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", name))?;
    text.push('\n');
    Ok(text)
}

/// Text files found by searching an ordered list of roots.
#[derive(Debug, Clone)]
pub struct TextFiles {
    read_roots: Vec<PathBuf>,
    write_root: PathBuf,
}

impl TextFiles {
    pub fn new(read_roots: Vec<PathBuf>, write_root: PathBuf) -> Self {
        Self {
            read_roots,
            write_root,
        }
    }

    /// Reads and writes under a single directory.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::new(vec![root.clone()], root)
    }
}

impl TextReader for TextFiles {
    fn read_text(&self, name: &str) -> Result<String> {
        for root in &self.read_roots {
            let path = root.join(name);
            if path.is_file() {
                trace!("Reading {} from {:?}", name, root);
                return read_file(&path, name);
            }
        }
        Err(ModError::not_found(name).into())
    }
}

impl TextWriter for TextFiles {
    fn write_text(&self, text: &str, name: &str) -> Result<()> {
        write_file(&self.write_root.join(name), text)
    }
}

/// JSON documents under one root directory.
#[derive(Debug, Clone)]
pub struct JsonFiles {
    root: PathBuf,
}

impl JsonFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl JsonReader for JsonFiles {
    fn read_object(&self, name: &str) -> Result<Map<String, Value>> {
        let text = read_file(&self.root.join(name), name)?;
        parse_object(&text, name)
    }

    fn read_object_array(&self, name: &str) -> Result<Vec<Map<String, Value>>> {
        let text = read_file(&self.root.join(name), name)?;
        parse_object_array(&text, name)
    }
}

impl JsonWriter for JsonFiles {
    fn write_object(&self, object: &Map<String, Value>, name: &str) -> Result<()> {
        write_file(&self.root.join(name), &render_json(object, name)?)
    }

    fn write_object_array(&self, objects: &[Map<String, Value>], name: &str) -> Result<()> {
        write_file(&self.root.join(name), &render_json(objects, name)?)
    }
}

/// Pick the first candidate name not yet handed out and accepted by `free`.
fn choose_dir_name(
    handed_out: &mut IndexMap<String, IndexSet<String>>,
    parent: &str,
    suggestion: &str,
    mut free: impl FnMut(&str) -> Result<bool>,
) -> Result<String> {
    let used = handed_out.entry(parent.to_owned()).or_default();
    for attempt in 0..MAX_DIR_ATTEMPTS {
        let candidate = if attempt == 0 {
            suggestion.to_owned()
        } else {
            format!("{}_{}", suggestion, attempt)
        };
        if used.contains(&candidate) || !free(&candidate)? {
            debug!("Directory name {} taken under {:?}", candidate, parent);
            continue;
        }
        used.insert(candidate.clone());
        return Ok(candidate);
    }
    Err(ModError::NameExhausted {
        parent: parent.to_owned(),
        suggestion: suggestion.to_owned(),
        attempts: MAX_DIR_ATTEMPTS,
    }
    .into())
}

/// Directory listing and creation under one root directory.
#[derive(Debug)]
pub struct DirFiles {
    root: PathBuf,
    handed_out: RefCell<IndexMap<String, IndexSet<String>>>,
}

impl DirFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handed_out: RefCell::new(IndexMap::new()),
        }
    }
}

impl DirExplorer for DirFiles {
    fn list(&self, dir: &str) -> Result<Listing> {
        let base = self.root.join(dir);
        let mut listing = Listing::default();
        if !base.is_dir() {
            return Ok(listing);
        }
        for entry in WalkDir::new(&base).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list {:?}", base))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_dir() {
                listing.folders.push(join_logical(dir, &name));
            } else if entry.file_type().is_file() {
                listing.files.push(join_logical(dir, &name));
            }
        }
        Ok(listing)
    }
}

impl DirCreator for DirFiles {
    fn create_dir(&self, parent: &str, suggestion: &str) -> Result<String> {
        let parent_path = self.root.join(parent);
        let mut handed_out = self.handed_out.borrow_mut();
        let name = choose_dir_name(&mut handed_out, parent, suggestion, |candidate| {
            let path = parent_path.join(candidate);
            Ok(!path.exists() || path.is_dir())
        })?;
        let path = parent_path.join(&name);
        fs::create_dir_all(&path).with_context(|| format!("Failed to create {:?}", path))?;
        Ok(name)
    }
}

/// Every collaborator kept in memory.
///
/// Text and JSON share one namespace, the way they share a directory on
/// disk.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: RefCell<IndexMap<String, String>>,
    dirs: RefCell<IndexSet<String>>,
    handed_out: RefCell<IndexMap<String, IndexSet<String>>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `text` under `name`, creating its parent directories.
    pub fn insert(&self, name: &str, text: impl Into<String>) {
        let mut dir = name;
        while let Some((parent, _)) = dir.rsplit_once('/') {
            self.dirs.borrow_mut().insert(parent.to_owned());
            dir = parent;
        }
        self.files.borrow_mut().insert(name.to_owned(), text.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.files.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.borrow().contains_key(name)
    }

    pub fn has_dir(&self, name: &str) -> bool {
        self.dirs.borrow().contains(name)
    }

    /// All stored file names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }
}

fn parent_of(name: &str) -> &str {
    name.rsplit_once('/').map_or("", |(parent, _)| parent)
}

impl TextReader for MemoryFiles {
    fn read_text(&self, name: &str) -> Result<String> {
        self.get(name)
            .ok_or_else(|| ModError::not_found(name).into())
    }
}

impl TextWriter for MemoryFiles {
    fn write_text(&self, text: &str, name: &str) -> Result<()> {
        self.insert(name, text);
        Ok(())
    }
}

impl JsonReader for MemoryFiles {
    fn read_object(&self, name: &str) -> Result<Map<String, Value>> {
        parse_object(&self.read_text(name)?, name)
    }

    fn read_object_array(&self, name: &str) -> Result<Vec<Map<String, Value>>> {
        parse_object_array(&self.read_text(name)?, name)
    }
}

impl JsonWriter for MemoryFiles {
    fn write_object(&self, object: &Map<String, Value>, name: &str) -> Result<()> {
        self.insert(name, render_json(object, name)?);
        Ok(())
    }

    fn write_object_array(&self, objects: &[Map<String, Value>], name: &str) -> Result<()> {
        self.insert(name, render_json(objects, name)?);
        Ok(())
    }
}

impl DirExplorer for MemoryFiles {
    fn list(&self, dir: &str) -> Result<Listing> {
        let mut files: Vec<String> = self
            .files
            .borrow()
            .keys()
            .filter(|name| parent_of(name) == dir)
            .cloned()
            .collect();
        let mut folders: Vec<String> = self
            .dirs
            .borrow()
            .iter()
            .filter(|name| parent_of(name) == dir && name.as_str() != dir)
            .cloned()
            .collect();
        files.sort();
        folders.sort();
        Ok(Listing { files, folders })
    }
}

impl DirCreator for MemoryFiles {
    fn create_dir(&self, parent: &str, suggestion: &str) -> Result<String> {
        let mut handed_out = self.handed_out.borrow_mut();
        let name = choose_dir_name(&mut handed_out, parent, suggestion, |candidate| {
            Ok(!self.contains(&join_logical(parent, candidate)))
        })?;
        self.dirs.borrow_mut().insert(join_logical(parent, &name));
        Ok(name)
    }
}
