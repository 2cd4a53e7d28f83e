//! The object tree: nested save-game objects and their file-tree layout.
//!
//! On disk every object is one `<name>.json` file. Contained objects and
//! alternate states live in a subdirectory named by `ContainedObjects_path`;
//! their order is kept in `ContainedObjects_order` and `States_path` since a
//! directory listing cannot be trusted for it.

use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::ModError;
use crate::files::{DirCreator, DirExplorer, JsonReader, JsonWriter};
use crate::handler::{TextField, TextSinks, TextSources};
use crate::smoother::smooth_object;
use crate::util::{
    join_logical, non_empty_str, sanitize_label, take_string, take_string_list, to_object_array,
    unique_stem,
};

pub const GUID: &str = "GUID";
pub const CONTAINED_OBJECTS: &str = "ContainedObjects";
pub const CONTAINED_PATH: &str = "ContainedObjects_path";
pub const CONTAINED_ORDER: &str = "ContainedObjects_order";
pub const STATES: &str = "States";
pub const STATES_PATH: &str = "States_path";
pub const JSON_EXTENSION: &str = ".json";

/// One object of the save graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    pub guid: String,
    /// Every field not modelled below, in document order.
    pub data: Map<String, Value>,
    pub children: Vec<ObjectNode>,
    /// File stems of `children`, filled in on the file-tree side only.
    pub child_order: Vec<String>,
    /// Alternate states keyed by state id.
    pub states: IndexMap<String, ObjectNode>,
    /// Subdirectory holding children and states, once known.
    pub child_dir: Option<String>,
}

/// Writers used while laying a graph out as files.
#[derive(Debug, Clone, Copy)]
pub struct ObjectSinks<'a> {
    pub json: &'a dyn JsonWriter,
    pub dirs: &'a dyn DirCreator,
    pub text: TextSinks<'a>,
}

fn guid_of(data: &Map<String, Value>) -> Result<String> {
    match data.get(GUID) {
        None => Err(ModError::MissingGuid.into()),
        Some(Value::String(guid)) => Ok(guid.clone()),
        Some(other) => Err(ModError::shape(GUID, "a string", other).into()),
    }
}

fn parent_dir(name: &str) -> &str {
    name.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn json_file(dir: &str, stem: &str) -> String {
    join_logical(dir, &format!("{}{}", stem, JSON_EXTENSION))
}

/// Remove `key` unless it holds an empty array or object. Empty containers
/// stay with the node's own fields so they survive a round trip.
fn take_populated(data: &mut Map<String, Value>, key: &str) -> Option<Value> {
    let empty = match data.get(key)? {
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty { None } else { data.shift_remove(key) }
}

/// Check `dir` holds nothing besides `listed` object files and the
/// `claimed` subdirectories.
fn check_listing(
    dir: &str,
    listed: &IndexSet<String>,
    claimed: &IndexSet<String>,
    explorer: &dyn DirExplorer,
) -> Result<()> {
    let listing = explorer
        .list(dir)
        .with_context(|| format!("Failed to list {}", dir))?;
    for folder in &listing.folders {
        if !claimed.contains(folder.as_str()) {
            return Err(ModError::not_found(format!("object claiming directory {}", folder)).into());
        }
    }
    for file in &listing.files {
        if file.ends_with(JSON_EXTENSION) && !listed.contains(file.as_str()) {
            warn!("Skipping {}: not listed by its parent object", file);
        }
    }
    Ok(())
}

impl ObjectNode {
    /// Build a node, and its descendants, from an assembled JSON object.
    pub fn from_json(mut data: Map<String, Value>) -> Result<Self> {
        let guid = guid_of(&data)?;
        smooth_object(&mut data).with_context(|| format!("Failed to smooth object {}", guid))?;

        let children = match take_populated(&mut data, CONTAINED_OBJECTS) {
            None => Vec::new(),
            Some(value) => to_object_array(CONTAINED_OBJECTS, value)?
                .into_iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Failed to read contained objects of {}", guid))?,
        };

        let mut states = IndexMap::new();
        match take_populated(&mut data, STATES) {
            None => {}
            Some(Value::Object(raw)) => {
                for (id, state) in raw {
                    let state = match state {
                        Value::Object(state) => state,
                        other => {
                            return Err(ModError::shape(format!("{}.{}", STATES, id), "an object", &other).into());
                        }
                    };
                    let node = Self::from_json(state)
                        .with_context(|| format!("Failed to read state {} of {}", id, guid))?;
                    states.insert(id, node);
                }
            }
            Some(other) => return Err(ModError::shape(STATES, "an object", &other).into()),
        }

        Ok(Self {
            guid,
            data,
            children,
            child_order: Vec::new(),
            states,
            child_dir: None,
        })
    }

    /// Load the node stored at `file`, following its child references.
    ///
    /// The child directory may hold no folder that no child claims; object
    /// files nobody lists are skipped with a warning.
    pub fn from_file(file: &str, json: &dyn JsonReader, explorer: &dyn DirExplorer) -> Result<Self> {
        let mut data = json
            .read_object(file)
            .with_context(|| format!("Failed to read object file {}", file))?;
        let guid = guid_of(&data).with_context(|| format!("Invalid object in {}", file))?;
        smooth_object(&mut data).with_context(|| format!("Failed to smooth object {}", guid))?;

        let child_dir = take_string(&mut data, CONTAINED_PATH)?;
        let order = take_string_list(&mut data, CONTAINED_ORDER)?.unwrap_or_default();
        let state_stems = take_state_stems(&mut data)?;

        if child_dir.is_none() && (!order.is_empty() || !state_stems.is_empty()) {
            return Err(ModError::Shape {
                key: format!("{} in {}", CONTAINED_PATH, file),
                expected: "a directory name",
                found: "nothing".to_owned(),
            }
            .into());
        }
        let inline = take_populated(&mut data, CONTAINED_OBJECTS);
        if !order.is_empty() && inline.is_some() {
            return Err(ModError::OrderMismatch {
                guid,
                expected: order.len(),
                found: order.len() + inline.as_ref().and_then(Value::as_array).map_or(0, Vec::len),
            }
            .into());
        }

        let sub = child_dir
            .as_deref()
            .map(|dir| join_logical(parent_dir(file), dir))
            .unwrap_or_default();

        let mut listed = IndexSet::new();
        let mut claimed = IndexSet::new();
        let mut claim = |node: &Self| {
            if let Some(dir) = &node.child_dir {
                claimed.insert(join_logical(&sub, dir));
            }
        };

        let mut children = Vec::with_capacity(order.len());
        for stem in &order {
            let child_file = json_file(&sub, stem);
            let child = Self::from_file(&child_file, json, explorer)
                .with_context(|| format!("Failed to load child {} of {}", stem, guid))?;
            claim(&child);
            listed.insert(child_file);
            children.push(child);
        }
        if let Some(inline) = inline {
            for child in to_object_array(CONTAINED_OBJECTS, inline)? {
                children.push(Self::from_json(child)?);
            }
        }

        let mut states = IndexMap::new();
        for (id, stem) in state_stems {
            let state_file = json_file(&sub, &stem);
            let state = Self::from_file(&state_file, json, explorer)
                .with_context(|| format!("Failed to load state {} of {}", id, guid))?;
            claim(&state);
            listed.insert(state_file);
            states.insert(id, state);
        }

        if child_dir.is_some() {
            check_listing(&sub, &listed, &claimed, explorer)
                .with_context(|| format!("Invalid children directory of {}", guid))?;
        }

        Ok(Self {
            guid,
            data,
            children,
            child_order: order,
            states,
            child_dir,
        })
    }

    /// Preferred file stem: `label.guid`, or the bare GUID without a label.
    pub fn file_name(&self) -> String {
        let guid = sanitize_label(&self.guid);
        let guid = if guid.is_empty() { "object".to_owned() } else { guid };
        let label = non_empty_str(&self.data, "Nickname")
            .or_else(|| non_empty_str(&self.data, "Name"))
            .map(sanitize_label)
            .unwrap_or_default();
        if label.is_empty() {
            guid
        } else {
            format!("{}.{}", label, guid)
        }
    }

    /// Assemble the node back into a single JSON object, resolving sidecars
    /// and bundling scripts.
    pub fn print(self, sources: TextSources<'_>) -> Result<Map<String, Value>> {
        let Self {
            guid,
            mut data,
            children,
            states,
            ..
        } = self;

        for field in TextField::object_fields() {
            field
                .read(&mut data, sources)
                .with_context(|| format!("Failed to assemble {} of {}", field.key, guid))?;
        }

        if !children.is_empty() {
            let printed = children
                .into_iter()
                .map(|child| child.print(sources).map(Value::Object))
                .collect::<Result<Vec<_>>>()?;
            data.insert(CONTAINED_OBJECTS.to_owned(), Value::Array(printed));
        }
        if !states.is_empty() {
            let mut printed = Map::new();
            for (id, state) in states {
                printed.insert(id, Value::Object(state.print(sources)?));
            }
            data.insert(STATES.to_owned(), Value::Object(printed));
        }
        Ok(data)
    }

    /// Write the node as `<dir>/<stem>.json`, with sidecars and a
    /// subdirectory for its children and states.
    pub fn print_to_file(self, dir: &str, stem: &str, sinks: ObjectSinks<'_>) -> Result<()> {
        let Self {
            guid,
            mut data,
            children,
            child_order,
            states,
            ..
        } = self;

        if !child_order.is_empty() && child_order.len() != children.len() {
            return Err(ModError::OrderMismatch {
                guid,
                expected: child_order.len(),
                found: children.len(),
            }
            .into());
        }

        let sidecar_stem = join_logical(dir, stem);
        for field in TextField::object_fields() {
            field
                .write(&mut data, &sidecar_stem, sinks.text)
                .with_context(|| format!("Failed to split {} of {}", field.key, guid))?;
        }

        if !children.is_empty() || !states.is_empty() {
            let child_dir = sinks
                .dirs
                .create_dir(dir, stem)
                .with_context(|| format!("Failed to create directory for children of {}", guid))?;
            let sub = join_logical(dir, &child_dir);
            debug!("Writing {} children of {} into {}", children.len(), guid, sub);

            let mut used = IndexSet::new();
            let mut order = Vec::with_capacity(children.len());
            for child in children {
                let child_stem = unique_stem(&mut used, &child.file_name());
                let child_guid = child.guid.clone();
                child
                    .print_to_file(&sub, &child_stem, sinks)
                    .with_context(|| format!("Failed to write child {} of {}", child_guid, guid))?;
                order.push(Value::String(child_stem));
            }

            let mut state_stems = Map::new();
            for (id, state) in states {
                let state_stem = unique_stem(&mut used, &state.file_name());
                state
                    .print_to_file(&sub, &state_stem, sinks)
                    .with_context(|| format!("Failed to write state {} of {}", id, guid))?;
                state_stems.insert(id, Value::String(state_stem));
            }

            data.insert(CONTAINED_PATH.to_owned(), Value::String(child_dir));
            if !order.is_empty() {
                data.insert(CONTAINED_ORDER.to_owned(), Value::Array(order));
            }
            if !state_stems.is_empty() {
                data.insert(STATES_PATH.to_owned(), Value::Object(state_stems));
            }
        }

        let file = json_file(dir, stem);
        sinks
            .json
            .write_object(&data, &file)
            .with_context(|| format!("Failed to write {}", file))
    }

    fn collect_guids<'a>(&'a self, seen: &mut IndexSet<&'a str>) {
        if !seen.insert(self.guid.as_str()) {
            warn!("Found duplicate GUID {}", self.guid);
        }
        for child in &self.children {
            child.collect_guids(seen);
        }
        for state in self.states.values() {
            state.collect_guids(seen);
        }
    }
}

fn take_state_stems(data: &mut Map<String, Value>) -> Result<IndexMap<String, String>> {
    let mut stems = IndexMap::new();
    match data.shift_remove(STATES_PATH) {
        None => {}
        Some(Value::Object(raw)) => {
            for (id, stem) in raw {
                match stem {
                    Value::String(stem) => {
                        stems.insert(id, stem);
                    }
                    other => {
                        return Err(ModError::shape(format!("{}.{}", STATES_PATH, id), "a string", &other).into());
                    }
                }
            }
        }
        Some(other) => return Err(ModError::shape(STATES_PATH, "an object", &other).into()),
    }
    Ok(stems)
}

/// Lay out a top-level object array as files, returning the root file
/// stems in array order.
pub fn print_object_states(
    objects: Vec<Map<String, Value>>,
    sinks: ObjectSinks<'_>,
) -> Result<Vec<String>> {
    let mut used = IndexSet::new();
    let mut order = Vec::with_capacity(objects.len());
    for (idx, object) in objects.into_iter().enumerate() {
        let node = ObjectNode::from_json(object)
            .with_context(|| format!("Failed to read object {} of the object states", idx))?;
        let stem = unique_stem(&mut used, &node.file_name());
        let guid = node.guid.clone();
        node.print_to_file("", &stem, sinks)
            .with_context(|| format!("Failed to write object {}", guid))?;
        order.push(stem);
    }
    Ok(order)
}

/// Read every root object file and arrange them by `order`.
///
/// Without an order the files are taken in listing order. Root files the
/// order does not mention are skipped with a warning.
pub fn parse_object_states(
    order: Option<&[String]>,
    json: &dyn JsonReader,
    explorer: &dyn DirExplorer,
) -> Result<Vec<ObjectNode>> {
    let listing = explorer.list("").context("Failed to list the objects directory")?;

    let mut by_stem = IndexMap::new();
    let mut claimed = IndexSet::new();
    for file in &listing.files {
        let Some(stem) = file.strip_suffix(JSON_EXTENSION) else {
            continue;
        };
        let node = ObjectNode::from_file(file, json, explorer)?;
        if let Some(dir) = &node.child_dir {
            claimed.insert(dir.clone());
        }
        by_stem.insert(stem.to_owned(), node);
    }

    for folder in &listing.folders {
        if !claimed.contains(folder.as_str()) {
            return Err(ModError::not_found(format!("object claiming directory {}", folder)).into());
        }
    }

    let nodes = match order {
        None => by_stem.into_values().collect::<Vec<_>>(),
        Some(order) => {
            let mut nodes = Vec::with_capacity(order.len());
            for stem in order {
                let node = by_stem
                    .shift_remove(stem.as_str())
                    .ok_or_else(|| ModError::not_found(json_file("", stem)))?;
                nodes.push(node);
            }
            for stem in by_stem.keys() {
                warn!("Skipping {}{}: not listed in the object order", stem, JSON_EXTENSION);
            }
            nodes
        }
    };

    let mut seen = IndexSet::new();
    for node in &nodes {
        node.collect_guids(&mut seen);
    }
    Ok(nodes)
}

/// Assemble parsed root objects into a JSON array.
pub fn print_all(nodes: Vec<ObjectNode>, sources: TextSources<'_>) -> Result<Vec<Map<String, Value>>> {
    nodes
        .into_iter()
        .map(|node| {
            let guid = node.guid.clone();
            node.print(sources)
                .with_context(|| format!("Object {} did not assemble", guid))
        })
        .collect()
}
