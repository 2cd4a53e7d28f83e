//! Build: assemble a mod directory tree into one save document.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::ModError;
use crate::files::{DirExplorer, JsonReader};
use crate::handler::{PATH_SUFFIX, TextField, TextSources};
use crate::objects::{JSON_EXTENSION, parse_object_states, print_all};
use crate::reverser::{OBJECT_STATES, OBJECT_STATES_ORDER, ROOT_FILE};
use crate::util::{replace_key, string_list, take_string_list};

/// Timestamp layout of the `Date` field, e.g. `Mon Jan  2 15:04:05 UTC 2006`.
pub const DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Z %Y";

/// Reassembles a save document from `config.json`, modsettings and the
/// object tree.
#[derive(Debug, Clone, Copy)]
pub struct Generator<'a> {
    pub config: &'a Config,
    /// Holds `config.json`.
    pub root: &'a dyn JsonReader,
    pub modsettings: &'a dyn JsonReader,
    pub objects: &'a dyn JsonReader,
    pub explorer: &'a dyn DirExplorer,
    pub text: TextSources<'a>,
}

impl Generator<'_> {
    pub fn generate(&self) -> Result<Map<String, Value>> {
        self.generate_at(Utc::now())
    }

    /// Build the document, stamping it with `now`.
    pub fn generate_at(&self, now: DateTime<Utc>) -> Result<Map<String, Value>> {
        let mut data = self
            .root
            .read_object(ROOT_FILE)
            .with_context(|| format!("Failed to read {}", ROOT_FILE))?;

        for key in &self.config.string_keys {
            TextField::for_key(key)
                .read(&mut data, self.text)
                .with_context(|| format!("Failed to assemble {}", key))?;
        }
        for key in &self.config.object_keys {
            if let Some(file) = self.take_path(&mut data, key)? {
                let object = self
                    .modsettings
                    .read_object(&file)
                    .with_context(|| format!("Failed to read {} from {}", key, file))?;
                replace_key(&mut data, &path_key(key), key, Value::Object(object));
            }
        }
        for key in &self.config.object_array_keys {
            if let Some(file) = self.take_path(&mut data, key)? {
                let objects = self
                    .modsettings
                    .read_object_array(&file)
                    .with_context(|| format!("Failed to read {} from {}", key, file))?;
                let objects = objects.into_iter().map(Value::Object).collect();
                replace_key(&mut data, &path_key(key), key, Value::Array(objects));
            }
        }

        let order = match data.get(OBJECT_STATES_ORDER) {
            None => None,
            Some(value) => Some(string_list(OBJECT_STATES_ORDER, value)?),
        };
        if order.is_none() && self.has_object_files()? {
            return Err(ModError::Shape {
                key: OBJECT_STATES_ORDER.to_owned(),
                expected: "a list of root object files",
                found: "nothing".to_owned(),
            }
            .into());
        }
        if let Some(order) = order {
            let objects = self.objects_in_order(Some(&order))?;
            info!("Assembled {} root objects", objects.len());
            let objects = objects.into_iter().map(Value::Object).collect();
            replace_key(&mut data, OBJECT_STATES_ORDER, OBJECT_STATES, Value::Array(objects));
        }

        data.insert(
            "Date".to_owned(),
            Value::String(now.format(DATE_FORMAT).to_string()),
        );
        data.insert("EpochTime".to_owned(), Value::from(now.timestamp()));
        Ok(data)
    }

    /// Assemble only the object array.
    ///
    /// The order comes from `ObjectStates_order` in `config.json` when that
    /// file exists, and from the sorted listing of the objects directory
    /// otherwise.
    pub fn generate_objects(&self) -> Result<Vec<Map<String, Value>>> {
        let order = match self.root.read_object(ROOT_FILE) {
            Ok(mut data) => take_string_list(&mut data, OBJECT_STATES_ORDER)?,
            Err(err) if ModError::is_not_found(&err) => None,
            Err(err) => return Err(err).with_context(|| format!("Failed to read {}", ROOT_FILE)),
        };
        self.objects_in_order(order.as_deref())
    }

    fn objects_in_order(&self, order: Option<&[String]>) -> Result<Vec<Map<String, Value>>> {
        let nodes = parse_object_states(order, self.objects, self.explorer)
            .context("Failed to read the object tree")?;
        print_all(nodes, self.text)
    }

    fn has_object_files(&self) -> Result<bool> {
        let listing = self.explorer.list("")?;
        Ok(listing.files.iter().any(|file| file.ends_with(JSON_EXTENSION)))
    }

    /// Remove and return `<key>_path`, refusing a key given both ways.
    fn take_path(&self, data: &mut Map<String, Value>, key: &str) -> Result<Option<String>> {
        let path_key = path_key(key);
        let path = match data.get(&path_key) {
            None => return Ok(None),
            Some(Value::String(path)) => path.clone(),
            Some(other) => return Err(ModError::shape(&path_key, "a string", other).into()),
        };
        if data.contains_key(key) {
            return Err(ModError::Shape {
                key: path_key,
                expected: "a modsettings reference or an inline value, not both",
                found: "both".to_owned(),
            }
            .into());
        }
        Ok(Some(path))
    }
}

fn path_key(key: &str) -> String {
    format!("{}{}", key, PATH_SUFFIX)
}
