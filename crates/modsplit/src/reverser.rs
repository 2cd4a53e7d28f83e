//! Reverse: split one save document into a mod directory tree.

use anyhow::{Context, Result};
use log::{debug, info};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::ModError;
use crate::files::JsonWriter;
use crate::handler::{PATH_SUFFIX, TextField};
use crate::objects::{ObjectSinks, print_object_states};
use crate::smoother::smooth_snap_points;
use crate::util::{replace_key, to_object_array};

pub const ROOT_FILE: &str = "config.json";
pub const OBJECT_STATES: &str = "ObjectStates";
pub const OBJECT_STATES_ORDER: &str = "ObjectStates_order";

/// Fields that change on every save and are regenerated on build.
pub const VOLATILE_KEYS: [&str; 2] = ["Date", "EpochTime"];

/// Splits a save document into `config.json`, modsettings and the object
/// tree.
#[derive(Debug, Clone, Copy)]
pub struct Reverser<'a> {
    pub config: &'a Config,
    /// Receives `config.json`.
    pub root: &'a dyn JsonWriter,
    /// Receives oversized top-level objects and arrays.
    pub modsettings: &'a dyn JsonWriter,
    /// Receives the object tree and every text sidecar.
    pub objects: ObjectSinks<'a>,
}

fn compact_len(value: &impl serde::Serialize, key: &str) -> Result<usize> {
    serde_json::to_string(value)
        .map(|text| text.len())
        .with_context(|| format!("Failed to serialize {}", key))
}

impl Reverser<'_> {
    pub fn reverse(&self, mut data: Map<String, Value>) -> Result<()> {
        for key in VOLATILE_KEYS {
            data.shift_remove(key);
        }

        for key in &self.config.string_keys {
            TextField::for_key(key)
                .write(&mut data, key, self.objects.text)
                .with_context(|| format!("Failed to split {}", key))?;
        }
        for key in &self.config.object_keys {
            self.split_object(&mut data, key)?;
        }
        for key in &self.config.object_array_keys {
            self.split_object_array(&mut data, key)?;
        }

        if let Some(states) = data.get(OBJECT_STATES).cloned() {
            let objects = to_object_array(OBJECT_STATES, states)?;
            let count = objects.len();
            let order = print_object_states(objects, self.objects)
                .context("Failed to write the object tree")?;
            info!("Wrote {} root objects", count);
            let order = order.into_iter().map(Value::String).collect();
            replace_key(&mut data, OBJECT_STATES, OBJECT_STATES_ORDER, Value::Array(order));
        }

        self.root
            .write_object(&data, ROOT_FILE)
            .with_context(|| format!("Failed to write {}", ROOT_FILE))
    }

    fn split_object(&self, data: &mut Map<String, Value>, key: &str) -> Result<()> {
        let object = match data.get(key) {
            None => return Ok(()),
            Some(Value::Object(object)) => object,
            Some(other) => return Err(ModError::shape(key, "an object", other).into()),
        };
        if compact_len(object, key)? < self.config.object_threshold {
            return Ok(());
        }
        let file = format!("{}.json", key);
        debug!("Moving {} to modsettings as {}", key, file);
        self.modsettings
            .write_object(object, &file)
            .with_context(|| format!("Failed to write {}", file))?;
        replace_key(data, key, &format!("{}{}", key, PATH_SUFFIX), Value::String(file));
        Ok(())
    }

    fn split_object_array(&self, data: &mut Map<String, Value>, key: &str) -> Result<()> {
        let Some(value) = data.get(key).cloned() else {
            return Ok(());
        };
        let mut value = Value::Array(
            to_object_array(key, value)?
                .into_iter()
                .map(Value::Object)
                .collect(),
        );
        if key == "SnapPoints" {
            smooth_snap_points(key, &mut value)?;
        }

        if compact_len(&value, key)? < self.config.array_threshold {
            data.insert(key.to_owned(), value);
            return Ok(());
        }
        let objects = to_object_array(key, value)?;
        let file = format!("{}.json", key);
        debug!("Moving {} to modsettings as {}", key, file);
        self.modsettings
            .write_object_array(&objects, &file)
            .with_context(|| format!("Failed to write {}", file))?;
        replace_key(data, key, &format!("{}{}", key, PATH_SUFFIX), Value::String(file));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::{JsonReader, MemoryFiles, TextWriter};
    use crate::handler::TextSinks;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Tree {
        root: MemoryFiles,
        modsettings: MemoryFiles,
        objects: MemoryFiles,
        src: MemoryFiles,
    }

    impl Tree {
        fn new() -> Self {
            Self {
                root: MemoryFiles::new(),
                modsettings: MemoryFiles::new(),
                objects: MemoryFiles::new(),
                src: MemoryFiles::new(),
            }
        }

        fn reverse(&self, config: &Config, document: Value) -> Result<()> {
            let reverser = Reverser {
                config,
                root: &self.root,
                modsettings: &self.modsettings,
                objects: ObjectSinks {
                    json: &self.objects,
                    dirs: &self.objects,
                    text: TextSinks {
                        sidecars: &self.objects,
                        lua_src: config.write_src.then_some(&self.src as &dyn TextWriter),
                        xml_src: None,
                        inline_threshold: config.inline_threshold,
                    },
                },
            };
            reverser.reverse(document.as_object().cloned().unwrap())
        }
    }

    #[test]
    fn test_volatile_keys_are_dropped() {
        let tree = Tree::new();
        tree.reverse(
            &Config::default(),
            json!({"SaveName": "Demo", "Date": "today", "EpochTime": 17, "ObjectStates": []}),
        )
        .unwrap();
        let root = tree.root.read_object(ROOT_FILE).unwrap();
        assert_eq!(Value::Object(root), json!({"SaveName": "Demo", "ObjectStates_order": []}));
    }

    #[test]
    fn test_long_strings_move_to_sidecars() {
        let tree = Tree::new();
        let note = "n".repeat(81);
        tree.reverse(
            &Config::default(),
            json!({"SaveName": "Demo", "Note": note, "LuaScript": "print(1)"}),
        )
        .unwrap();
        let root = tree.root.read_object(ROOT_FILE).unwrap();
        let keys: Vec<_> = root.keys().cloned().collect();
        assert_eq!(keys, vec!["SaveName", "Note_path", "LuaScript"]);
        assert_eq!(root["Note_path"], json!("Note.txt"));
        assert_eq!(tree.objects.get("Note.txt"), Some(note));
    }

    #[test]
    fn test_expected_string_must_be_a_string() {
        let tree = Tree::new();
        let err = tree
            .reverse(&Config::default(), json!({"SaveName": 4}))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("SaveName"));
    }

    #[test]
    fn test_large_settings_move_to_modsettings() {
        let tree = Tree::new();
        let config = Config {
            object_threshold: 20,
            array_threshold: 30,
            ..Config::default()
        };
        tree.reverse(
            &config,
            json!({
                "Grid": {"Type": 0, "Lines": false, "Snapping": false},
                "Hands": {"Enable": true},
                "CustomUIAssets": [{"Name": "a", "URL": "http://example.com/a.png"}, null],
                "Decals": []
            }),
        )
        .unwrap();
        let root = tree.root.read_object(ROOT_FILE).unwrap();
        assert_eq!(
            Value::Object(root),
            json!({
                "Grid_path": "Grid.json",
                "Hands": {"Enable": true},
                "CustomUIAssets_path": "CustomUIAssets.json",
                "Decals": []
            })
        );
        assert_eq!(
            tree.modsettings.read_object_array("CustomUIAssets.json").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_snap_points_are_smoothed() {
        let tree = Tree::new();
        tree.reverse(
            &Config::default(),
            json!({"SnapPoints": [{"Position": {"x": 1.00049, "y": 2.0, "z": 0.0}, "Rotation": {"y": 180.4}}]}),
        )
        .unwrap();
        let root = tree.root.read_object(ROOT_FILE).unwrap();
        assert_eq!(
            root["SnapPoints"],
            json!([{"Position": {"x": 1.0, "y": 2.0, "z": 0.0}, "Rotation": {"y": 180.0}}])
        );
    }

    #[test]
    fn test_object_states_become_files() {
        let tree = Tree::new();
        tree.reverse(
            &Config::default(),
            json!({"ObjectStates": [{"GUID": "a1", "Nickname": "Deck"}, {"GUID": "b2"}]}),
        )
        .unwrap();
        let root = tree.root.read_object(ROOT_FILE).unwrap();
        assert_eq!(root[OBJECT_STATES_ORDER], json!(["Deck.a1", "b2"]));
        assert!(tree.objects.contains("Deck.a1.json"));
        assert!(tree.objects.contains("b2.json"));
    }

    #[test]
    fn test_modules_written_back_when_asked() {
        let tree = Tree::new();
        let modules = MemoryFiles::new();
        modules.insert("util/math.ttslua", "return { add = function(a, b) return a + b end }");
        let source = crate::module_bundler::bundle(
            "local m = require(\"util/math\")\nprint(m.add(1, 2))",
            &modules,
        )
        .unwrap();
        let config = Config {
            write_src: true,
            ..Config::default()
        };
        tree.reverse(&config, json!({"LuaScript": source})).unwrap();
        assert!(tree.src.contains("util/math.ttslua"));
        assert!(tree.objects.contains("LuaScript.ttslua"));
        let root = tree.root.read_object(ROOT_FILE).unwrap();
        assert_eq!(root["LuaScript_path"], json!("LuaScript.ttslua"));
    }
}
