//! Handling of the large text fields that may live beside a JSON document.
//!
//! A [`TextField`] knows how to turn its value into what goes into the
//! assembled document (bundling requires or includes) and how to split it
//! back out again, deciding whether the result stays inline or moves to a
//! sidecar file referenced by `<Key>_path`.

use anyhow::{Context, Result};
use log::debug;
use serde_json::{Map, Value};

use crate::error::ModError;
use crate::files::{TextReader, TextWriter};
use crate::module_bundler::{self, Bundle, LUA_EXTENSION};
use crate::include_bundler::{self, XML_EXTENSION};
use crate::util::{replace_key, with_extension};

/// Suffix that names a field's sidecar reference.
pub const PATH_SUFFIX: &str = "_path";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bundling {
    /// Lua `require` bundling.
    Lua,
    /// XML `<Include>` expansion.
    Xml,
    /// Stored verbatim.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField {
    pub key: String,
    pub extension: &'static str,
    pub bundling: Bundling,
}

/// Where text comes from while assembling a document.
#[derive(Debug, Clone, Copy)]
pub struct TextSources<'a> {
    /// Sidecar files named by `_path` references.
    pub sidecars: &'a dyn TextReader,
    /// Lookup for required Lua modules.
    pub lua: &'a dyn TextReader,
    /// Lookup for included XML fragments.
    pub xml: &'a dyn TextReader,
}

/// Where text goes while splitting a document apart.
#[derive(Debug, Clone, Copy)]
pub struct TextSinks<'a> {
    pub sidecars: &'a dyn TextWriter,
    /// When set, non-root Lua modules are written back as source files.
    pub lua_src: Option<&'a dyn TextWriter>,
    /// When set, non-root XML fragments are written back as source files.
    pub xml_src: Option<&'a dyn TextWriter>,
    /// Text longer than this many characters goes to a sidecar.
    pub inline_threshold: usize,
}

impl TextField {
    pub fn new(key: impl Into<String>, extension: &'static str, bundling: Bundling) -> Self {
        Self {
            key: key.into(),
            extension,
            bundling,
        }
    }

    pub fn lua_script() -> Self {
        Self::new("LuaScript", LUA_EXTENSION, Bundling::Lua)
    }

    pub fn lua_script_state() -> Self {
        Self::new("LuaScriptState", ".luascriptstate", Bundling::Plain)
    }

    pub fn gm_notes() -> Self {
        Self::new("GMNotes", ".gmnotes", Bundling::Plain)
    }

    pub fn xml_ui() -> Self {
        Self::new("XmlUI", XML_EXTENSION, Bundling::Xml)
    }

    /// The externalizable text fields of an object node.
    pub fn object_fields() -> [Self; 4] {
        [
            Self::lua_script(),
            Self::lua_script_state(),
            Self::gm_notes(),
            Self::xml_ui(),
        ]
    }

    /// Field handling for a top-level string key of a save document.
    pub fn for_key(key: &str) -> Self {
        match key {
            "LuaScript" => Self::lua_script(),
            "LuaScriptState" => Self::lua_script_state(),
            "GMNotes" => Self::gm_notes(),
            "XmlUI" => Self::xml_ui(),
            other => Self::new(other, ".txt", Bundling::Plain),
        }
    }

    pub fn path_key(&self) -> String {
        format!("{}{}", self.key, PATH_SUFFIX)
    }

    /// Render `text` the way it appears in an assembled document.
    pub fn bundle(&self, text: &str, sources: TextSources<'_>) -> Result<String> {
        match self.bundling {
            Bundling::Lua => module_bundler::bundle(text, sources.lua),
            Bundling::Xml => include_bundler::bundle(text, sources.xml),
            Bundling::Plain => Ok(text.to_owned()),
        }
    }

    pub fn unbundle(&self, text: &str) -> Result<Bundle> {
        match self.bundling {
            Bundling::Lua => module_bundler::unbundle_all(text),
            Bundling::Xml => include_bundler::unbundle_all(text),
            Bundling::Plain => Ok(Bundle::single(text)),
        }
    }

    fn source_file(&self, module: &str) -> String {
        match self.bundling {
            Bundling::Lua => format!("{}{}", module, LUA_EXTENSION),
            _ => with_extension(module, self.extension),
        }
    }

    /// Resolve the field's inline value or sidecar into its rendered form,
    /// leaving only the inline key in `data`.
    pub fn read(&self, data: &mut Map<String, Value>, sources: TextSources<'_>) -> Result<()> {
        let path_key = self.path_key();
        let inline = match data.get(&self.key) {
            None => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => return Err(ModError::shape(&self.key, "a string", other).into()),
        };
        let sidecar = match data.get(&path_key) {
            None => None,
            Some(Value::String(path)) => Some(path.clone()),
            Some(other) => return Err(ModError::shape(&path_key, "a string", other).into()),
        };

        let text = match (inline, sidecar) {
            (None, None) => return Ok(()),
            (Some(_), Some(_)) => {
                return Err(ModError::Shape {
                    key: path_key,
                    expected: "a sidecar reference or an inline value, not both",
                    found: "both".to_owned(),
                }
                .into());
            }
            (Some(text), None) => text,
            (None, Some(path)) => sources
                .sidecars
                .read_text(&path)
                .with_context(|| format!("Failed to read {} from {}", self.key, path))?,
        };

        let rendered = self
            .bundle(&text, sources)
            .with_context(|| format!("Failed to bundle {}", self.key))?;
        replace_key(data, &path_key, &self.key, Value::String(rendered));
        Ok(())
    }

    /// Split the field's rendered value apart.
    ///
    /// The root text is kept inline when the rendered value is at most
    /// `inline_threshold` characters long, and otherwise written to
    /// `<stem><extension>` with a `_path` reference left in its place.
    pub fn write(&self, data: &mut Map<String, Value>, stem: &str, sinks: TextSinks<'_>) -> Result<()> {
        let path_key = self.path_key();
        if data.contains_key(&path_key) {
            return Err(ModError::Shape {
                key: path_key,
                expected: "no sidecar reference in an assembled document",
                found: "one".to_owned(),
            }
            .into());
        }
        let rendered = match data.get(&self.key) {
            None => return Ok(()),
            Some(Value::String(text)) => text.clone(),
            Some(other) => return Err(ModError::shape(&self.key, "a string", other).into()),
        };

        let bundle = self
            .unbundle(&rendered)
            .with_context(|| format!("Failed to unbundle {}", self.key))?;
        let root = bundle
            .root_text()
            .ok_or_else(|| ModError::Grammar(format!("{} has no root module", self.key)))?;

        let src_writer = match self.bundling {
            Bundling::Lua => sinks.lua_src,
            Bundling::Xml => sinks.xml_src,
            Bundling::Plain => None,
        };
        if let Some(writer) = src_writer {
            for (module, text) in bundle.dependencies() {
                let file = self.source_file(module);
                debug!("Writing {} source {}", self.key, file);
                writer
                    .write_text(text, &file)
                    .with_context(|| format!("Failed to write source {}", file))?;
            }
        }

        if rendered.chars().count() > sinks.inline_threshold {
            let file = format!("{}{}", stem, self.extension);
            debug!("Externalizing {} to {}", self.key, file);
            sinks
                .sidecars
                .write_text(root, &file)
                .with_context(|| format!("Failed to write {}", file))?;
            replace_key(data, &self.key, &path_key, Value::String(file));
        } else {
            data.insert(self.key.clone(), Value::String(root.to_owned()));
        }
        Ok(())
    }
}
