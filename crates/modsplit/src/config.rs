use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::combine::Combine;
use crate::dirs::{ConfigSource, config_files};

/// Settings that shape how a mod directory is split and assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Roots searched for required Lua modules, relative to the mod directory
    pub lua_src: Vec<PathBuf>,

    /// Roots searched for included XML fragments
    pub xml_src: Vec<PathBuf>,

    /// Directory holding oversized top-level settings
    pub modsettings_dir: PathBuf,

    /// Directory holding the object tree
    pub objects_dir: PathBuf,

    /// Write unbundled modules and fragments back to the first source root
    pub write_src: bool,

    /// Text longer than this many characters moves to a sidecar file
    pub inline_threshold: usize,

    /// Compact JSON length at which a top-level object moves to modsettings
    pub object_threshold: usize,

    /// Compact JSON length at which a top-level object array moves to modsettings
    pub array_threshold: usize,

    /// Top-level keys holding text
    pub string_keys: Vec<String>,

    /// Top-level keys holding a JSON object
    pub object_keys: Vec<String>,

    /// Top-level keys holding an array of JSON objects
    pub object_array_keys: Vec<String>,
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| (*key).to_owned()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lua_src: vec![PathBuf::from("src")],
            xml_src: vec![PathBuf::from("xml")],
            modsettings_dir: PathBuf::from("modsettings"),
            objects_dir: PathBuf::from("objects"),
            write_src: false,
            inline_threshold: 80,
            object_threshold: 100,
            array_threshold: 200,
            string_keys: owned(&[
                "SaveName",
                "Date",
                "VersionNumber",
                "GameMode",
                "GameType",
                "GameComplexity",
                "Table",
                "Sky",
                "Note",
                "LuaScript",
                "LuaScriptState",
                "XmlUI",
            ]),
            object_keys: owned(&[
                "TabStates",
                "MusicPlayer",
                "Grid",
                "Lighting",
                "Hands",
                "ComponentTags",
                "Turns",
            ]),
            object_array_keys: owned(&[
                "CameraStates",
                "DecalPallet",
                "CustomUIAssets",
                "SnapPoints",
                "Decals",
            ]),
        }
    }
}

/// One configuration layer: a config file or the environment.
///
/// Unset fields fall through to the layers below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub lua_src: Option<Vec<PathBuf>>,
    pub xml_src: Option<Vec<PathBuf>>,
    pub modsettings_dir: Option<PathBuf>,
    pub objects_dir: Option<PathBuf>,
    pub write_src: Option<bool>,
    pub inline_threshold: Option<usize>,
    pub object_threshold: Option<usize>,
    pub array_threshold: Option<usize>,
    pub string_keys: Option<Vec<String>>,
    pub object_keys: Option<Vec<String>>,
    pub object_array_keys: Option<Vec<String>>,
}

impl Combine for ConfigLayer {
    fn combine(self, other: Self) -> Self {
        Self {
            lua_src: self.lua_src.combine(other.lua_src),
            xml_src: self.xml_src.combine(other.xml_src),
            modsettings_dir: self.modsettings_dir.combine(other.modsettings_dir),
            objects_dir: self.objects_dir.combine(other.objects_dir),
            write_src: self.write_src.combine(other.write_src),
            inline_threshold: self.inline_threshold.combine(other.inline_threshold),
            object_threshold: self.object_threshold.combine(other.object_threshold),
            array_threshold: self.array_threshold.combine(other.array_threshold),
            string_keys: self.string_keys.combine(other.string_keys),
            object_keys: self.object_keys.combine(other.object_keys),
            object_array_keys: self.object_array_keys.combine(other.object_array_keys),
        }
    }
}

impl ConfigLayer {
    /// Read a layer from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Read the `MODSPLIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build a layer from an arbitrary variable lookup.
    ///
    /// Source roots are path lists in the platform's `PATH` format. An
    /// unrecognized boolean is ignored; an unparsable number is an error.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut layer = Self::default();

        if let Some(value) = var("MODSPLIT_LUA_SRC") {
            layer.lua_src = path_list(&value);
        }
        if let Some(value) = var("MODSPLIT_XML_SRC") {
            layer.xml_src = path_list(&value);
        }
        if let Some(value) = var("MODSPLIT_WRITE_SRC") {
            layer.write_src = parse_bool(&value);
            if layer.write_src.is_none() {
                log::warn!("Ignoring MODSPLIT_WRITE_SRC={value}: not a boolean");
            }
        }
        if let Some(value) = var("MODSPLIT_INLINE_THRESHOLD") {
            let threshold = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid MODSPLIT_INLINE_THRESHOLD: {}", value))?;
            layer.inline_threshold = Some(threshold);
        }

        Ok(layer)
    }

    /// Fill `config` with every field this layer sets.
    pub fn apply_to(self, mut config: Config) -> Config {
        if let Some(lua_src) = self.lua_src {
            config.lua_src = lua_src;
        }
        if let Some(xml_src) = self.xml_src {
            config.xml_src = xml_src;
        }
        if let Some(modsettings_dir) = self.modsettings_dir {
            config.modsettings_dir = modsettings_dir;
        }
        if let Some(objects_dir) = self.objects_dir {
            config.objects_dir = objects_dir;
        }
        if let Some(write_src) = self.write_src {
            config.write_src = write_src;
        }
        if let Some(threshold) = self.inline_threshold {
            config.inline_threshold = threshold;
        }
        if let Some(threshold) = self.object_threshold {
            config.object_threshold = threshold;
        }
        if let Some(threshold) = self.array_threshold {
            config.array_threshold = threshold;
        }
        if let Some(keys) = self.string_keys {
            config.string_keys = keys;
        }
        if let Some(keys) = self.object_keys {
            config.object_keys = keys;
        }
        if let Some(keys) = self.object_array_keys {
            config.object_array_keys = keys;
        }
        config
    }
}

fn path_list(value: &str) -> Option<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = env::split_paths(value)
        .filter(|path| !path.as_os_str().is_empty())
        .collect();
    (!paths.is_empty()).then_some(paths)
}

/// Parse a boolean value from string, supporting various common formats
fn parse_bool(value: &str) -> Option<bool> {
    use cow_utils::CowUtils;
    match value.trim().cow_to_lowercase().as_ref() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration with hierarchical precedence:
    /// 1. CLI-provided config path (highest precedence)
    /// 2. Environment variables (MODSPLIT_*)
    /// 3. Project config (modsplit.toml in current directory)
    /// 4. User config (~/.config/modsplit/modsplit.toml)
    /// 5. System config (/etc/xdg/modsplit/modsplit.toml or equivalent)
    /// 6. Default values (lowest precedence)
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        let mut files = config_files(cli_config_path).into_iter().peekable();
        let mut layers = Vec::new();

        if let Some((ConfigSource::Cli, path)) = files.next_if(|(source, _)| *source == ConfigSource::Cli) {
            layers.push(
                ConfigLayer::load_from_file(&path)
                    .with_context(|| format!("Failed to load {} from {:?}", ConfigSource::Cli, path))?,
            );
        }
        layers.push(ConfigLayer::from_env()?);
        for (source, path) in files {
            log::debug!("Loading {} from: {:?}", source, path);
            layers.push(
                ConfigLayer::load_from_file(&path)
                    .with_context(|| format!("Failed to load {} from {:?}", source, path))?,
            );
        }

        Self::from_layers(layers)
    }

    /// Merge layers given highest precedence first, then validate.
    pub fn from_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Result<Self> {
        let merged = layers
            .into_iter()
            .fold(ConfigLayer::default(), |upper, lower| upper.combine(lower));
        let config = merged.apply_to(Self::default());
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("inline_threshold", self.inline_threshold),
            ("object_threshold", self.object_threshold),
            ("array_threshold", self.array_threshold),
        ] {
            if value == 0 {
                bail!("`{}` must be greater than zero", name);
            }
        }

        for (name, dir) in [
            ("modsettings_dir", &self.modsettings_dir),
            ("objects_dir", &self.objects_dir),
        ] {
            if dir.as_os_str().is_empty() {
                bail!("`{}` must not be empty", name);
            }
            if dir.is_absolute() {
                bail!("`{}` must be relative to the mod directory, got {:?}", name, dir);
            }
        }
        if self.modsettings_dir == self.objects_dir {
            bail!(
                "`modsettings_dir` and `objects_dir` must differ, both are {:?}",
                self.objects_dir
            );
        }

        for (name, roots) in [("lua_src", &self.lua_src), ("xml_src", &self.xml_src)] {
            if roots.iter().any(|root| root.as_os_str().is_empty()) {
                bail!("`{}` contains an empty path", name);
            }
        }
        for (name, keys) in [
            ("string_keys", &self.string_keys),
            ("object_keys", &self.object_keys),
            ("object_array_keys", &self.object_array_keys),
        ] {
            if keys.iter().any(String::is_empty) {
                bail!("`{}` contains an empty key", name);
            }
        }
        Ok(())
    }

    /// Lua search roots resolved against the mod directory.
    pub fn lua_roots(&self, moddir: &Path) -> Vec<PathBuf> {
        self.lua_src.iter().map(|root| moddir.join(root)).collect()
    }

    /// XML search roots resolved against the mod directory.
    pub fn xml_roots(&self, moddir: &Path) -> Vec<PathBuf> {
        self.xml_src.iter().map(|root| moddir.join(root)).collect()
    }
}
