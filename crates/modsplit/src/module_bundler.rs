//! Bundling of Lua `require` graphs into a single script, and back.
//!
//! The bundle format is the one emitted by luabundle: a loader preamble,
//! one `__bundle_register` block per module sorted by name, and a trailer
//! that runs the root module.

use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ModError;
use crate::files::TextReader;

/// Name under which the text that started the bundle is registered.
pub const ROOT_MODULE: &str = "__root";

/// Extension appended to a required module name to locate its source.
pub const LUA_EXTENSION: &str = ".ttslua";

/// Token whose presence marks text as already bundled.
const BUNDLE_MARKER: &str = "__bundle_register";

const PREAMBLE: &str = r#"-- Bundled by luabundle {"version":"1.6.0"}
local __bundle_require, __bundle_loaded, __bundle_register, __bundle_modules = (function(superRequire)
	local loadingPlaceholder = {[{}] = true}

	local register
	local modules = {}

	local require
	local loaded = {}

	register = function(name, body)
		if not modules[name] then
			modules[name] = body
		end
	end

	require = function(name)
		local loadedModule = loaded[name]

		if loadedModule then
			if loadedModule == loadingPlaceholder then
				return nil
			end
		else
			if not modules[name] then
				if not superRequire then
					local identifier = type(name) == 'string' and '\"' .. name .. '\"' or tostring(name)
					error('Tried to require ' .. identifier .. ', but no such module has been registered')
				else
					return superRequire(name)
				end
			end

			loaded[name] = loadingPlaceholder
			loadedModule = modules[name](require, loaded, register, modules)
			loaded[name] = loadedModule
		end

		return loadedModule
	end

	return require, loaded, register, modules
end)(nil)"#;

const REGISTER_OPEN: &str = "__bundle_register(\"";
const REGISTER_HEADER_TAIL: &str =
    "\", function(require, _LOADED, __bundle_register, __bundle_modules)";
const BLOCK_END: &str = "end)";
const TRAILER_CALL: &str = "return __bundle_require(";

static REQUIRE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\brequire\((\\?)""#).expect("Invalid regex pattern for require calls")
});

static MODULE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-A-Za-z0-9/._@]+$").expect("Invalid regex pattern for module names")
});

static ROOT_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"__bundle_require\("([^"]*)"\)"#).expect("Invalid regex pattern for root call")
});

/// Named sources recovered from, or destined for, a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Name of the module the bundle starts from.
    pub root: String,
    /// Every module keyed by name, root included.
    pub modules: BTreeMap<String, String>,
}

impl Bundle {
    /// A bundle holding nothing but `text` as its root.
    pub fn single(text: &str) -> Self {
        let mut modules = BTreeMap::new();
        modules.insert(ROOT_MODULE.to_owned(), text.to_owned());
        Self {
            root: ROOT_MODULE.to_owned(),
            modules,
        }
    }

    pub fn root_text(&self) -> Option<&str> {
        self.modules.get(&self.root).map(String::as_str)
    }

    /// Modules other than the root, in name order.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.modules
            .iter()
            .filter(|(name, _)| **name != self.root)
            .map(|(name, text)| (name.as_str(), text.as_str()))
    }
}

pub fn is_bundled(text: &str) -> bool {
    text.contains(BUNDLE_MARKER)
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Names of the modules `source` requires with a string literal, sorted and
/// deduplicated.
///
/// A call such as `require(name)` is dynamic and ignored; a literal that is
/// unterminated or carries characters outside `[-A-Za-z0-9/._@]` is a
/// grammar error.
pub fn required_modules(source: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for caps in REQUIRE_CALL.captures_iter(source) {
        let Some(call) = caps.get(0) else { continue };
        let escaped = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let quote = if escaped { "\\\"" } else { "\"" };

        let rest = &source[call.end()..];
        let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
        let Some(name_len) = line.find(quote) else {
            return Err(ModError::Grammar(format!(
                "unterminated require on line {}",
                line_of(source, call.start())
            ))
            .into());
        };
        let name = &line[..name_len];
        if !MODULE_NAME.is_match(name) {
            return Err(ModError::Grammar(format!(
                "invalid module name {:?} in require on line {}",
                name,
                line_of(source, call.start())
            ))
            .into());
        }
        if !line[name_len + quote.len()..].starts_with(')') {
            return Err(ModError::Grammar(format!(
                "require of `{}` on line {} is not closed",
                name,
                line_of(source, call.start())
            ))
            .into());
        }
        names.push(name.to_owned());
    }
    names.sort();
    names.dedup();
    Ok(names)
}

/// Bundle `source` with everything it transitively requires.
///
/// Returns `source` untouched when it requires nothing or is already a
/// bundle.
pub fn bundle(source: &str, resolver: &dyn TextReader) -> Result<String> {
    if is_bundled(source) {
        return Ok(source.to_owned());
    }

    let mut modules = BTreeMap::new();
    modules.insert(ROOT_MODULE.to_owned(), source.to_owned());
    let mut queue = VecDeque::from([ROOT_MODULE.to_owned()]);

    while let Some(name) = queue.pop_front() {
        let requires = required_modules(&modules[&name])
            .with_context(|| format!("Failed to scan requires of `{}`", name))?;
        for required in requires {
            if modules.contains_key(&required) {
                continue;
            }
            debug!("Fetching module {} required by {}", required, name);
            let text = resolver
                .read_text(&format!("{}{}", required, LUA_EXTENSION))
                .with_context(|| {
                    format!("Failed to resolve module `{}` required by `{}`", required, name)
                })?;
            modules.insert(required.clone(), text);
            queue.push_back(required);
        }
    }

    if modules.len() == 1 {
        return Ok(source.to_owned());
    }
    Ok(render(&modules))
}

fn render(modules: &BTreeMap<String, String>) -> String {
    let body_len: usize = modules.iter().map(|(k, v)| k.len() + v.len() + 96).sum();
    let mut out = String::with_capacity(PREAMBLE.len() + body_len + 64);
    out.push_str(PREAMBLE);
    out.push('\n');
    for (name, text) in modules {
        out.push_str(REGISTER_OPEN);
        out.push_str(name);
        out.push_str(REGISTER_HEADER_TAIL);
        out.push('\n');
        out.push_str(text);
        out.push('\n');
        out.push_str(BLOCK_END);
        out.push('\n');
    }
    out.push_str(TRAILER_CALL);
    out.push('"');
    out.push_str(ROOT_MODULE);
    out.push_str("\")");
    out
}

fn strip_line_break(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

/// Split the inside of a registration block into its body and whatever
/// follows the block's closing `end)`.
///
/// The closing `end)` must begin a line and be followed by another block,
/// the trailer, or the end of the text. Only the one `line_break` the
/// block header used is taken off the body.
fn split_block<'t>(text: &'t str, line_break: &str) -> Option<(&'t str, &'t str)> {
    let mut from = 0;
    while let Some(found) = text[from..].find(BLOCK_END) {
        let at = from + found;
        from = at + BLOCK_END.len();

        let before = &text[..at];
        let body = match before.strip_suffix(line_break) {
            Some(body) => body,
            None if at == 0 => "",
            None => continue,
        };

        let after = &text[from..];
        let next = after.trim_start();
        if next.is_empty() || next.starts_with(REGISTER_OPEN) || next.starts_with(TRAILER_CALL) {
            return Some((body, after));
        }
    }
    None
}

/// Recover every module from a bundle.
///
/// Text that is not a bundle comes back as a single root module.
pub fn unbundle_all(text: &str) -> Result<Bundle> {
    if !is_bundled(text) {
        return Ok(Bundle::single(text));
    }

    let root = ROOT_CALL
        .captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .map_or_else(|| ROOT_MODULE.to_owned(), |m| m.as_str().to_owned());

    let mut modules = BTreeMap::new();
    let mut rest = text;
    while let Some(start) = rest.find(REGISTER_OPEN) {
        let after_open = &rest[start + REGISTER_OPEN.len()..];
        let name_len = after_open.find('"').ok_or_else(|| {
            ModError::Grammar("registration block has an unterminated module name".to_owned())
        })?;
        let name = &after_open[..name_len];
        let header_rest = after_open[name_len..]
            .strip_prefix(REGISTER_HEADER_TAIL)
            .ok_or_else(|| {
                ModError::Grammar(format!("malformed registration header for module `{}`", name))
            })?;

        let line_break = if header_rest.starts_with("\r\n") { "\r\n" } else { "\n" };
        let (body, remainder) = split_block(strip_line_break(header_rest), line_break)
            .ok_or_else(|| ModError::Grammar(format!("module `{}` is never closed", name)))?;

        if modules.contains_key(name) {
            warn!("Module `{}` is registered twice; keeping the first", name);
        } else {
            modules.insert(name.to_owned(), body.to_owned());
        }
        rest = remainder;
    }

    if !modules.contains_key(&root) {
        return Err(ModError::Grammar(format!("bundle has no root module `{}`", root)).into());
    }
    Ok(Bundle { root, modules })
}

/// The root module's text of a bundle.
pub fn unbundle(text: &str) -> Result<String> {
    let bundle = unbundle_all(text)?;
    bundle
        .root_text()
        .map(str::to_owned)
        .ok_or_else(|| ModError::Grammar(format!("bundle has no root module `{}`", bundle.root)).into())
}
