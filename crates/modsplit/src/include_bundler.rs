//! Textual `<Include src="..."/>` expansion for XML UI documents.
//!
//! An expanded fragment is fenced by two identical
//! `<!-- include NAME -->` comments so it can be cut back out later.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ModError;
use crate::files::TextReader;
use crate::module_bundler::{Bundle, ROOT_MODULE};
use crate::util::with_extension;

pub const XML_EXTENSION: &str = ".xml";

static INCLUDE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^([ \t]*)<Include src="([^"]+)"\s*/>[ \t]*(\r?)$"#)
        .expect("Invalid regex pattern for include directives")
});

static INCLUDE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([ \t]*)<!-- include (.+?) -->[ \t]*(\r?)$")
        .expect("Invalid regex pattern for include markers")
});

fn indent_lines(text: &str, indent: &str) -> String {
    if indent.is_empty() {
        return text.to_owned();
    }
    text.split('\n')
        .map(|line| format!("{}{}", indent, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expand every include directive in `markup`, recursively.
///
/// A directive must sit alone on its line. Fragments are fetched as
/// `NAME.xml` unless the name already ends in `.xml`. A fragment that
/// (transitively) includes itself is rejected.
pub fn bundle(markup: &str, resolver: &dyn TextReader) -> Result<String> {
    let mut active = Vec::new();
    expand(markup, resolver, &mut active)
}

fn expand(markup: &str, resolver: &dyn TextReader, active: &mut Vec<String>) -> Result<String> {
    let mut out = Vec::new();
    for (idx, line) in markup.split('\n').enumerate() {
        let Some(caps) = INCLUDE_DIRECTIVE.captures(line) else {
            if line.contains("<Include") {
                return Err(ModError::Grammar(format!(
                    "malformed include directive on line {}: {}",
                    idx + 1,
                    line.trim()
                ))
                .into());
            }
            out.push(line.to_owned());
            continue;
        };
        let (indent, name, line_end) = (&caps[1], &caps[2], &caps[3]);

        let file = with_extension(name, XML_EXTENSION);
        if active.contains(&file) {
            let mut chain = active.clone();
            chain.push(file);
            return Err(ModError::IncludeCycle { chain }.into());
        }

        debug!("Including {} at depth {}", file, active.len());
        let fragment = resolver
            .read_text(&file)
            .with_context(|| format!("Failed to resolve include `{}`", name))?;
        active.push(file);
        let expanded = expand(&fragment, resolver, active)
            .with_context(|| format!("Failed to expand include `{}`", name))?;
        active.pop();

        let marker = format!("{}<!-- include {} -->{}", indent, name, line_end);
        out.push(marker.clone());
        out.push(indent_lines(&expanded, indent));
        out.push(marker);
    }
    Ok(out.join("\n"))
}

struct OpenInclude {
    name: String,
    indent: String,
    start: usize,
}

fn parse_marker(line: &str) -> Option<(String, String, String)> {
    INCLUDE_MARKER
        .captures(line)
        .map(|caps| (caps[1].to_owned(), caps[2].to_owned(), caps[3].to_owned()))
}

/// Cut every fenced fragment back out of `markup`.
///
/// Each fragment is replaced by an include directive at the indentation of
/// its opening marker; what remains is stored as the root.
pub fn unbundle_all(markup: &str) -> Result<Bundle> {
    let mut lines: Vec<String> = markup.split('\n').map(str::to_owned).collect();
    let mut stack: Vec<OpenInclude> = Vec::new();
    let mut modules = BTreeMap::new();

    let mut ln = 0;
    while ln < lines.len() {
        let Some((indent, name, line_end)) = parse_marker(&lines[ln]) else {
            ln += 1;
            continue;
        };

        let closes_top = stack.last().is_some_and(|open| open.name == name);
        if !closes_top {
            stack.push(OpenInclude {
                name,
                indent,
                start: ln,
            });
            ln += 1;
            continue;
        }

        let Some(open) = stack.pop() else { break };
        let content = lines[open.start + 1..ln]
            .iter()
            .map(|line| line.strip_prefix(open.indent.as_str()).unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(previous) = modules.insert(open.name.clone(), content) {
            if previous != modules[&open.name] {
                warn!("Fragment `{}` appears more than once with different content", open.name);
            }
        }

        let directive = format!("{}<Include src=\"{}\"/>{}", open.indent, open.name, line_end);
        lines.splice(open.start..=ln, [directive]);
        ln = open.start + 1;
    }

    if let Some(open) = stack.last() {
        return Err(ModError::Grammar(format!(
            "include `{}` opened on line {} is never closed",
            open.name,
            open.start + 1
        ))
        .into());
    }

    modules.insert(ROOT_MODULE.to_owned(), lines.join("\n"));
    Ok(Bundle {
        root: ROOT_MODULE.to_owned(),
        modules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryFiles;
    use pretty_assertions::assert_eq;

    const MAIN: &str = r#"<Canvas raycastTarget="false">
  <Defaults>
    <Button color="a"/>
  </Defaults>

  <Include src="ui/CameraControl"/>
  <Include src="ui/Shop"/>

</Canvas>
"#;

    const SHOP: &str = r#"<Panel id="shop.window" class="drag"
       offsetXY="480 -70"
       width="260" height="500">
       <Include src="deep"/>
</Panel>"#;

    const CAMERA: &str = r#"<Panel id="CameraControl"
       visibility="false"
</Panel>
"#;

    const DEEP: &str = "<Button id=\"deepinclude\">\n</Button>";

    const BUNDLED: &str = r#"<!-- include Main -->
<Canvas raycastTarget="false">
  <Defaults>
    <Button color="a"/>
  </Defaults>

  <!-- include ui/CameraControl -->
  <Panel id="CameraControl"
         visibility="false"
  </Panel>
  
  <!-- include ui/CameraControl -->
  <!-- include ui/Shop -->
  <Panel id="shop.window" class="drag"
         offsetXY="480 -70"
         width="260" height="500">
         <!-- include deep -->
         <Button id="deepinclude">
         </Button>
         <!-- include deep -->
  </Panel>
  <!-- include ui/Shop -->

</Canvas>

<!-- include Main -->
"#;

    fn fragments() -> MemoryFiles {
        let files = MemoryFiles::new();
        files.insert("Main.xml", MAIN);
        files.insert("ui/Shop.xml", SHOP);
        files.insert("ui/CameraControl.xml", CAMERA);
        files.insert("deep.xml", DEEP);
        files
    }

    #[test]
    fn test_bundle_expands_nested_includes() {
        let got = bundle("<Include src=\"Main\"/>\n", &fragments()).unwrap();
        assert_eq!(got, BUNDLED);
    }

    #[test]
    fn test_bundle_without_includes_is_identity() {
        let text = "<Panel>\n  <Text>hi</Text>\n</Panel>";
        assert_eq!(bundle(text, &MemoryFiles::new()).unwrap(), text);
    }

    #[test]
    fn test_bundle_accepts_explicit_extension() {
        let files = MemoryFiles::new();
        files.insert("deep.xml", DEEP);
        let got = bundle("<Include src=\"deep.xml\"/>", &files).unwrap();
        insta::assert_snapshot!(got, @r#"
        <!-- include deep.xml -->
        <Button id="deepinclude">
        </Button>
        <!-- include deep.xml -->
        "#);
    }

    #[test]
    fn test_unbundle_all_recovers_fragments() {
        let got = unbundle_all(BUNDLED).unwrap();
        assert_eq!(got.modules["__root"], "<Include src=\"Main\"/>\n");
        assert_eq!(got.modules["Main"], MAIN);
        assert_eq!(got.modules["ui/Shop"], SHOP);
        assert_eq!(got.modules["ui/CameraControl"], CAMERA);
        assert_eq!(got.modules["deep"], DEEP);
        assert_eq!(got.modules.len(), 5);
    }

    #[test]
    fn test_unbundle_unterminated_marker_fails() {
        let err = unbundle_all("<!-- include Main -->\n<Panel/>\n").unwrap_err();
        assert!(err.to_string().contains("Main"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let files = MemoryFiles::new();
        files.insert("a.xml", "<Include src=\"b\"/>");
        files.insert("b.xml", "  <Include src=\"a\"/>");
        let err = bundle("<Include src=\"a\"/>", &files).unwrap_err();
        let cycle = err
            .chain()
            .find_map(|cause| match cause.downcast_ref::<ModError>() {
                Some(ModError::IncludeCycle { chain }) => Some(chain.clone()),
                _ => None,
            })
            .expect("cycle error in chain");
        assert_eq!(cycle, vec!["a.xml", "b.xml", "a.xml"]);
    }

    #[test]
    fn test_malformed_directive_is_grammar_error() {
        let err = bundle("<Include source='x'/>", &MemoryFiles::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<ModError>(), Some(ModError::Grammar(_))));
    }

    #[test]
    fn test_directive_sharing_a_line_is_grammar_error() {
        let files = MemoryFiles::new();
        files.insert("x.xml", "<Text/>");
        let err = bundle("<Panel><Include src=\"x\"/></Panel>", &files).unwrap_err();
        assert!(matches!(err.downcast_ref::<ModError>(), Some(ModError::Grammar(_))));
        assert!(err.to_string().contains("line 1"));

        let nested = "<Panel>\n  <Include src=\"x\"/> <Text/>\n</Panel>";
        let err = bundle(nested, &files).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_fragment_is_not_found() {
        let err = bundle("  <Include src=\"gone\"/>", &MemoryFiles::new()).unwrap_err();
        assert!(ModError::is_not_found(&err));
    }
}
