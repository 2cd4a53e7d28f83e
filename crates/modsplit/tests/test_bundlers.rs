#![allow(clippy::disallowed_methods)]

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use modsplit::files::{ReadChain, TextFiles, TextReader};
use modsplit::module_bundler::{self, ROOT_MODULE};
use modsplit::{ModError, include_bundler};

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

const ROOT_SCRIPT: &str = "local deck = require(\"game/deck\")\nlocal json = require(\"json\")\n\nfunction onLoad()\n  deck.shuffle()\nend\n";

#[test]
fn test_modules_found_across_roots() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let vendor = dir.path().join("vendor");
    write(&src, "game/deck.ttslua", "local util = require(\"game/util\")\nreturn { shuffle = util.shuffle }");
    write(&src, "game/util.ttslua", "return { shuffle = function() end }");
    write(&vendor, "json.ttslua", "return {}");
    // Shadowed by the earlier root.
    write(&vendor, "game/util.ttslua", "error('wrong root')");

    let files = TextFiles::new(vec![src.clone(), vendor], src);
    let bundled = module_bundler::bundle(ROOT_SCRIPT, &files).unwrap();
    assert!(module_bundler::is_bundled(&bundled));

    let bundle = module_bundler::unbundle_all(&bundled).unwrap();
    let names: Vec<_> = bundle.modules.keys().map(String::as_str).collect();
    assert_eq!(names, vec![ROOT_MODULE, "game/deck", "game/util", "json"]);
    assert_eq!(bundle.root_text(), Some(ROOT_SCRIPT));
    assert_eq!(bundle.modules["game/util"], "return { shuffle = function() end }");
    assert_eq!(module_bundler::unbundle(&bundled).unwrap(), ROOT_SCRIPT);
}

#[test]
fn test_missing_module_names_the_module() {
    let dir = TempDir::new().unwrap();
    let files = TextFiles::rooted(dir.path());
    let err = module_bundler::bundle(ROOT_SCRIPT, &files).unwrap_err();
    assert!(ModError::is_not_found(&err));
    assert!(format!("{:#}", err).contains("game/deck"));
}

#[test]
fn test_sidecar_directory_is_a_fallback_root() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "objects/json.ttslua", "return {}");
    write(dir.path(), "src/game/deck.ttslua", "return {}");
    let src = TextFiles::rooted(dir.path().join("src"));
    let objects = TextFiles::rooted(dir.path().join("objects"));
    let chain = ReadChain::new(vec![&src as &dyn TextReader, &objects]);

    let bundled = module_bundler::bundle(ROOT_SCRIPT, &chain).unwrap();
    let bundle = module_bundler::unbundle_all(&bundled).unwrap();
    assert_eq!(bundle.modules["json"], "return {}");
}

#[test]
fn test_includes_from_disk() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "ui/menu.xml", "<VerticalLayout>\n  <Include src=\"ui/button.xml\"/>\n</VerticalLayout>");
    write(dir.path(), "ui/button.xml", "<Button onClick=\"start\">Start</Button>");
    let files = TextFiles::rooted(dir.path());

    let markup = "<Panel>\n    <Include src=\"ui/menu\"/>\n</Panel>";
    let bundled = include_bundler::bundle(markup, &files).unwrap();
    insta::assert_snapshot!(bundled, @r#"
    <Panel>
        <!-- include ui/menu -->
        <VerticalLayout>
          <!-- include ui/button.xml -->
          <Button onClick="start">Start</Button>
          <!-- include ui/button.xml -->
        </VerticalLayout>
        <!-- include ui/menu -->
    </Panel>
    "#);

    let bundle = include_bundler::unbundle_all(&bundled).unwrap();
    assert_eq!(bundle.root_text(), Some(markup));
    assert_eq!(bundle.modules["ui/button.xml"], "<Button onClick=\"start\">Start</Button>");
}

#[test]
fn test_include_cycle_is_reported() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.xml", "<Include src=\"b\"/>");
    write(dir.path(), "b.xml", "<Include src=\"a\"/>");
    let files = TextFiles::rooted(dir.path());

    let err = include_bundler::bundle("<Include src=\"a\"/>", &files).unwrap_err();
    let cycle = err
        .chain()
        .find_map(|cause| match cause.downcast_ref::<ModError>() {
            Some(ModError::IncludeCycle { chain }) => Some(chain.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(cycle, vec!["a.xml", "b.xml", "a.xml"]);
}
