use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use modsplit::config::Config;
use modsplit::files::{
    DirFiles, JsonFiles, JsonReader, JsonWriter, ReadChain, TextFiles, TextReader, TextWriter,
};
use modsplit::handler::{TextSinks, TextSources};
use modsplit::objects::ObjectSinks;
use modsplit::{Generator, Reverser};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mod directory holding config.json, modsettings and the object tree
    #[arg(long)]
    moddir: PathBuf,

    /// Split a save file into the mod directory instead of building one
    #[arg(long)]
    reverse: bool,

    /// Save file to read when reversing, or to write when building [default: <moddir>/output.json]
    #[arg(long)]
    modfile: Option<PathBuf>,

    /// Build only the object array, without the root settings
    #[arg(long, conflicts_with = "reverse")]
    objects_only: bool,

    /// Write unbundled Lua modules and XML fragments back to the source roots
    #[arg(long)]
    write_src: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Directory and file name of a save file path.
fn split_file(path: &Path) -> Result<(JsonFiles, String)> {
    let name = path
        .file_name()
        .with_context(|| format!("{:?} does not name a file", path))?
        .to_string_lossy()
        .into_owned();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((JsonFiles::new(dir), name))
}

fn first_root(roots: &[PathBuf], moddir: &Path) -> PathBuf {
    roots.first().cloned().unwrap_or_else(|| moddir.to_path_buf())
}

fn build(cli: &Cli, config: &Config, modfile: &Path) -> Result<()> {
    let moddir = cli.moddir.as_path();
    let objects_dir = moddir.join(&config.objects_dir);
    let lua_roots = config.lua_roots(moddir);
    let xml_roots = config.xml_roots(moddir);

    let sidecars = TextFiles::rooted(&objects_dir);
    let lua_files = TextFiles::new(lua_roots.clone(), first_root(&lua_roots, moddir));
    let xml_files = TextFiles::new(xml_roots.clone(), first_root(&xml_roots, moddir));
    let lua = ReadChain::new(vec![&lua_files as &dyn TextReader, &sidecars]);
    let xml = ReadChain::new(vec![&xml_files as &dyn TextReader, &sidecars]);

    let root = JsonFiles::new(moddir);
    let modsettings = JsonFiles::new(moddir.join(&config.modsettings_dir));
    let objects = JsonFiles::new(&objects_dir);
    let explorer = DirFiles::new(&objects_dir);

    let generator = Generator {
        config,
        root: &root,
        modsettings: &modsettings,
        objects: &objects,
        explorer: &explorer,
        text: TextSources {
            sidecars: &sidecars,
            lua: &lua,
            xml: &xml,
        },
    };

    let (output, name) = split_file(modfile)?;
    if cli.objects_only {
        let objects = generator.generate_objects()?;
        output.write_object_array(&objects, &name)?;
        info!("Wrote {} objects to {:?}", objects.len(), modfile);
    } else {
        let document = generator.generate()?;
        output.write_object(&document, &name)?;
        info!("Built {:?}", modfile);
    }
    Ok(())
}

fn reverse(cli: &Cli, config: &Config, modfile: &Path) -> Result<()> {
    let moddir = cli.moddir.as_path();
    let (input, name) = split_file(modfile)?;
    let document = input
        .read_object(&name)
        .with_context(|| format!("Failed to read save file {:?}", modfile))?;

    let objects_dir = moddir.join(&config.objects_dir);
    let modsettings_dir = moddir.join(&config.modsettings_dir);
    for dir in [&objects_dir, &modsettings_dir] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }

    let lua_roots = config.lua_roots(moddir);
    let xml_roots = config.xml_roots(moddir);
    let lua_src = TextFiles::new(lua_roots.clone(), first_root(&lua_roots, moddir));
    let xml_src = TextFiles::new(xml_roots.clone(), first_root(&xml_roots, moddir));
    let sidecars = TextFiles::rooted(&objects_dir);

    let root = JsonFiles::new(moddir);
    let modsettings = JsonFiles::new(&modsettings_dir);
    let objects = JsonFiles::new(&objects_dir);
    let dirs = DirFiles::new(&objects_dir);

    let reverser = Reverser {
        config,
        root: &root,
        modsettings: &modsettings,
        objects: ObjectSinks {
            json: &objects,
            dirs: &dirs,
            text: TextSinks {
                sidecars: &sidecars,
                lua_src: config.write_src.then_some(&lua_src as &dyn TextWriter),
                xml_src: config.write_src.then_some(&xml_src as &dyn TextWriter),
                inline_threshold: config.inline_threshold,
            },
        },
    };
    reverser.reverse(document)?;
    info!("Split {:?} into {:?}", modfile, moddir);
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.write_src {
        config.write_src = true;
    }
    debug!("Configuration: {:?}", config);

    let modfile = cli
        .modfile
        .clone()
        .unwrap_or_else(|| cli.moddir.join("output.json"));

    if cli.reverse {
        reverse(cli, &config, &modfile)
    } else {
        build(cli, &config, &modfile)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();
    debug!("Verbosity level: {} (log level: {})", cli.verbose, log_level);

    run(&cli)
}
