//! Where configuration files are looked up.

use std::{
    env, fmt,
    path::{Path, PathBuf},
};

use etcetera::BaseStrategy;

pub const CONFIG_DIR: &str = "modsplit";

pub const CONFIG_FILE: &str = "modsplit.toml";

/// The configuration layers that come from files, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    System,
    User,
    Project,
    Cli,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "system config",
            Self::User => "user config",
            Self::Project => "project config",
            Self::Cli => "CLI config",
        };
        f.write_str(name)
    }
}

/// The per-user config file, e.g. `~/.config/modsplit/modsplit.toml`.
///
/// On Windows this lives under the roaming AppData directory.
pub fn user_config_file() -> Option<PathBuf> {
    etcetera::choose_base_strategy()
        .ok()
        .map(|dirs| dirs.config_dir().join(CONFIG_DIR).join(CONFIG_FILE))
}

/// The config file of the project in the working directory.
pub fn project_config_file() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}

#[cfg(not(windows))]
fn find_in_xdg_dirs(value: Option<&str>) -> Option<PathBuf> {
    let dirs = value.filter(|s| !s.is_empty()).unwrap_or("/etc/xdg");
    dirs.split(':')
        .take_while(|s| !s.is_empty())
        .map(|dir| Path::new(dir).join(CONFIG_DIR).join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn find_in_program_data(system_drive: impl AsRef<Path>) -> Option<PathBuf> {
    let candidate = system_drive
        .as_ref()
        .join("ProgramData")
        .join(CONFIG_DIR)
        .join(CONFIG_FILE);
    candidate.is_file().then_some(candidate)
}

/// The machine-wide config file, if one exists.
///
/// Searches `XDG_CONFIG_DIRS` (default `/etc/xdg`) and then
/// `/etc/modsplit/modsplit.toml`; on Windows,
/// `%SYSTEMDRIVE%\ProgramData\modsplit\modsplit.toml`.
pub fn system_config_file() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        env::var("SYSTEMDRIVE").ok().and_then(find_in_program_data)
    }

    #[cfg(not(windows))]
    {
        if let Some(path) = find_in_xdg_dirs(env::var("XDG_CONFIG_DIRS").ok().as_deref()) {
            return Some(path);
        }
        let candidate = Path::new("/etc").join(CONFIG_DIR).join(CONFIG_FILE);
        match candidate.try_exists() {
            Ok(true) => Some(candidate),
            Ok(false) => None,
            Err(err) => {
                log::warn!("Failed to query system configuration file: {err}");
                None
            }
        }
    }
}

/// Existing config files, highest precedence first.
///
/// The CLI file is always included so that a missing one is reported.
pub fn config_files(cli: Option<&Path>) -> Vec<(ConfigSource, PathBuf)> {
    let mut files = Vec::new();
    if let Some(path) = cli {
        files.push((ConfigSource::Cli, path.to_path_buf()));
    }
    let project = project_config_file();
    if project.is_file() {
        files.push((ConfigSource::Project, project));
    }
    if let Some(user) = user_config_file().filter(|path| path.is_file()) {
        files.push((ConfigSource::User, user));
    }
    if let Some(system) = system_config_file() {
        files.push((ConfigSource::System, system));
    }
    files
}
