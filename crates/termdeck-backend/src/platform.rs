//! Platform lookups: default shell, arguments, working directory, and ConPTY
//! detection.

use std::env;
use std::path::PathBuf;

use termdeck_core::SpawnOptions;
use tracing::debug;

use crate::error::ConfigParseError;

pub const WINDOWS_SHELL: &str = "powershell.exe";
pub const FALLBACK_SHELL: &str = "/bin/bash";
/// First Windows 10 build that ships ConPTY.
pub const CONPTY_MIN_BUILD: u32 = 18309;

pub fn default_shell() -> String {
    if cfg!(windows) {
        return WINDOWS_SHELL.to_string();
    }
    env::var("SHELL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}

pub fn platform_args() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["-l".to_string()]
    } else {
        Vec::new()
    }
}

pub fn default_cwd() -> PathBuf {
    home_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn home_dir() -> Option<PathBuf> {
    let key = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn resolve_shell(options: &SpawnOptions) -> String {
    options
        .shell
        .clone()
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(default_shell)
}

pub fn resolve_args(options: &SpawnOptions) -> Vec<String> {
    options.args.clone().unwrap_or_else(platform_args)
}

pub fn resolve_cwd(options: &SpawnOptions) -> PathBuf {
    options.cwd.clone().unwrap_or_else(default_cwd)
}

/// Command that prints `test` and exits, used by availability self-tests.
pub fn probe_options() -> SpawnOptions {
    if cfg!(windows) {
        SpawnOptions::default()
            .with_shell("cmd.exe")
            .with_args(["/C", "echo", "test"])
    } else {
        SpawnOptions::default()
            .with_shell("echo")
            .with_args(["test"])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsRelease {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

pub fn parse_os_release(release: &str) -> Result<OsRelease, ConfigParseError> {
    let parts: Vec<&str> = release.trim().split('.').collect();
    if parts.len() < 3 {
        return Err(ConfigParseError::new(release, "expected major.minor.build"));
    }
    let number = |idx: usize, name: &str| {
        parts[idx]
            .parse::<u32>()
            .map_err(|err| ConfigParseError::new(release, format!("{name}: {err}")))
    };
    Ok(OsRelease {
        major: number(0, "major")?,
        minor: number(1, "minor")?,
        build: number(2, "build")?,
    })
}

/// Whether ConPTY may be used on a Windows host reporting `release`.
/// Malformed releases disable it.
pub fn conpty_enabled_for(release: &str) -> bool {
    match parse_os_release(release) {
        Ok(os) => os.major > 10 || (os.major == 10 && os.build >= CONPTY_MIN_BUILD),
        Err(err) => {
            debug!(event = "os_release_unparsed", error = %err);
            false
        }
    }
}

/// Whether the native PTY backend can run on this host at all.
pub fn native_pty_supported() -> bool {
    #[cfg(windows)]
    {
        match current_os_release() {
            Some(release) => conpty_enabled_for(&release),
            None => false,
        }
    }
    #[cfg(not(windows))]
    {
        true
    }
}

#[cfg(windows)]
fn current_os_release() -> Option<String> {
    let os_version = sysinfo::System::os_version()?;
    release_from_os_version(&os_version, sysinfo::System::kernel_version().as_deref())
}

/// Builds `major.0.build` from what the OS reports, e.g. `"10 (19045)"` with
/// kernel `"19045"`. A kernel version that already is dotted wins.
#[cfg(any(windows, test))]
fn release_from_os_version(os_version: &str, kernel: Option<&str>) -> Option<String> {
    if let Some(kernel) = kernel.filter(|k| k.split('.').count() >= 3) {
        return Some(kernel.trim().to_string());
    }
    let numbers: Vec<&str> = os_version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .collect();
    let major = numbers.first()?;
    let build = match kernel.map(str::trim).filter(|k| !k.is_empty()) {
        Some(kernel) => kernel,
        None if numbers.len() > 1 => *numbers.last()?,
        None => return None,
    };
    Some(format!("{major}.0.{build}"))
}
