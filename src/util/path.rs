/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

/// Returns the path to the user's home directory from `$HOME`
/// (`%APPDATA%` on Windows).
pub fn home_dir() -> Option<PathBuf> {
    #[cfg(target_family = "windows")]
    let var = "APPDATA";
    #[cfg(not(target_family = "windows"))]
    let var = "HOME";

    env::var_os(var).filter(|h| !h.is_empty()).map(PathBuf::from)
}

/// Returns `$XDG_CONFIG_HOME`, `$HOME/.config`, or `None`.
pub fn config_dir() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .and_then(is_absolute_path)
        .or_else(|| home_dir().map(|h| h.join(".config")))
}

fn is_absolute_path(path: OsString) -> Option<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        Some(path)
    } else {
        None
    }
}

/// Expand a leading `~` or `~/` to the home directory.
/// `~user` forms are rejected.
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let Some(rest) = path.strip_prefix('~') else { return Ok(PathBuf::from(path)) };

    let remains = match rest.strip_prefix('/') {
        Some(remains) => remains,
        None if rest.is_empty() => "",
        None => {
            return Err(Error::Config(format!("cannot expand {path}: only ~ and ~/ are supported")))
        }
    };

    let homedir =
        home_dir().ok_or_else(|| Error::Config("could not find the home directory".to_string()))?;

    if remains.is_empty() {
        Ok(homedir)
    } else {
        Ok(homedir.join(remains))
    }
}

/// Join a path with `config_dir()/solflow`.
pub fn join_config_path(file: &Path) -> Result<PathBuf> {
    let mut path = PathBuf::new();

    if let Some(v) = config_dir() {
        path.push(v);
    }

    path.push("solflow");
    path.push(file);

    Ok(path)
}

/// Use the config path given on the command line, or fall back to the
/// default location.
pub fn get_config_path(arg: Option<String>, fallback: &str) -> Result<PathBuf> {
    if let Some(a) = arg {
        expand_path(&a)
    } else {
        join_config_path(&PathBuf::from(fallback))
    }
}
