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

use std::{env, fs, io::Write, path::Path};

use simplelog::{
    ColorChoice, Config, ConfigBuilder, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};

use super::path::expand_path;
use crate::{Error, Result};

/// Description shown in `--help`, built from the crate metadata.
#[macro_export]
macro_rules! cli_desc {
    () => {{
        let desc = format!(
            "{} {}\n{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
        );
        Box::leak(desc.into_boxed_str()) as &'static str
    }};
}

/// Write the default config to `path` unless a file already exists there.
pub fn spawn_config(path: &Path, contents: &[u8]) -> Result<()> {
    if path.exists() {
        return Ok(())
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    println!("Config file created in {path:?}. Please review it.");

    Ok(())
}

/// Map `-v` occurrences to a log level.
pub fn get_log_level(verbosity_level: u8) -> LevelFilter {
    match verbosity_level {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Logger config. `LOG_TARGETS` takes a comma separated list of targets
/// to show; a `!` prefix hides a target instead.
pub fn get_log_config(verbosity_level: u8) -> Config {
    let mut cfg = ConfigBuilder::new();

    if let Ok(targets) = env::var("LOG_TARGETS") {
        for target in targets.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match target.strip_prefix('!') {
                Some(ignored) => cfg.add_filter_ignore(ignored.to_string()),
                None => cfg.add_filter_allow(target.to_string()),
            };
        }
    }

    // ethers' transports are very chatty below trace
    if verbosity_level < 2 {
        cfg.add_filter_ignore_str("ethers_providers");
        cfg.add_filter_ignore_str("tungstenite");
        cfg.add_filter_ignore_str("hyper");
        cfg.add_filter_ignore_str("reqwest");
    }

    cfg.set_target_level(LevelFilter::Error);
    cfg.set_location_level(LevelFilter::Off);
    cfg.build()
}

pub fn log_config(verbosity_level: u8) -> (LevelFilter, Config) {
    (get_log_level(verbosity_level), get_log_config(verbosity_level))
}

/// Log to the terminal, or to `log_file` when one is given.
pub fn init_logger(verbosity_level: u8, log_file: Option<&str>) -> Result<()> {
    let (lvl, cfg) = log_config(verbosity_level);

    let res = match log_file {
        Some(path) => {
            let path = expand_path(path)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            WriteLogger::init(lvl, cfg, fs::File::create(path)?)
        }
        None => TermLogger::init(lvl, cfg, TerminalMode::Mixed, ColorChoice::Auto),
    };

    res.map_err(|e| Error::Config(format!("failed to set up logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(get_log_level(0), LevelFilter::Info);
        assert_eq!(get_log_level(1), LevelFilter::Debug);
        assert_eq!(get_log_level(2), LevelFilter::Trace);
        assert_eq!(get_log_level(9), LevelFilter::Trace);
    }

    #[test]
    fn description_names_the_crate() {
        let desc = cli_desc!();
        assert!(desc.starts_with(env!("CARGO_PKG_NAME")));
    }
}
