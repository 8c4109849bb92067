//-
// Copyright (c) 2024, The Miltonmail developers
//
// This file is part of Miltonmail.
//
// Miltonmail is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Miltonmail is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Miltonmail. If not, see <http://www.gnu.org/licenses/>.

//! Logging setup.
//!
//! If the configuration directory contains `logging.toml`, it is handed to
//! `log4rs` as-is, which allows arbitrary appenders (e.g. a rolling log
//! file). Otherwise, everything at `Info` and above goes to standard error,
//! or everything at all with `--trace`, which includes the IMAP wire trace.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

pub const LOGGING_FILE: &str = "logging.toml";

pub fn init(config_dir: &Path, trace: bool) -> Result<(), String> {
    let config_file = config_dir.join(LOGGING_FILE);
    if config_file.is_file() {
        return log4rs::init_file(
            &config_file,
            log4rs::file::Deserializers::new(),
        )
        .map_err(|e| format!("{}: {}", config_file.display(), e));
    }

    let level = if trace {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}] {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| e.to_string())?;

    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| e.to_string())
}
