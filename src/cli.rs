/*
 * This file is part of Devgate.
 *
 * Copyright (C) 2025 Devgate contributors
 *
 * Devgate is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Devgate is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Devgate. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run the agent until signalled
    Run,
    /// Re-enable the device at this sysfs path and exit
    Enable(PathBuf),
    /// Parse a policy document and exit
    CheckPolicy(PathBuf),
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub config: Option<PathBuf>,
    pub policy: Option<PathBuf>,
    pub action: Action,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CliError {
    #[error("{0} requires a path argument")]
    MissingValue(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
}

/// Parse arguments, without the program name
pub fn parse_args<I, S>(args: I) -> Result<Cli, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cli = Cli {
        config: None,
        policy: None,
        action: Action::Run,
    };

    let mut args = args.into_iter().map(Into::into);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().map(PathBuf::from).ok_or_else(|| CliError::MissingValue(flag.to_string()));
        match arg.as_str() {
            "-h" | "--help" => return Ok(Cli { action: Action::Help, ..cli }),
            "-v" | "--version" => return Ok(Cli { action: Action::Version, ..cli }),
            "-c" | "--config" => cli.config = Some(value(&arg)?),
            "-p" | "--policy" => cli.policy = Some(value(&arg)?),
            "--enable" => cli.action = Action::Enable(value(&arg)?),
            "--check-policy" => cli.action = Action::CheckPolicy(value(&arg)?),
            _ => return Err(CliError::UnknownArgument(arg)),
        }
    }
    Ok(cli)
}

pub fn print_help() {
    eprintln!("devgated {} - USB device control agent", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    devgated [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH        Agent config file (default /etc/devgate/agent.json)");
    eprintln!("    -p, --policy PATH        Policy document, overrides the config");
    eprintln!("        --enable PATH        Re-enable the device at a sysfs path and exit");
    eprintln!("        --check-policy PATH  Validate a policy document and exit");
    eprintln!("    -v, --version            Print version");
    eprintln!("    -h, --help               Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    DEVGATE_CONFIG           Agent config file");
    eprintln!("    DEVGATE_LOG              Log level (trace, debug, info, warn, error)");
}

pub fn print_version() {
    println!("devgated {}", VERSION);
}
