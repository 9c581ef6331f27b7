//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of mimestream.
//
// mimestream is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// mimestream is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// mimestream. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;

use log::LevelFilter;
use structopt::StructOpt;

use crate::support::config::{Format, ParserConfig};
use crate::support::sysexits::*;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Command {
    /// Log more detail to standard error. Pass once for debug output and
    /// twice for trace output.
    #[structopt(short, long, parse(from_occurrences), global = true)]
    verbose: u8,

    /// Configure logging from this log4rs TOML file instead of writing to
    /// standard error.
    #[structopt(long, parse(from_os_str), global = true)]
    log_config: Option<PathBuf>,

    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
enum Subcommand {
    Events(EventsSubcommand),
    /// Print an outline of every message in the input.
    ///
    /// Each line gives the extent of one message or part as byte offsets,
    /// followed by how it was classified.
    Tree(InputOptions),
    /// Check that the input can be reproduced exactly from what the parser
    /// reports.
    ///
    /// Exits with EX_DATAERR if the reproduction differs from the input.
    Check(InputOptions),
}

impl Subcommand {
    fn input_options(&self) -> &InputOptions {
        match *self {
            Subcommand::Events(ref c) => &c.input,
            Subcommand::Tree(ref c) | Subcommand::Check(ref c) => c,
        }
    }
}

#[derive(StructOpt)]
pub(super) struct InputOptions {
    /// Read the input as an mbox file rather than a single message.
    #[structopt(long)]
    pub(super) mbox: bool,

    /// Read parser options from this TOML file.
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,

    /// The file to parse. "-" will read from stdin.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) input: PathBuf,
}

/// Print every event the parser reports, one per line.
///
/// Section data is shown as an escaped string, with consecutive pieces of the
/// same section merged together.
#[derive(StructOpt)]
pub(super) struct EventsSubcommand {
    #[structopt(flatten)]
    pub(super) input: InputOptions,

    /// Show at most this many bytes of each section's data. 0 shows all of
    /// it.
    #[structopt(long, default_value = "72")]
    pub(super) max_data: usize,
}

impl InputOptions {
    /// Load the parser configuration, exiting on failure.
    pub(super) fn parser_config(&self) -> ParserConfig {
        let mut config = match self.config {
            None => ParserConfig::default(),
            Some(ref path) => match ParserConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!(
                        "Error in config file at '{}': {}",
                        path.display(),
                        e
                    );
                    EX_CONFIG.exit()
                }
            },
        };

        if self.mbox {
            config.format = Format::Mbox;
        }

        config
    }
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    init_log(&cmd);

    let config = cmd.subcommand.input_options().parser_config();
    match cmd.subcommand {
        Subcommand::Events(cmd) => super::inspect::events(cmd, config),
        Subcommand::Tree(cmd) => super::inspect::tree(cmd, config),
        Subcommand::Check(cmd) => super::inspect::check(cmd, config),
    }
}

fn init_log(cmd: &Command) {
    if let Some(ref log_config_file) = cmd.log_config {
        if let Err(e) = log4rs::init_file(
            log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
        return;
    }

    let level = match cmd.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if !crate::init_simple_log(level) {
        eprintln!("Failed to initialise logging");
        EX_SOFTWARE.exit();
    }
}
