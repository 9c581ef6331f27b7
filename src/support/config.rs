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

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// How the top level of the input is framed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// A single message or entity with no envelope.
    Entity,
    /// A sequence of messages, each introduced by a `From ` line.
    Mbox,
}

impl Default for Format {
    fn default() -> Self {
        Format::Entity
    }
}

/// Options controlling the structural parser.
///
/// This is typically stored in a TOML file passed to the command-line tool
/// with `--config`; library users usually just build one in code.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    /// The framing of the input.
    pub format: Format,

    /// The maximum nesting depth of multiparts and embedded messages.
    ///
    /// Anything nested deeper than this is treated as an opaque leaf, no
    /// matter what its Content-Type says.
    pub max_depth: u32,

    /// If true, a `Content-Length` header on a top-level mbox message bounds
    /// the message, so that `From ` lines inside the declared length are not
    /// taken as the start of the next message.
    pub respect_content_length: bool,

    /// How many bytes of an unterminated line are examined before the line is
    /// assumed not to be a boundary.
    ///
    /// The effective limit is never less than the longest active boundary
    /// marker plus this value.
    pub scan_limit: usize,
}

pub const DEFAULT_MAX_DEPTH: u32 = 128;
pub const DEFAULT_SCAN_LIMIT: usize = 1024;

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            format: Format::Entity,
            max_depth: DEFAULT_MAX_DEPTH,
            respect_content_length: false,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

impl ParserConfig {
    /// Shorthand for the default configuration with mbox framing.
    pub fn mbox() -> Self {
        ParserConfig {
            format: Format::Mbox,
            ..ParserConfig::default()
        }
    }

    pub fn from_toml(data: &[u8]) -> Result<Self, Error> {
        let mut config: ParserConfig = toml::from_slice(data)?;
        if 0 == config.scan_limit {
            config.scan_limit = DEFAULT_SCAN_LIMIT;
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut data = Vec::new();
        fs::File::open(path)?.read_to_end(&mut data)?;
        Self::from_toml(&data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ParserConfig::from_toml(b"").unwrap();
        assert_eq!(Format::Entity, config.format);
        assert_eq!(DEFAULT_MAX_DEPTH, config.max_depth);
        assert!(!config.respect_content_length);
        assert_eq!(DEFAULT_SCAN_LIMIT, config.scan_limit);
    }

    #[test]
    fn explicit_values() {
        let config = ParserConfig::from_toml(
            b"format = \"mbox\"\n\
              max_depth = 4\n\
              respect_content_length = true\n\
              scan_limit = 0\n",
        )
        .unwrap();
        assert_eq!(Format::Mbox, config.format);
        assert_eq!(4, config.max_depth);
        assert!(config.respect_content_length);
        assert_eq!(DEFAULT_SCAN_LIMIT, config.scan_limit);
    }

    #[test]
    fn bad_format_is_rejected() {
        assert_matches!(
            Err(Error::Config(..)),
            ParserConfig::from_toml(b"format = \"maildir\"\n")
        );
    }
}
