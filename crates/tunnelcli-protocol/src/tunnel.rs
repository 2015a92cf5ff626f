//! Conventions of the duplex HTTP tunnel shared by client and server.

use std::fmt;
use std::str::FromStr;

/// Path of the duplex endpoint, relative to the server base URL.
pub const CLI_PATH: &str = "cli";

/// Correlates the two legs of one tunnel.
pub const SESSION_HEADER: &str = "Session";

/// Which leg a request is.
pub const SIDE_HEADER: &str = "Side";

/// Response marker confirming the server understands the convention.
pub const DUPLEX_HEADER: &str = "X-Duplex";

/// Human-readable reason attached to error responses.
pub const ERROR_HEADER: &str = "X-CLI-Error";

/// First byte of every download stream.
pub const INITIAL_BYTE: u8 = 0;

/// Leg of a duplex tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Long-lived response body carrying server-to-client bytes.
    Download,
    /// Chunked request body carrying client-to-server bytes.
    Upload,
    /// One bounded block of client-to-server bytes.
    UploadBlock,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
            Self::UploadBlock => "upload-block",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            "upload" => Ok(Self::Upload),
            "upload-block" => Ok(Self::UploadBlock),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}
