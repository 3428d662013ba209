//! Compression levels for bundle entries, and the zip options they map to.

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Entries at least this large must be written with ZIP64 extensions.
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

/// Compression applied to entries written into a bundle.
///
/// [`Default`](Self::Default) leaves the level to the deflate implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    #[default]
    Default,
    /// No compression at all
    Stored,
    Low,
    Normal,
    High,
}

impl CompressionLevel {
    /// Numeric deflate level, or `None` for the implementation default.
    #[must_use]
    pub fn deflate_level(&self) -> Option<i64> {
        match self {
            Self::Default => None,
            Self::Stored => Some(0),
            Self::Low => Some(1),
            Self::Normal => Some(5),
            Self::High => Some(9),
        }
    }

    /// Options for writing one entry of `size` uncompressed bytes.
    #[must_use]
    pub fn file_options(&self, size: u64) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().large_file(size >= LARGE_FILE_THRESHOLD);
        match self {
            Self::Stored => options.compression_method(CompressionMethod::Stored),
            level => options.compression_method(CompressionMethod::Deflated).compression_level(level.deflate_level()),
        }
    }

    /// Options for a directory entry.
    #[must_use]
    pub fn directory_options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Stored => "stored",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl FromStr for CompressionLevel {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "-1" => Ok(Self::Default),
            "stored" | "store" | "none" | "0" => Ok(Self::Stored),
            "low" | "fast" | "1" => Ok(Self::Low),
            "normal" | "5" => Ok(Self::Normal),
            "high" | "best" | "9" => Ok(Self::High),
            _ => exn::bail!(ErrorKind::UnsupportedLevel(s.to_string())),
        }
    }
}

impl Display for CompressionLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("default", CompressionLevel::Default)]
    #[case("stored", CompressionLevel::Stored)]
    #[case("NONE", CompressionLevel::Stored)]
    #[case("low", CompressionLevel::Low)]
    #[case("normal", CompressionLevel::Normal)]
    #[case(" High ", CompressionLevel::High)]
    #[case("9", CompressionLevel::High)]
    fn test_from_str(#[case] test: &str, #[case] expected: CompressionLevel) {
        assert_eq!(test.parse::<CompressionLevel>().unwrap(), expected);
    }

    #[rstest]
    #[case("ultra")]
    #[case("")]
    #[case("7")]
    fn test_from_str_invalid(#[case] test: &str) {
        assert!(test.parse::<CompressionLevel>().is_err());
    }

    #[rstest]
    #[case(CompressionLevel::Default, None)]
    #[case(CompressionLevel::Stored, Some(0))]
    #[case(CompressionLevel::Low, Some(1))]
    #[case(CompressionLevel::Normal, Some(5))]
    #[case(CompressionLevel::High, Some(9))]
    fn test_deflate_level(#[case] level: CompressionLevel, #[case] expected: Option<i64>) {
        assert_eq!(level.deflate_level(), expected);
    }

    #[test]
    fn test_display_round_trips() {
        for level in [CompressionLevel::Default, CompressionLevel::Stored, CompressionLevel::High] {
            assert_eq!(level.to_string().parse::<CompressionLevel>().unwrap(), level);
        }
    }
}
