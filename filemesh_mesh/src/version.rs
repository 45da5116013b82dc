use std::{
    fmt::{self, Display},
    str::FromStr,
};

use super::{Error, Result};

/// Length of the ASCII version header, including the trailing newline.
pub const HEADER_LEN: usize = 13;

const MAGIC: &[u8] = b"version ";

/// A mesh format version such as `4.00`.
///
/// The minor part is stored as two decimal digits, so `1.1` and `1.10` are
/// the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const V1_00: Self = Self::new(1, 0);
    pub const V1_01: Self = Self::new(1, 1);
    pub const V2_00: Self = Self::new(2, 0);
    pub const V3_00: Self = Self::new(3, 0);
    pub const V4_00: Self = Self::new(4, 0);
    pub const V5_00: Self = Self::new(5, 0);

    const MIN: Self = Self::V1_00;
    const MAX: Self = Self::V5_00;

    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Parses the 13-byte header at the start of a mesh file.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the header doesn't start with `version `, if the
    /// number doesn't parse or if the version is unsupported.
    pub fn from_header(header: &[u8]) -> Result<Self> {
        let not_a_mesh = || Error::NotAMeshFile {
            header: String::from_utf8_lossy(header)
                .trim_end_matches(char::from(0))
                .to_owned(),
        };

        if header.get(..MAGIC.len()) != Some(MAGIC) {
            return Err(not_a_mesh());
        }

        let suffix = &header[MAGIC.len()..header.len().min(HEADER_LEN)];
        let number_len = suffix
            .iter()
            .take_while(|&&b| b.is_ascii_digit() || b == b'.')
            .count();
        let number = std::str::from_utf8(&suffix[..number_len]).map_err(|_| not_a_mesh())?;

        let version: Self = number.parse().map_err(|_| not_a_mesh())?;
        version.check()?;
        Ok(version)
    }

    /// # Errors
    ///
    /// Returns `Err` if the version is outside `1.00..=5.00`.
    pub fn check(self) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&self) {
            Ok(self)
        } else {
            Err(Error::UnsupportedVersion {
                version: self.to_string(),
            })
        }
    }

    /// Versions before 2 are line-oriented text.
    #[must_use]
    pub fn is_text(self) -> bool {
        self.major < 2
    }

    /// The header as written by the encoder: `version X.XX\n`.
    #[must_use]
    pub fn header(self) -> String {
        format!("version {}\n", self)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::UnsupportedVersion {
            version: s.to_owned(),
        };

        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, ""),
        };

        let major = major.parse().map_err(|_| invalid())?;

        if !minor.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let minor = match minor.as_bytes() {
            [] => 0,
            [tens] => (tens - b'0') * 10,
            [tens, ones, ..] => (tens - b'0') * 10 + (ones - b'0'),
        };

        Ok(Self { major, minor })
    }
}
