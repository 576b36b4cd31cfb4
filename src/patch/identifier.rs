//! Client version identifiers (`EDOPRO-<PLATFORM>-<major>.<minor>.<patch>`)

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::config::VERSION_PREFIX;
use crate::patch::error::ParseError;

/// Largest version component the catalog can store (SQLite INTEGER is i64)
pub const MAX_COMPONENT: u64 = i64::MAX as u64;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^{VERSION_PREFIX}-(WINDOWS|MAC|LINUX)-([0-9]+)\.([0-9]+)\.([0-9]+)$"
    ))
    .unwrap()
});

/// Client operating system family. Partitions the version space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    Mac,
    Linux,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Mac, Platform::Linux];

    /// Returns the normalized (uppercase) representation stored in the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "WINDOWS",
            Platform::Mac => "MAC",
            Platform::Linux => "LINUX",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = ();

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "WINDOWS" => Ok(Platform::Windows),
            "MAC" => Ok(Platform::Mac),
            "LINUX" => Ok(Platform::Linux),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a single decimal version component.
///
/// Accepts any number of ASCII digits (leading zeros included) but no sign,
/// whitespace or non-ASCII digits. Values above [`MAX_COMPONENT`] are rejected.
pub fn parse_component(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u64>().ok().filter(|v| *v <= MAX_COMPONENT)
}

/// An installed (or published) build: platform plus numeric version tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionIdentifier {
    platform: Platform,
    version: Version,
}

impl VersionIdentifier {
    pub fn new(platform: Platform, major: u64, minor: u64, patch: u64) -> Self {
        Self {
            platform,
            version: Version::new(major, minor, patch),
        }
    }

    /// Parse `EDOPRO-<PLATFORM>-<major>.<minor>.<patch>`.
    ///
    /// The whole string is matched case-insensitively; the platform is
    /// normalized to uppercase.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::MalformedVersion(input.to_string());

        let caps = VERSION_PATTERN.captures(input).ok_or_else(malformed)?;
        let platform = caps[1].parse::<Platform>().map_err(|_| malformed())?;
        let major = parse_component(&caps[2]).ok_or_else(malformed)?;
        let minor = parse_component(&caps[3]).ok_or_else(malformed)?;
        let patch = parse_component(&caps[4]).ok_or_else(malformed)?;

        Ok(Self::new(platform, major, minor, patch))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn major(&self) -> u64 {
        self.version.major
    }

    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    pub fn patch(&self) -> u64 {
        self.version.patch
    }

    /// `major.minor.patch`, the name clients see for a patch
    pub fn name(&self) -> String {
        self.version.to_string()
    }

    /// Compare two identifiers of the same platform by (major, minor, patch).
    ///
    /// Comparing across platforms is a caller bug.
    pub fn compare(&self, other: &Self) -> Ordering {
        debug_assert_eq!(
            self.platform, other.platform,
            "version identifiers of different platforms are not comparable"
        );
        self.version.cmp(&other.version)
    }
}

impl PartialOrd for VersionIdentifier {
    /// `None` across platforms
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.platform == other.platform).then(|| self.version.cmp(&other.version))
    }
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", VERSION_PREFIX, self.platform, self.version)
    }
}

impl std::str::FromStr for VersionIdentifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
