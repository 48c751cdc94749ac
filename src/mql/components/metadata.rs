//! Components that annotate a whole query rather than a part of it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HasLimit {
    pub limit: u32,
}

impl HasLimit {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExplainPlanType {
    None,
    /// `queryPlanner` verbosity, never executes the query
    #[default]
    Safe,
    /// `executionStats` verbosity
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HasExplain {
    pub explain_type: ExplainPlanType,
}

impl HasExplain {
    pub fn new(explain_type: ExplainPlanType) -> Self {
        Self { explain_type }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectName {
    JavaDriver,
    SpringCriteria,
    SpringQuery,
    Mongosh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HasSourceDialect {
    pub dialect: DialectName,
}

impl HasSourceDialect {
    pub fn new(dialect: DialectName) -> Self {
        Self { dialect }
    }
}

/// A server version, `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::new(7, 0, 0)
    }
}

impl FromStr for Version {
    type Err = String;

    /// Missing components default to zero, pre-release suffixes (`7.0.0-rc1`) are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.').map(|part| {
            part.parse::<u32>()
                .map_err(|_| format!("invalid version component '{}' in '{}'", part, s))
        });

        let major = parts
            .next()
            .ok_or_else(|| format!("empty version '{}'", s))??;
        let minor = parts.next().transpose()?.unwrap_or(0);
        let patch = parts.next().transpose()?.unwrap_or(0);
        Ok(Version::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HasTargetCluster {
    pub version: Version,
}

impl HasTargetCluster {
    pub fn new(version: Version) -> Self {
        Self { version }
    }
}
