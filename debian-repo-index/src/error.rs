// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebianError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("regular expression error: {0}")]
    Regex(#[from] regex::Error),

    #[error("glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("required field missing in control paragraph: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("unable to process dependencies of package {package}: {source}")]
    PackageDependencies {
        package: String,
        #[source]
        source: Box<DebianError>,
    },

    #[error("malformed checksum line in field {0}: {1}")]
    PackageChecksumLine(String, String),

    #[error("conflict in package {0}")]
    PackageConflict(String),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("contents of package {0} are not available")]
    PackageContentsUnavailable(String),

    #[error("malformed package reference: {0}")]
    PackageRefParse(String),

    #[error("unsupported index compression: {0}")]
    UnknownCompression(String),
}

impl DebianError {
    /// Whether this error is a [DebianError::PackageConflict].
    ///
    /// Conflicts are recoverable and callers frequently want to branch on them.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::PackageConflict(_))
    }

    /// Whether this error signals a record store miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PackageNotFound(_))
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebianError>;
