// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Compact package references. */

use {
    crate::error::{DebianError, Result},
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
};

/// An opaque, sortable key identifying a package record.
///
/// The encoding is `P<architecture> <name> <version> <files hash>` where the files hash is
/// rendered as 16 lower case hex digits. Neither component can contain a space, so refs
/// for the same `(architecture, name)` pair share the prefix returned by
/// [Self::package_id()] and are contiguous when sorted byte-lexicographically.
///
/// Refs order by their bytes. This is **not** version order.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageRef {
    key: String,
    name_start: usize,
    version_start: usize,
    hash_start: usize,
}

impl PackageRef {
    /// Construct a ref from its components.
    pub fn new(architecture: &str, name: &str, version: &str, files_hash: u64) -> Self {
        let key = format!("P{} {} {} {:016x}", architecture, name, version, files_hash);

        let name_start = 1 + architecture.len() + 1;
        let version_start = name_start + name.len() + 1;
        let hash_start = version_start + version.len() + 1;

        Self {
            key,
            name_start,
            version_start,
            hash_start,
        }
    }

    /// Parse a ref from its encoded form.
    pub fn parse(s: &str) -> Result<Self> {
        let err = || DebianError::PackageRefParse(s.to_string());

        let body = s.strip_prefix('P').ok_or_else(err)?;
        let parts = body.split(' ').collect::<Vec<_>>();

        match parts.as_slice() {
            [arch, name, version, hash]
                if !arch.is_empty() && !name.is_empty() && !version.is_empty() =>
            {
                if hash.is_empty() || hash.len() > 16 {
                    return Err(err());
                }
                let files_hash = u64::from_str_radix(hash, 16).map_err(|_| err())?;

                Ok(Self::new(arch, name, version, files_hash))
            }
            _ => Err(err()),
        }
    }

    /// The encoded form as a string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The encoded form as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// The architecture component.
    pub fn architecture(&self) -> &str {
        &self.key[1..self.name_start - 1]
    }

    /// The package name component.
    pub fn name(&self) -> &str {
        &self.key[self.name_start..self.version_start - 1]
    }

    /// The version component.
    pub fn version(&self) -> &str {
        &self.key[self.version_start..self.hash_start - 1]
    }

    /// The files hash component.
    pub fn files_hash(&self) -> u64 {
        // The component is always produced by Self::new() from a u64.
        u64::from_str_radix(&self.key[self.hash_start..], 16).unwrap_or_default()
    }

    /// The `P<architecture> <name>` prefix identifying the package regardless of version.
    pub fn package_id(&self) -> &str {
        &self.key[..self.version_start - 1]
    }

    /// The `P<architecture> <name> <version>` prefix, ignoring file content.
    pub fn short_key(&self) -> &str {
        &self.key[..self.hash_start - 1]
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl TryFrom<String> for PackageRef {
    type Error = DebianError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PackageRef> for String {
    fn from(r: PackageRef) -> Self {
        r.key
    }
}
