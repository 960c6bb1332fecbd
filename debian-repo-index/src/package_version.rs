// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling.

Two entry points exist. [compare_versions()] compares raw version strings as found in
package indices and never fails: it is what the indexing and reconciliation code uses
on every hot path. [PackageVersion] is a strictly validated, parsed representation for
callers that want to reject malformed input up front. Both order versions identically.
*/

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("version string is empty")]
    Empty,

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// Split a raw version string into `(epoch, upstream_version, debian_revision)`.
///
/// The epoch is everything before the first colon. The revision is everything after
/// the last hyphen of what remains. Absent components are empty strings.
fn split_version(s: &str) -> (&str, &str, &str) {
    let (epoch, remainder) = match s.find(':') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => ("", s),
    };

    match remainder.rfind('-') {
        Some(pos) => (epoch, &remainder[..pos], &remainder[pos + 1..]),
        None => (epoch, remainder, ""),
    }
}

/// Compare two version strings using Debian ordering rules.
///
/// This is the comparison `dpkg --compare-versions` performs. Input is not validated:
/// any string is accepted and the ordering is total.
///
/// ```
/// use {debian_repo_index::package_version::compare_versions, std::cmp::Ordering};
///
/// assert_eq!(compare_versions("1.0~beta1", "1.0"), Ordering::Less);
/// assert_eq!(compare_versions("1:1.0-1", "2:0.5-1"), Ordering::Less);
/// ```
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (a_epoch, a_upstream, a_revision) = split_version(a);
    let (b_epoch, b_upstream, b_revision) = split_version(b);

    compare_component(a_epoch, b_epoch)
        .then_with(|| compare_component(a_upstream, b_upstream))
        .then_with(|| compare_component(a_revision, b_revision))
}

/// Ordering weight of a single byte in the non-digit part of a version component.
///
/// Tilde sorts before everything (including the end of the string, which has weight 0),
/// letters sort before non-letters, and otherwise byte values decide.
fn lexical_weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

fn lexical_compare(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();

    for pos in 0..std::cmp::max(a.len(), b.len()) {
        match lexical_weight(a.get(pos).copied()).cmp(&lexical_weight(b.get(pos).copied())) {
            Ordering::Equal => {}
            res => return res,
        }
    }

    Ordering::Equal
}

/// Compare two runs of ASCII digits as arbitrary-precision integers.
///
/// An empty run counts as zero.
fn numeric_compare(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Split off the leading run of bytes for which `predicate` holds.
fn split_run(s: &str, predicate: impl Fn(u8) -> bool) -> (&str, &str) {
    let pos = s.bytes().position(|c| !predicate(c)).unwrap_or(s.len());

    s.split_at(pos)
}

/// Compare a version component string using Debian rules.
///
/// Components are consumed as alternating runs of non-digits (compared lexically) and
/// digits (compared numerically). The first difference decides.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a_remaining = a;
    let mut b_remaining = b;

    while !a_remaining.is_empty() || !b_remaining.is_empty() {
        let (a_text, a_rest) = split_run(a_remaining, |c| !c.is_ascii_digit());
        let (b_text, b_rest) = split_run(b_remaining, |c| !c.is_ascii_digit());

        match lexical_compare(a_text, b_text) {
            Ordering::Equal => {}
            res => return res,
        }

        let (a_digits, a_rest) = split_run(a_rest, |c| c.is_ascii_digit());
        let (b_digits, b_rest) = split_run(b_rest, |c| c.is_ascii_digit());

        match numeric_compare(a_digits, b_digits) {
            Ordering::Equal => {}
            res => return res,
        }

        a_remaining = a_rest;
        b_remaining = b_rest;
    }

    Ordering::Equal
}

/// A Debian package version.
///
/// Debian package versions consist of multiple sub-components and have rules about
/// sorting. The semantics are defined at
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
///
/// The concise version is the format is `[epoch:]upstream_version[-debian_revision]`
/// and each component has rules about what characters are allowed. Unlike
/// [compare_versions()], constructing an instance validates those rules.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, remainder) = if let Some(pos) = s.find(':') {
            (Some(&s[0..pos]), &s[pos + 1..])
        } else {
            (None, s)
        };

        let (upstream, debian) = if let Some(pos) = remainder.rfind('-') {
            (&remainder[0..pos], Some(&remainder[pos + 1..]))
        } else {
            (remainder, None)
        };

        let epoch = if let Some(epoch) = epoch {
            if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        // Alphanumerics and . + ~ only, hyphens allowed when a revision is present.
        if upstream.is_empty()
            || !upstream.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '.' | '+' | '~' => true,
                '-' => debian.is_some(),
                _ => false,
            })
        {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let debian_revision = if let Some(debian) = debian {
            if debian.is_empty()
                || !debian
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '~'))
            {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }

            Some(debian.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The `epoch` component of the version string.
    ///
    /// Only `Some` if present or defined explicitly.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Assumed value of `epoch` component.
    ///
    /// If the component isn't explicitly defined, a default of `0` will be assumed.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// `upstream` component of the version string.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// `debian_revision` component of the version string.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        f.write_str(&self.upstream_version)?;

        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or(""),
                    other.debian_revision.as_deref().unwrap_or(""),
                )
            })
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng},
    };

    #[test]
    fn split_components() {
        assert_eq!(split_version("1.0"), ("", "1.0", ""));
        assert_eq!(split_version("2:1.0-3"), ("2", "1.0", "3"));
        assert_eq!(split_version("1.0-2-3"), ("", "1.0-2", "3"));
        assert_eq!(split_version("1-2:3"), ("1-2", "3", ""));
        assert_eq!(split_version("1:2:3-4"), ("1", "2:3", "4"));
    }

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            PackageVersion::parse("1:4.7.0+dfsg1-2")?,
            PackageVersion {
                epoch: Some(1),
                upstream_version: "4.7.0+dfsg1".into(),
                debian_revision: Some("2".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("3.3.2.final~github-2")?,
            PackageVersion {
                epoch: None,
                upstream_version: "3.3.2.final~github".into(),
                debian_revision: Some("2".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("0.18.0+dfsg-2+b1")?,
            PackageVersion {
                epoch: None,
                upstream_version: "0.18.0+dfsg".into(),
                debian_revision: Some("2+b1".into())
            }
        );

        assert!(matches!(
            PackageVersion::parse("a:1.0"),
            Err(VersionError::EpochNonNumeric(_))
        ));
        assert!(matches!(
            PackageVersion::parse("1.0_1"),
            Err(VersionError::UpstreamVersionIllegalChar(_))
        ));
        assert!(matches!(
            PackageVersion::parse("1.0-"),
            Err(VersionError::DebianRevisionIllegalChar(_))
        ));
        assert!(matches!(PackageVersion::parse(""), Err(VersionError::Empty)));

        Ok(())
    }

    #[test]
    fn format() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            let v = PackageVersion::parse(s)?;
            assert_eq!(format!("{}", v), s);
        }

        Ok(())
    }

    #[test]
    fn test_lexical_compare() {
        assert_eq!(lexical_compare("~~", "~~a"), Ordering::Less);
        assert_eq!(lexical_compare("~~a", "~~"), Ordering::Greater);
        assert_eq!(lexical_compare("~~a", "~"), Ordering::Less);
        assert_eq!(lexical_compare("~", "~~a"), Ordering::Greater);
        assert_eq!(lexical_compare("~", ""), Ordering::Less);
        assert_eq!(lexical_compare("", "~"), Ordering::Greater);
        assert_eq!(lexical_compare("", "a"), Ordering::Less);
        assert_eq!(lexical_compare("a", ""), Ordering::Greater);
        assert_eq!(lexical_compare("a", "+"), Ordering::Less);
        assert_eq!(lexical_compare("+", "."), Ordering::Less);
        assert_eq!(lexical_compare("Z", "a"), Ordering::Less);
    }

    #[test]
    fn test_numeric_compare() {
        assert_eq!(numeric_compare("", "0"), Ordering::Equal);
        assert_eq!(numeric_compare("007", "7"), Ordering::Equal);
        assert_eq!(numeric_compare("10", "9"), Ordering::Greater);
        assert_eq!(
            numeric_compare("123456789012345678901234567890", "123456789012345678901234567891"),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_component() {
        assert_eq!(
            compare_component("1.0~beta1~svn1245", "1.0~beta1"),
            Ordering::Less
        );
        assert_eq!(compare_component("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(compare_component("1.0", "1.0.0"), Ordering::Less);
        assert_eq!(compare_component("1.0a", "1.0+"), Ordering::Less);
        assert_eq!(compare_component("1.01", "1.1"), Ordering::Equal);
    }

    #[test]
    fn compare_version_strings() {
        assert_eq!(compare_versions("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0~~", "1.0~"), Ordering::Less);
        assert_eq!(compare_versions("1:1.0-1", "2:0.5-1"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "0:1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0-1", "1.0-1"), Ordering::Equal);
        assert_eq!(compare_versions("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(compare_versions("1.0-10", "1.0-9"), Ordering::Greater);
        assert_eq!(compare_versions("1.1~bp1", "0.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.6.32-5", "2.6.32-5+b1"), Ordering::Less);
        assert_eq!(compare_versions("1.2-3-4", "1.2-3-5"), Ordering::Less);
        assert_eq!(compare_versions("7.6p2-4", "7.6-0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.3-3", "1.0-1"), Ordering::Greater);
        assert_eq!(compare_versions("1.3", "1.2.2-2"), Ordering::Greater);
        assert_eq!(compare_versions("1.3", "1.2.2"), Ordering::Greater);
        assert_eq!(compare_versions("0-pre", "0-pre"), Ordering::Equal);
        assert_eq!(compare_versions("0-pre", "0-pree"), Ordering::Less);
        assert_eq!(compare_versions("1.1.6r2-2", "1.1.6r-1"), Ordering::Greater);
        assert_eq!(compare_versions("2.6b2-1", "2.6b-2"), Ordering::Greater);
        assert_eq!(compare_versions("0.4a6-2", "0.4-1"), Ordering::Greater);
        assert_eq!(compare_versions("3.0~rc1-1", "3.0-1"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "1.0-0"), Ordering::Equal);
        assert_eq!(compare_versions("10:4.0", "9:99"), Ordering::Greater);
    }

    #[test]
    fn parsed_order_matches_string_order() -> Result<()> {
        let versions = [
            "1.0~beta1~svn1245",
            "1.0~beta1",
            "1.0",
            "1.0-1",
            "1.0+dfsg-1",
            "1.0.1",
            "1:0.1",
        ];

        for a in versions {
            for b in versions {
                assert_eq!(
                    PackageVersion::parse(a)?.cmp(&PackageVersion::parse(b)?),
                    compare_versions(a, b),
                    "{} <=> {}",
                    a,
                    b
                );
            }
        }

        Ok(())
    }

    fn random_version(rng: &mut StdRng) -> String {
        const ALPHABET: &[u8] = b"0123456789~+.ab";

        let mut s = String::new();
        if rng.gen_bool(0.2) {
            s.push_str(&format!("{}:", rng.gen_range(0..3)));
        }
        for _ in 0..rng.gen_range(1..6) {
            s.push(*ALPHABET.choose(rng).unwrap() as char);
        }
        if rng.gen_bool(0.5) {
            s.push('-');
            for _ in 0..rng.gen_range(1..3) {
                s.push(*ALPHABET.choose(rng).unwrap() as char);
            }
        }

        s
    }

    #[test]
    fn ordering_is_total() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let versions = (0..60)
            .map(|_| random_version(&mut rng))
            .collect::<Vec<_>>();

        for a in &versions {
            assert_eq!(compare_versions(a, a), Ordering::Equal);

            for b in &versions {
                let ab = compare_versions(a, b);
                assert_eq!(ab, compare_versions(b, a).reverse(), "{} <=> {}", a, b);

                for c in &versions {
                    if ab != Ordering::Greater && compare_versions(b, c) != Ordering::Greater {
                        assert_ne!(
                            compare_versions(a, c),
                            Ordering::Greater,
                            "{} <= {} <= {}",
                            a,
                            b,
                            c
                        );
                    }
                }
            }
        }

        let mut sorted = versions.clone();
        sorted.sort_by(|a, b| compare_versions(a, b));
        for pair in sorted.windows(2) {
            assert_ne!(compare_versions(&pair[0], &pair[1]), Ordering::Greater);
        }
    }
}
