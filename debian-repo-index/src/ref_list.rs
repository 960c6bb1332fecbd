// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Sorted lists of package refs.

A [PackageRefList] is the compact, persistable form of a set of packages. Refs are
kept sorted byte-lexicographically, which groups refs of the same
`(architecture, name)` pair together. Every operation is a single linear walk
over its operands.
*/

use {
    crate::{
        error::Result,
        package::Package,
        package_list::PackageList,
        package_ref::PackageRef,
        package_version::compare_versions,
        store::PackageStore,
    },
    serde::{Deserialize, Serialize},
    std::{cmp::Ordering, sync::Arc},
};

/// A difference between two ref lists.
///
/// Entries with both sides set describe a different version (or content) of the same
/// `(name, architecture)` pair.
#[derive(Clone, Debug)]
pub struct PackageDiff {
    pub left: Option<Arc<Package>>,
    pub right: Option<Arc<Package>>,
}

/// A sorted, duplicate free list of [PackageRef].
///
/// Serializes as a sequence of ref strings. Deserialization validates every ref and
/// restores ordering.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "Vec<PackageRef>", into = "Vec<PackageRef>")]
pub struct PackageRefList {
    refs: Vec<PackageRef>,
}

impl From<Vec<PackageRef>> for PackageRefList {
    fn from(mut refs: Vec<PackageRef>) -> Self {
        refs.sort();
        refs.dedup();

        Self { refs }
    }
}

impl From<PackageRefList> for Vec<PackageRef> {
    fn from(list: PackageRefList) -> Self {
        list.refs
    }
}

impl FromIterator<PackageRef> for PackageRefList {
    fn from_iter<T: IntoIterator<Item = PackageRef>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl PackageRefList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refs of every package in a list.
    pub fn from_package_list(list: &PackageList) -> Self {
        list.iter().map(|p| p.package_ref()).collect()
    }

    /// Construct an instance from refs in any order.
    pub fn from_refs(refs: impl IntoIterator<Item = PackageRef>) -> Self {
        refs.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Iterate refs in order.
    pub fn iter(&self) -> impl Iterator<Item = &PackageRef> {
        self.refs.iter()
    }

    /// Whether a ref is present.
    pub fn has_ref(&self, r: &PackageRef) -> bool {
        self.refs.binary_search(r).is_ok()
    }

    /// Whether the ref of a package is present.
    pub fn has(&self, package: &Package) -> bool {
        self.has_ref(&package.package_ref())
    }

    /// Refs rendered as strings.
    pub fn strings(&self) -> Vec<String> {
        self.refs.iter().map(|r| r.to_string()).collect()
    }

    /// Refs in this list and not in `other`.
    #[must_use]
    pub fn subtract(&self, other: &PackageRefList) -> PackageRefList {
        let mut refs = Vec::with_capacity(self.refs.len());
        let (mut i, mut j) = (0, 0);

        while i < self.refs.len() {
            match other.refs.get(j).map(|r| self.refs[i].cmp(r)) {
                None | Some(Ordering::Less) => {
                    refs.push(self.refs[i].clone());
                    i += 1;
                }
                Some(Ordering::Equal) => {
                    i += 1;
                    j += 1;
                }
                Some(Ordering::Greater) => {
                    j += 1;
                }
            }
        }

        Self { refs }
    }

    /// Compute differences with another list, resolving refs through a store.
    ///
    /// Identical refs produce no entry. When the differing refs at the current position
    /// describe the same `(name, architecture)` pair, a two-sided entry is emitted.
    /// Otherwise a one-sided entry is emitted for the ref sorting first.
    ///
    /// Each differing ref is loaded from the store once. Store misses are errors.
    pub fn diff(&self, other: &PackageRefList, store: &dyn PackageStore) -> Result<Vec<PackageDiff>> {
        let mut result = vec![];
        let (mut i, mut j) = (0, 0);
        let mut pending_left: Option<Arc<Package>> = None;
        let mut pending_right: Option<Arc<Package>> = None;

        while i < self.refs.len() && j < other.refs.len() {
            let (rl, rr) = (&self.refs[i], &other.refs[j]);

            let ordering = rl.cmp(rr);
            if ordering == Ordering::Equal {
                i += 1;
                j += 1;
                pending_left = None;
                pending_right = None;
                continue;
            }

            let left = match pending_left.take() {
                Some(p) => p,
                None => store.package_by_ref(rl)?,
            };
            let right = match pending_right.take() {
                Some(p) => p,
                None => store.package_by_ref(rr)?,
            };

            if left.name() == right.name() && left.architecture() == right.architecture() {
                result.push(PackageDiff {
                    left: Some(left),
                    right: Some(right),
                });
                i += 1;
                j += 1;
            } else if ordering == Ordering::Less {
                result.push(PackageDiff {
                    left: Some(left),
                    right: None,
                });
                pending_right = Some(right);
                i += 1;
            } else {
                result.push(PackageDiff {
                    left: None,
                    right: Some(right),
                });
                pending_left = Some(left);
                j += 1;
            }
        }

        for r in &self.refs[i..] {
            let left = match pending_left.take() {
                Some(p) => p,
                None => store.package_by_ref(r)?,
            };
            result.push(PackageDiff {
                left: Some(left),
                right: None,
            });
        }
        for r in &other.refs[j..] {
            let right = match pending_right.take() {
                Some(p) => p,
                None => store.package_by_ref(r)?,
            };
            result.push(PackageDiff {
                left: None,
                right: Some(right),
            });
        }

        Ok(result)
    }

    /// Merge with another list, preferring refs of `other`.
    ///
    /// With `override_matching`, refs of `other` replace every ref of this list
    /// describing the same `(architecture, name)` pair, regardless of version.
    ///
    /// With `merge_conflicting_matching`, a ref of this list and a ref of `other` with
    /// the same architecture, name and version but different files collapse to the ref
    /// of `other`. Otherwise both are kept.
    #[must_use]
    pub fn merge(
        &self,
        other: &PackageRefList,
        override_matching: bool,
        merge_conflicting_matching: bool,
    ) -> PackageRefList {
        let mut refs = Vec::with_capacity(self.refs.len() + other.refs.len());
        let (mut i, mut j) = (0, 0);
        let mut overridden: Option<&str> = None;

        loop {
            match (self.refs.get(i), other.refs.get(j)) {
                (None, None) => break,
                (Some(rl), None) => {
                    if override_matching && overridden == Some(rl.package_id()) {
                        i += 1;
                        continue;
                    }
                    refs.push(rl.clone());
                    i += 1;
                }
                (None, Some(rr)) => {
                    refs.push(rr.clone());
                    j += 1;
                }
                (Some(rl), Some(rr)) => {
                    if rl == rr {
                        refs.push(rl.clone());
                        i += 1;
                        j += 1;
                        continue;
                    }

                    let same_pair = rl.package_id() == rr.package_id();
                    if override_matching && same_pair {
                        overridden = Some(rl.package_id());
                    }

                    // Left refs superseded by `other` are dropped. The ref of `other` is
                    // emitted when the walk reaches it.
                    let superseded = (override_matching && overridden == Some(rl.package_id()))
                        || (merge_conflicting_matching && rl.short_key() == rr.short_key());
                    if superseded {
                        i += 1;
                    } else if rl < rr {
                        refs.push(rl.clone());
                        i += 1;
                    } else {
                        refs.push(rr.clone());
                        j += 1;
                    }
                }
            }
        }

        Self { refs }
    }

    /// Keep only the highest version of every `(architecture, name)` pair.
    ///
    /// Among refs of equal version, the first one is kept.
    pub fn filter_latest_refs(&mut self) {
        let mut keep = vec![false; self.refs.len()];

        let mut start = 0;
        while start < self.refs.len() {
            let id = self.refs[start].package_id();
            let end = start
                + self.refs[start..]
                    .iter()
                    .take_while(|r| r.package_id() == id)
                    .count();

            let mut best = start;
            for candidate in start + 1..end {
                if compare_versions(self.refs[candidate].version(), self.refs[best].version())
                    == Ordering::Greater
                {
                    best = candidate;
                }
            }
            keep[best] = true;

            start = end;
        }

        let mut position = 0;
        self.refs.retain(|_| {
            let keep = keep[position];
            position += 1;
            keep
        });
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{package::test::binary_package, store::MemoryPackageStore},
        rand::{rngs::StdRng, Rng, SeedableRng},
        std::collections::BTreeSet,
    };

    fn r(arch: &str, name: &str, version: &str, hash: u64) -> PackageRef {
        PackageRef::new(arch, name, version, hash)
    }

    fn list(refs: &[PackageRef]) -> PackageRefList {
        PackageRefList::from_refs(refs.iter().cloned())
    }

    fn set(list: &PackageRefList) -> BTreeSet<PackageRef> {
        list.iter().cloned().collect()
    }

    fn random_list(rng: &mut StdRng) -> PackageRefList {
        let arches = ["i386", "amd64", "all"];
        let names = ["app", "lib", "lib-dev", "lib+"];
        let versions = ["1.0", "1.0~rc1", "2.0", "1:0.1", "10"];

        (0..rng.gen_range(0..20))
            .map(|_| {
                r(
                    arches[rng.gen_range(0..arches.len())],
                    names[rng.gen_range(0..names.len())],
                    versions[rng.gen_range(0..versions.len())],
                    rng.gen_range(0..3),
                )
            })
            .collect()
    }

    #[test]
    fn construction_and_lookup() -> Result<()> {
        let refs = list(&[
            r("i386", "lib", "2.0", 1),
            r("amd64", "app", "1.0", 1),
            r("i386", "lib", "2.0", 1),
        ]);

        assert_eq!(refs.len(), 2);
        assert_eq!(
            refs.strings(),
            vec![
                "Pamd64 app 1.0 0000000000000001",
                "Pi386 lib 2.0 0000000000000001"
            ]
        );
        assert!(refs.has_ref(&r("i386", "lib", "2.0", 1)));
        assert!(!refs.has_ref(&r("i386", "lib", "2.0", 2)));

        let mut packages = PackageList::new();
        let p = Arc::new(binary_package("Package: a\nVersion: 1\nArchitecture: all\n"));
        packages.add(p.clone())?;
        let from_list = PackageRefList::from_package_list(&packages);
        assert!(from_list.has(&p));

        Ok(())
    }

    #[test]
    fn serde_encoding() {
        let refs = list(&[r("i386", "lib", "2.0", 255), r("amd64", "app", "1.0", 1)]);

        let encoded = serde_yaml::to_string(&refs).unwrap();
        let decoded: PackageRefList = serde_yaml::from_str(&encoded).unwrap();
        assert_eq!(decoded, refs);

        let unsorted: PackageRefList = serde_yaml::from_str(
            "- Pi386 lib 2.0 00000000000000ff\n- Pamd64 app 1.0 0000000000000001\n",
        )
        .unwrap();
        assert_eq!(unsorted, refs);

        assert!(serde_yaml::from_str::<PackageRefList>("- not a ref\n").is_err());
    }

    #[test]
    fn subtract() {
        let l = list(&[
            r("i386", "a", "1", 0),
            r("i386", "b", "1", 0),
            r("i386", "c", "1", 0),
        ]);
        let r_ = list(&[r("i386", "b", "1", 0), r("i386", "d", "1", 0)]);

        assert_eq!(
            l.subtract(&r_),
            list(&[r("i386", "a", "1", 0), r("i386", "c", "1", 0)])
        );
        assert_eq!(l.subtract(&PackageRefList::new()), l);
        assert!(l.subtract(&l).is_empty());
    }

    #[test]
    fn merge_override() {
        let l = list(&[
            r("i386", "app", "1.0", 0),
            r("i386", "lib", "1.0", 0),
            r("i386", "lib", "1.1", 0),
            r("i386", "lib", "1.2", 0),
        ]);
        let r_ = list(&[r("i386", "lib", "0.9", 0), r("i386", "tool", "1", 0)]);

        assert_eq!(
            l.merge(&r_, true, true),
            list(&[
                r("i386", "app", "1.0", 0),
                r("i386", "lib", "0.9", 0),
                r("i386", "tool", "1", 0),
            ])
        );

        // Left refs of an overridden pair are dropped after `other` is exhausted too.
        let r_ = list(&[r("i386", "lib", "0.9", 0)]);
        assert_eq!(
            l.merge(&r_, true, true),
            list(&[r("i386", "app", "1.0", 0), r("i386", "lib", "0.9", 0)])
        );

        assert_eq!(l.merge(&r_, false, true).len(), 5);
    }

    #[test]
    fn merge_conflicting() {
        let l = list(&[r("i386", "lib", "1.0", 1), r("i386", "app", "1.0", 1)]);
        let r_ = list(&[r("i386", "lib", "1.0", 2)]);

        assert_eq!(
            l.merge(&r_, false, true),
            list(&[r("i386", "app", "1.0", 1), r("i386", "lib", "1.0", 2)])
        );
        assert_eq!(l.merge(&r_, false, false).len(), 3);
    }

    #[test]
    fn filter_latest_runs() {
        let mut refs = list(&[
            r("i386", "lib", "1.0", 0),
            r("i386", "lib", "1.10", 0),
            r("i386", "lib", "1.9", 0),
            r("i386", "lib", "1.0~rc1", 0),
            r("i386", "lib", "1:0.1", 0),
            r("amd64", "lib", "3", 0),
            r("amd64", "lib", "2", 0),
            r("amd64", "lib", "4~", 0),
            r("i386", "app", "1", 0),
            r("i386", "app", "1", 1),
            r("i386", "lib-dev", "0.5", 0),
        ]);

        refs.filter_latest_refs();
        assert_eq!(
            refs,
            list(&[
                r("amd64", "lib", "4~", 0),
                r("i386", "app", "1", 0),
                r("i386", "lib", "1:0.1", 0),
                r("i386", "lib-dev", "0.5", 0),
            ])
        );

        let once = refs.clone();
        refs.filter_latest_refs();
        assert_eq!(refs, once);
    }

    #[test]
    fn set_algebra() {
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..200 {
            let l = random_list(&mut rng);
            let r_ = random_list(&mut rng);

            assert_eq!(l.subtract(&PackageRefList::new()), l);

            let intersection = l.subtract(&l.subtract(&r_));
            let mut union = set(&l.subtract(&r_));
            union.extend(set(&intersection));
            assert_eq!(union, set(&l));

            assert_eq!(l.merge(&r_, false, false), r_.merge(&l, false, false));
            let mut expected = set(&l);
            expected.extend(set(&r_));
            assert_eq!(set(&l.merge(&r_, false, false)), expected);

            for (override_matching, merge_conflicting) in
                [(true, true), (true, false), (false, true)]
            {
                let merged = l.merge(&r_, override_matching, merge_conflicting);
                assert!(merged.iter().zip(merged.iter().skip(1)).all(|(a, b)| a < b));
                assert!(r_.iter().all(|x| merged.has_ref(x)));
            }

            let mut latest = l.clone();
            latest.filter_latest_refs();
            let ids = latest.iter().map(|x| x.package_id()).collect::<BTreeSet<_>>();
            assert_eq!(ids.len(), latest.len());
            let mut twice = latest.clone();
            twice.filter_latest_refs();
            assert_eq!(twice, latest);
        }
    }

    fn stored(store: &mut MemoryPackageStore, name: &str, version: &str, arch: &str) -> PackageRef {
        store.add(Arc::new(binary_package(&format!(
            "Package: {}\nVersion: {}\nArchitecture: {}\n",
            name, version, arch
        ))))
    }

    #[test]
    fn diff() -> Result<()> {
        let mut store = MemoryPackageStore::new();
        let data = stored(&mut store, "data", "1", "all");
        let app1 = stored(&mut store, "app", "1.0", "i386");
        let app2 = stored(&mut store, "app", "2.0", "i386");
        let lib = stored(&mut store, "lib", "1.0", "i386");
        let tool = stored(&mut store, "tool", "1", "i386");

        let l = list(&[data, app1, lib.clone()]);
        let r_ = list(&[app2, lib, tool]);

        let diff = l
            .diff(&r_, &store)?
            .into_iter()
            .map(|d| {
                (
                    d.left.map(|p| p.to_string()),
                    d.right.map(|p| p.to_string()),
                )
            })
            .collect::<Vec<_>>();

        assert_eq!(
            diff,
            vec![
                (Some("data_1_all".to_string()), None),
                (
                    Some("app_1.0_i386".to_string()),
                    Some("app_2.0_i386".to_string())
                ),
                (None, Some("tool_1_i386".to_string())),
            ]
        );

        assert!(l.diff(&l, &store)?.is_empty());
        assert_eq!(r_.diff(&l, &store)?.len(), 3);

        let unknown = list(&[PackageRef::new("i386", "ghost", "1", 0)]);
        assert!(l.diff(&unknown, &store).unwrap_err().is_not_found());

        Ok(())
    }

    #[test]
    fn diff_empty_iff_equal() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut store = MemoryPackageStore::new();

        let mut all = vec![];
        for name in ["app", "lib", "tool"] {
            for version in ["1", "2", "3"] {
                for arch in ["i386", "amd64"] {
                    all.push(stored(&mut store, name, version, arch));
                }
            }
        }

        for _ in 0..100 {
            let pick = |rng: &mut StdRng| {
                all.iter()
                    .filter(|_| rng.gen_bool(0.3))
                    .cloned()
                    .collect::<PackageRefList>()
            };
            let l = pick(&mut rng);
            let r_ = pick(&mut rng);

            assert_eq!(l.diff(&r_, &store)?.is_empty(), l == r_);
        }

        Ok(())
    }

    struct CountingStore {
        inner: MemoryPackageStore,
        loads: std::cell::Cell<usize>,
    }

    impl PackageStore for CountingStore {
        fn package_by_ref(&self, package: &PackageRef) -> Result<Arc<Package>> {
            self.loads.set(self.loads.get() + 1);
            self.inner.package_by_ref(package)
        }
    }

    #[test]
    fn diff_loads_each_package_once() -> Result<()> {
        let mut inner = MemoryPackageStore::new();
        let left_refs = ["a", "c", "e", "g"]
            .iter()
            .map(|name| stored(&mut inner, name, "1", "i386"))
            .collect::<Vec<_>>();
        let right_refs = ["b", "d", "f", "h"]
            .iter()
            .map(|name| stored(&mut inner, name, "1", "i386"))
            .collect::<Vec<_>>();
        let app1 = stored(&mut inner, "app", "1", "i386");
        let app2 = stored(&mut inner, "app", "2", "i386");

        let store = CountingStore {
            inner,
            loads: std::cell::Cell::new(0),
        };

        let diff = list(&left_refs).diff(&list(&right_refs), &store)?;
        assert_eq!(diff.len(), 8);
        assert_eq!(store.loads.get(), 8);

        store.loads.set(0);
        let mut l = left_refs.clone();
        l.push(app1);
        let mut r_ = right_refs;
        r_.push(app2);
        r_.push(left_refs[0].clone());

        let diff = list(&l).diff(&list(&r_), &store)?;
        assert_eq!(diff.len(), 8);
        assert!(diff
            .iter()
            .any(|d| d.left.is_some() && d.right.is_some()));
        // `a` is shared and never loaded.
        assert_eq!(store.loads.get(), 9);

        Ok(())
    }
}
