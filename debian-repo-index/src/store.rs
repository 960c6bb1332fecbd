// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package record storage.

Ref lists only carry [PackageRef]s. Materializing packages from them goes through a
[PackageStore].
*/

use {
    crate::{
        error::{DebianError, Result},
        package::{Package, PackageContents, PackageContentsLoader},
        package_ref::PackageRef,
    },
    std::{collections::BTreeMap, sync::Arc},
};

/// Resolves package refs to package records.
pub trait PackageStore {
    /// Obtain the package identified by a ref.
    ///
    /// Misses must be reported as [DebianError::PackageNotFound].
    fn package_by_ref(&self, package: &PackageRef) -> Result<Arc<Package>>;
}

/// A [PackageStore] holding packages in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryPackageStore {
    packages: BTreeMap<PackageRef, Arc<Package>>,
}

impl MemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a package, returning its ref.
    ///
    /// A package with the same ref replaces the stored one.
    pub fn add(&mut self, package: Arc<Package>) -> PackageRef {
        let r = package.package_ref();
        self.packages.insert(r.clone(), package);

        r
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate stored packages in ref order.
    pub fn iter(&self) -> impl Iterator<Item = (&PackageRef, &Arc<Package>)> {
        self.packages.iter()
    }
}

impl PackageStore for MemoryPackageStore {
    fn package_by_ref(&self, package: &PackageRef) -> Result<Arc<Package>> {
        self.packages
            .get(package)
            .cloned()
            .ok_or_else(|| DebianError::PackageNotFound(package.to_string()))
    }
}

impl PackageContentsLoader for MemoryPackageStore {
    fn load_contents(&self, package: &PackageRef) -> Result<PackageContents> {
        Ok(self.package_by_ref(package)?.contents()?.clone())
    }
}

impl Extend<Arc<Package>> for MemoryPackageStore {
    fn extend<T: IntoIterator<Item = Arc<Package>>>(&mut self, iter: T) {
        for package in iter {
            self.add(package);
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::package::test::binary_package, std::sync::Weak};

    #[test]
    fn lookup() -> Result<()> {
        let mut store = MemoryPackageStore::new();
        let r = store.add(Arc::new(binary_package(
            "Package: app\nVersion: 1.0\nArchitecture: i386\nSection: utils\n",
        )));

        assert_eq!(store.len(), 1);
        assert_eq!(store.package_by_ref(&r)?.name(), "app");

        let missing = PackageRef::new("i386", "app", "2.0", 0);
        assert!(store.package_by_ref(&missing).unwrap_err().is_not_found());

        Ok(())
    }

    #[test]
    fn deferred_contents_from_store() -> Result<()> {
        let package = binary_package(
            "Package: app\nVersion: 1.0\nArchitecture: i386\nSection: utils\nDepends: lib\n",
        );

        let mut store = MemoryPackageStore::new();
        store.add(Arc::new(package.clone()));
        let store = Arc::new(store);

        let loader: Weak<dyn PackageContentsLoader> = Arc::downgrade(&store) as _;
        let deferred = package.into_deferred(loader);

        assert!(!deferred.is_contents_loaded());
        assert_eq!(deferred.field("Section"), "utils");
        assert_eq!(deferred.dependencies()?.depends, vec!["lib"]);
        assert!(deferred.is_contents_loaded());

        Ok(())
    }
}
