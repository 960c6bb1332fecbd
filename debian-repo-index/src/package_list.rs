// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Indexed collections of packages.

A [PackageList] holds at most one [Package] per key. Two keying modes exist:

* *Short keys* (`P<arch> <name> <version>`) describe live repository state, where
  a given version of a package can only exist once. Adding a package with the same
  short key but different content is a conflict.
* *Full keys* additionally include the files hash, so records of the same version
  with different content can coexist. Snapshots merged from multiple sources need this.

Searching requires an index, built by [PackageList::prepare_index()]. The index sorts
packages by name, then version (highest first), then architecture, so unversioned
searches find the newest version first.
*/

use {
    crate::{
        dependency::{
            dedupe_variants, parse_dependency_variants, Dependency, DependencyOptions,
            VersionRelation,
        },
        error::{DebianError, Result},
        package::{Package, ARCHITECTURE_ALL, ARCHITECTURE_SOURCE},
        package_version::compare_versions,
        query::PackageQuery,
        ref_list::PackageRefList,
        store::PackageStore,
    },
    log::debug,
    std::{
        cmp::Ordering,
        collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap},
        fmt::{Display, Formatter},
        sync::Arc,
    },
};

/// Describes activity of long running package list operations.
///
/// Events are purely informational. Consumers can render progress bars or log them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IndexEvent {
    /// An operation processing `total` units started. Units are bytes if `bytes` is set.
    ProgressBegin { total: usize, bytes: bool },

    /// Progress was made on the current operation.
    ProgressAdvance(usize),

    /// The current operation finished.
    ProgressFinished,

    /// A package has dependencies which couldn't be satisfied.
    MissingDependencies {
        package: String,
        dependencies: Vec<String>,
    },

    /// A package was pulled in to satisfy a dependency.
    PackageInjected { package: String, dependency: String },

    /// No package satisfying a dependency could be found.
    DependencyUnsatisfied(String),
}

impl Display for IndexEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProgressBegin { total, bytes } => {
                if *bytes {
                    write!(f, "processing {} bytes", total)
                } else {
                    write!(f, "processing {} items", total)
                }
            }
            Self::ProgressAdvance(count) => write!(f, "processed {} items", count),
            Self::ProgressFinished => write!(f, "done"),
            Self::MissingDependencies {
                package,
                dependencies,
            } => {
                write!(
                    f,
                    "missing dependencies for package {}: {}",
                    package,
                    dependencies.join(", ")
                )
            }
            Self::PackageInjected {
                package,
                dependency,
            } => {
                write!(f, "injecting package {} to satisfy {}", package, dependency)
            }
            Self::DependencyUnsatisfied(dependency) => {
                write!(f, "unsatisfied dependency: {}", dependency)
            }
        }
    }
}

/// Optional sink receiving [IndexEvent].
pub type ProgressCallback<'a> = Option<&'a dyn Fn(IndexEvent)>;

fn emit(progress: ProgressCallback<'_>, event: IndexEvent) {
    if let Some(cb) = progress {
        cb(event);
    }
}

/// Order of the search index: name ascending, version descending, architecture ascending.
fn index_order(a: &Package, b: &Package) -> Ordering {
    a.name()
        .cmp(b.name())
        .then_with(|| compare_versions(b.version(), a.version()))
        .then_with(|| a.architecture().cmp(b.architecture()))
        .then_with(|| a.version().cmp(b.version()))
        .then_with(|| a.files_hash().cmp(&b.files_hash()))
}

#[derive(Clone, Debug, Default)]
struct PackageIndex {
    sorted: Vec<Arc<Package>>,
    provides: HashMap<String, Vec<Arc<Package>>>,
}

impl PackageIndex {
    fn insert(&mut self, package: &Arc<Package>) {
        let pos = self
            .sorted
            .partition_point(|p| index_order(p, package) == Ordering::Less);
        self.sorted.insert(pos, package.clone());

        for name in package.provides() {
            self.provides
                .entry(name.clone())
                .or_default()
                .push(package.clone());
        }
    }

    fn remove(&mut self, package: &Package) {
        let start = self
            .sorted
            .partition_point(|p| index_order(p, package) == Ordering::Less);

        if let Some(offset) = self.sorted[start..]
            .iter()
            .take_while(|p| index_order(p, package) == Ordering::Equal)
            .position(|p| **p == *package)
        {
            // Shifting removal keeps the index sorted.
            self.sorted.remove(start + offset);
        }

        for name in package.provides() {
            if let Some(bucket) = self.provides.get_mut(name) {
                if let Some(pos) = bucket.iter().position(|p| **p == *package) {
                    bucket.swap_remove(pos);
                }
                if bucket.is_empty() {
                    self.provides.remove(name);
                }
            }
        }
    }

    /// The run of packages with a given name.
    fn by_name(&self, name: &str) -> &[Arc<Package>] {
        let start = self.sorted.partition_point(|p| p.name() < name);
        let len = self.sorted[start..]
            .iter()
            .take_while(|p| p.name() == name)
            .count();

        &self.sorted[start..start + len]
    }
}

/// A keyed, optionally indexed collection of packages.
#[derive(Clone, Debug, Default)]
pub struct PackageList {
    packages: BTreeMap<String, Arc<Package>>,
    full_keys: bool,
    index: Option<PackageIndex>,
}

impl PackageList {
    /// Construct an empty list keyed by short keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct an empty list keyed by full keys, allowing multiple records of the same
    /// version with different files.
    ///
    /// Searching, verification and filtering work in both keying modes. Only `add`
    /// conflict detection differs.
    pub fn with_duplicates() -> Self {
        Self {
            full_keys: true,
            ..Default::default()
        }
    }

    /// Materialize packages referenced by a ref list.
    ///
    /// The resulting list uses short keys. Refs to the same version with different
    /// content are therefore reported as conflicts. Store misses are errors.
    pub fn from_ref_list(
        refs: &PackageRefList,
        store: &dyn PackageStore,
        progress: ProgressCallback<'_>,
    ) -> Result<Self> {
        let mut list = Self::new();

        emit(
            progress,
            IndexEvent::ProgressBegin {
                total: refs.len(),
                bytes: false,
            },
        );

        for r in refs.iter() {
            list.add(store.package_by_ref(r)?)?;
            emit(progress, IndexEvent::ProgressAdvance(1));
        }

        emit(progress, IndexEvent::ProgressFinished);

        Ok(list)
    }

    /// Whether this list is keyed by full keys.
    pub fn allows_duplicates(&self) -> bool {
        self.full_keys
    }

    /// An empty list with the same keying mode.
    fn empty_like(&self) -> Self {
        Self {
            full_keys: self.full_keys,
            ..Default::default()
        }
    }

    fn key_for(&self, package: &Package) -> String {
        if self.full_keys {
            package.package_ref().to_string()
        } else {
            package.short_key()
        }
    }

    /// Add a package.
    ///
    /// Adding a package identical to one already present is a no-op. Adding a different
    /// package under an existing key is a [DebianError::PackageConflict] and leaves the
    /// list unchanged.
    pub fn add(&mut self, package: Arc<Package>) -> Result<()> {
        match self.packages.entry(self.key_for(&package)) {
            Entry::Occupied(existing) => {
                if **existing.get() == *package {
                    Ok(())
                } else {
                    Err(DebianError::PackageConflict(format!(
                        "{} (files hash {:016x}) conflicts with existing files hash {:016x}",
                        package,
                        package.files_hash(),
                        existing.get().files_hash()
                    )))
                }
            }
            Entry::Vacant(entry) => {
                if let Some(index) = &mut self.index {
                    index.insert(&package);
                }
                entry.insert(package);

                Ok(())
            }
        }
    }

    /// Add all packages from another list.
    ///
    /// Conflicts are checked before anything is added, so a failed append leaves this
    /// list unchanged.
    pub fn append(&mut self, other: &PackageList) -> Result<()> {
        for package in other.iter() {
            if let Some(existing) = self.packages.get(&self.key_for(package)) {
                if **existing != **package {
                    return Err(DebianError::PackageConflict(format!(
                        "{} conflicts with existing package in list",
                        package
                    )));
                }
            }
        }

        for package in other.iter() {
            self.add(package.clone())?;
        }

        Ok(())
    }

    /// Insert a package unless its key is already present.
    fn insert_if_vacant(&mut self, package: Arc<Package>) {
        if let Entry::Vacant(entry) = self.packages.entry(self.key_for(&package)) {
            if let Some(index) = &mut self.index {
                index.insert(&package);
            }
            entry.insert(package);
        }
    }

    /// Add packages of a list derived from the same collection as this one.
    ///
    /// Keys already present are kept, so no conflict can arise.
    pub(crate) fn union_with(&mut self, other: PackageList) {
        for package in other.packages.into_values() {
            self.insert_if_vacant(package);
        }
    }

    /// Remove a package by its key, returning the removed record.
    pub fn remove(&mut self, package: &Package) -> Option<Arc<Package>> {
        let removed = self.packages.remove(&self.key_for(package))?;

        if let Some(index) = &mut self.index {
            index.remove(&removed);
        }

        Some(removed)
    }

    /// Whether an identical package is present.
    pub fn has(&self, package: &Package) -> bool {
        self.packages
            .get(&self.key_for(package))
            .map(|existing| **existing == *package)
            .unwrap_or(false)
    }

    /// Number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate packages in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Package>> {
        self.packages.values()
    }

    /// Whether the search index is built.
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Build the search index. Calling it again is a no-op.
    pub fn prepare_index(&mut self) {
        if self.index.is_some() {
            return;
        }

        let mut index = PackageIndex {
            sorted: self.packages.values().cloned().collect(),
            provides: HashMap::new(),
        };
        index.sorted.sort_by(|a, b| index_order(a, b));

        for package in &index.sorted {
            for name in package.provides() {
                index
                    .provides
                    .entry(name.clone())
                    .or_default()
                    .push(package.clone());
            }
        }

        debug!(
            "indexed {} packages providing {} virtual packages",
            index.sorted.len(),
            index.provides.len()
        );

        self.index = Some(index);
    }

    fn index(&self) -> &PackageIndex {
        match &self.index {
            Some(index) => index,
            None => panic!("package list is not indexed; call prepare_index() first"),
        }
    }

    /// Iterate packages in index order.
    ///
    /// # Panics
    ///
    /// If the list is not indexed.
    pub fn iter_indexed(&self) -> impl Iterator<Item = &Arc<Package>> {
        self.index().sorted.iter()
    }

    /// Find packages satisfying a dependency.
    ///
    /// Packages named by the dependency are examined highest version first. Unversioned
    /// dependencies are also satisfied by packages providing the name. Unless
    /// `all_matches` is set, at most one package is returned.
    ///
    /// # Panics
    ///
    /// If the list is not indexed.
    pub fn search(&self, dep: &Dependency, all_matches: bool) -> Vec<Arc<Package>> {
        let index = self.index();
        let mut result: Vec<Arc<Package>> = vec![];

        for package in index.by_name(dep.package()) {
            if package.matches_dependency(dep) {
                result.push(package.clone());

                if !all_matches {
                    return result;
                }
            }
        }

        if dep.relation() == VersionRelation::DontCare {
            if let Some(providers) = index.provides.get(dep.package()) {
                for package in providers {
                    if let Some(arch) = dep.architecture() {
                        if !package.matches_architecture(arch) {
                            continue;
                        }
                    }
                    if result.iter().any(|p| Arc::ptr_eq(p, package)) {
                        continue;
                    }

                    result.push(package.clone());

                    if !all_matches {
                        return result;
                    }
                }
            }
        }

        result
    }

    /// Find packages by exact architecture, name and version.
    ///
    /// Lists with full keys can hold several records matching.
    ///
    /// # Panics
    ///
    /// If the list is not indexed.
    pub fn search_by_key(&self, architecture: &str, name: &str, version: &str) -> Vec<Arc<Package>> {
        self.index()
            .by_name(name)
            .iter()
            .filter(|p| p.version() == version && p.architecture() == architecture)
            .cloned()
            .collect()
    }

    /// Packages matching a query, evaluated against every record.
    pub fn scan(&self, query: &PackageQuery) -> PackageList {
        let mut result = self.empty_like();

        for (key, package) in &self.packages {
            if query.matches(package) {
                result.packages.insert(key.clone(), package.clone());
            }
        }

        result
    }

    /// A list with the same keying mode holding `packages` of this list.
    pub(crate) fn sublist(&self, packages: impl IntoIterator<Item = Arc<Package>>) -> Self {
        let mut result = self.empty_like();

        for package in packages {
            result.insert_if_vacant(package);
        }

        result
    }

    /// Verify that dependencies of packages in this list are satisfied by `sources`.
    ///
    /// Every architecture in `architectures` is verified in turn. Dependencies without an
    /// architecture restriction are restricted to the architecture being verified.
    ///
    /// An expression with alternatives is unsatisfied only if none of its alternatives is.
    /// With [DependencyOptions::FOLLOW_ALL_VARIANTS], every unsatisfied alternative is
    /// reported.
    ///
    /// # Panics
    ///
    /// If this list or `sources` is not indexed.
    pub fn verify_dependencies(
        &self,
        options: DependencyOptions,
        architectures: &[String],
        sources: &PackageList,
        progress: ProgressCallback<'_>,
    ) -> Result<Vec<Dependency>> {
        let index = self.index();
        let mut missing = vec![];

        emit(
            progress,
            IndexEvent::ProgressBegin {
                total: architectures.len() * index.sorted.len(),
                bytes: false,
            },
        );

        for arch in architectures {
            let mut cache: HashMap<Dependency, bool> = HashMap::new();

            for package in &index.sorted {
                emit(progress, IndexEvent::ProgressAdvance(1));

                if !package.matches_architecture(arch) {
                    continue;
                }

                let wrap = |e: DebianError| DebianError::PackageDependencies {
                    package: package.to_string(),
                    source: Box::new(e),
                };

                for expr in package.dependencies_for(options).map_err(wrap)? {
                    let variants = dedupe_variants(parse_dependency_variants(&expr).map_err(wrap)?);

                    let mut variants_missing = vec![];

                    for mut dep in variants {
                        dep.default_architecture(arch);

                        let (satisfied, cached) = match cache.get(&dep) {
                            Some(satisfied) => (*satisfied, true),
                            None => {
                                let satisfied = !sources.search(&dep, false).is_empty();
                                cache.insert(dep.clone(), satisfied);
                                (satisfied, false)
                            }
                        };

                        // Misses are reported once per architecture.
                        if !satisfied {
                            if !cached {
                                variants_missing.push(dep);
                            }
                        } else if !options.contains(DependencyOptions::FOLLOW_ALL_VARIANTS) {
                            variants_missing.clear();
                            break;
                        }
                    }

                    if options.contains(DependencyOptions::VERBOSE_RESOLVE)
                        && !variants_missing.is_empty()
                    {
                        emit(
                            progress,
                            IndexEvent::MissingDependencies {
                                package: package.to_string(),
                                dependencies: variants_missing
                                    .iter()
                                    .map(|d| d.to_string())
                                    .collect(),
                            },
                        );
                    }

                    missing.extend(variants_missing);
                }
            }
        }

        emit(progress, IndexEvent::ProgressFinished);

        Ok(missing)
    }

    /// Packages matching any of `queries`, optionally with their dependency closure.
    ///
    /// See [Self::filter_with_progress()].
    pub fn filter(
        &self,
        queries: &[PackageQuery],
        with_dependencies: bool,
        source: Option<&PackageList>,
        options: DependencyOptions,
        architectures: &[String],
    ) -> Result<PackageList> {
        self.filter_with_progress(
            queries,
            with_dependencies,
            source,
            options,
            architectures,
            None,
        )
    }

    /// Packages matching any of `queries`, optionally with their dependency closure.
    ///
    /// With `with_dependencies`, dependencies of the result which are satisfied neither by
    /// `source` nor by the result itself are searched in this list and added to the result
    /// until no more packages can be added. Without
    /// [DependencyOptions::FOLLOW_ALL_VARIANTS] only the best candidate of each missing
    /// dependency is added.
    ///
    /// `source` is never modified and needs no index. Unsatisfiable dependencies are
    /// reported through `progress` and are not errors.
    ///
    /// # Panics
    ///
    /// If this list is not indexed.
    pub fn filter_with_progress(
        &self,
        queries: &[PackageQuery],
        with_dependencies: bool,
        source: Option<&PackageList>,
        options: DependencyOptions,
        architectures: &[String],
        progress: ProgressCallback<'_>,
    ) -> Result<PackageList> {
        let mut result = self.empty_like();
        for query in queries {
            result.union_with(query.query(self));
        }

        if !with_dependencies {
            return Ok(result);
        }

        result.prepare_index();

        // Full keys so that packages in `source` and in this list never conflict.
        let mut dependency_source = PackageList::with_duplicates();
        for package in source.into_iter().flat_map(|l| l.iter()).chain(result.iter()) {
            dependency_source.insert_if_vacant(package.clone());
        }
        dependency_source.prepare_index();

        let verbose = options.contains(DependencyOptions::VERBOSE_RESOLVE);
        let follow_all = options.contains(DependencyOptions::FOLLOW_ALL_VARIANTS);

        let mut pass = 0;
        let mut added = result.len();
        while added > 0 {
            added = 0;
            pass += 1;

            let missing =
                result.verify_dependencies(options, architectures, &dependency_source, progress)?;
            debug!(
                "dependency closure pass {}: {} missing dependencies",
                pass,
                missing.len()
            );

            for dep in missing {
                if !follow_all && !result.search(&dep, false).is_empty() {
                    debug!("dependency {} already satisfied", dep);
                    continue;
                }

                let candidates = self.search(&dep, true);
                if candidates.is_empty() {
                    if verbose {
                        emit(progress, IndexEvent::DependencyUnsatisfied(dep.to_string()));
                    }
                    continue;
                }

                for package in candidates {
                    if result.has(&package) {
                        continue;
                    }

                    if verbose {
                        emit(
                            progress,
                            IndexEvent::PackageInjected {
                                package: package.to_string(),
                                dependency: dep.to_string(),
                            },
                        );
                    }

                    result.add(package.clone())?;
                    dependency_source.add(package)?;
                    added += 1;

                    if !follow_all {
                        break;
                    }
                }
            }
        }

        Ok(result)
    }

    /// Architectures of packages in this list, sorted.
    ///
    /// `all` is never reported. `source` is reported only if `include_source` is set.
    pub fn architectures(&self, include_source: bool) -> Vec<String> {
        self.packages
            .values()
            .map(|p| p.architecture())
            .filter(|arch| *arch != ARCHITECTURE_ALL)
            .filter(|arch| include_source || *arch != ARCHITECTURE_SOURCE)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|arch| arch.to_string())
            .collect()
    }

    /// Keys of packages in this list, sorted.
    pub fn strings(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    /// `name_version_arch` of every package, in key order.
    pub fn full_names(&self) -> Vec<String> {
        self.packages.values().map(|p| p.to_string()).collect()
    }
}
