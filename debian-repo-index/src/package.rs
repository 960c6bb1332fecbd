// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package records.

A [Package] describes one binary package, installer package (udeb) or source package
as advertised by a `Packages` or `Sources` index.

Identity (name, version, architecture, source link, provides and the hash of backing
files) is always held inline since indexing needs it. The bulkier *contents*
(dependency fields, remaining control fields and backing files) are either held
inline or materialized on first use through a [PackageContentsLoader].
*/

use {
    crate::{
        control::ControlParagraph,
        dependency::{
            split_dependency_field, Dependency, DependencyField, DependencyOptions,
            PackageDependencyFields, VersionRelation,
        },
        error::{DebianError, Result},
        package_ref::PackageRef,
    },
    log::warn,
    once_cell::sync::OnceCell,
    sha2::{Digest, Sha256},
    std::{
        borrow::Cow,
        collections::BTreeMap,
        fmt::{Display, Formatter},
        str::FromStr,
        sync::Weak,
    },
    strum::IntoEnumIterator,
};

/// Architecture of packages installable on every binary architecture.
pub const ARCHITECTURE_ALL: &str = "all";

/// Pseudo architecture of source packages.
pub const ARCHITECTURE_SOURCE: &str = "source";

/// Fields of binary package paragraphs that describe the backing `.deb`.
const BINARY_FILE_FIELDS: &[&str] = &["Filename", "Size", "MD5sum", "SHA1", "SHA256", "SHA512"];

/// Fields of source package paragraphs listing backing files, with the checksum flavor
/// each one carries.
const SOURCE_FILE_FIELDS: &[(&str, ChecksumKind)] = &[
    ("Files", ChecksumKind::Md5),
    ("Checksums-Sha1", ChecksumKind::Sha1),
    ("Checksums-Sha256", ChecksumKind::Sha256),
    ("Checksums-Sha512", ChecksumKind::Sha512),
];

#[derive(Clone, Copy, Debug)]
enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

/// Size and digests of a file backing a package.
///
/// Digests are lower case hex strings. Missing digests are empty.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageFileChecksums {
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

impl PackageFileChecksums {
    fn set(&mut self, kind: ChecksumKind, digest: &str) {
        let slot = match kind {
            ChecksumKind::Md5 => &mut self.md5,
            ChecksumKind::Sha1 => &mut self.sha1,
            ChecksumKind::Sha256 => &mut self.sha256,
            ChecksumKind::Sha512 => &mut self.sha512,
        };

        *slot = digest.to_ascii_lowercase();
    }

    fn get(&self, kind: ChecksumKind) -> &str {
        match kind {
            ChecksumKind::Md5 => &self.md5,
            ChecksumKind::Sha1 => &self.sha1,
            ChecksumKind::Sha256 => &self.sha256,
            ChecksumKind::Sha512 => &self.sha512,
        }
    }
}

/// A file backing a package.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageFile {
    /// Base name of the file.
    pub filename: String,
    /// Repository relative directory holding the file. May be empty.
    pub download_path: String,
    pub checksums: PackageFileChecksums,
}

impl PackageFile {
    /// Repository relative path of the file.
    pub fn path(&self) -> String {
        if self.download_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.download_path.trim_end_matches('/'), self.filename)
        }
    }
}

/// Compute the 64-bit content hash of a set of backing files.
///
/// Files are hashed in filename order, so the input order is irrelevant.
pub fn files_hash(files: &[PackageFile]) -> u64 {
    let mut sorted = files.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.filename.cmp(&b.filename));

    let mut hasher = Sha256::new();
    for file in sorted {
        hasher.update(file.filename.as_bytes());
        hasher.update([0u8]);
        hasher.update(file.checksums.size.to_be_bytes());
        for digest in [
            &file.checksums.md5,
            &file.checksums.sha1,
            &file.checksums.sha256,
        ] {
            hasher.update(digest.as_bytes());
            hasher.update([0u8]);
        }
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);

    u64::from_be_bytes(bytes)
}

/// Data of a package that is not needed for indexing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageContents {
    /// Unparsed dependency expressions.
    pub dependencies: PackageDependencyFields,
    /// Control fields not modeled elsewhere.
    pub extra: ControlParagraph<'static>,
    /// Files backing the package.
    pub files: Vec<PackageFile>,
}

/// Materializes [PackageContents] for packages that don't carry them inline.
pub trait PackageContentsLoader: Send + Sync {
    /// Load the contents of the package identified by a ref.
    fn load_contents(&self, package: &PackageRef) -> Result<PackageContents>;
}

/// A binary, udeb or source package record.
///
/// Identity fields are immutable after construction. Equality compares identity
/// fields including the files hash: two records for the same name, version and
/// architecture but with different backing files are different packages.
#[derive(Clone)]
pub struct Package {
    name: String,
    version: String,
    architecture: String,
    source_architecture: Option<String>,
    source: Option<String>,
    provides: Vec<String>,
    is_source: bool,
    is_udeb: bool,
    files_hash: u64,
    contents: OnceCell<PackageContents>,
    loader: Option<Weak<dyn PackageContentsLoader>>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("architecture", &self.architecture)
            .field("source_architecture", &self.source_architecture)
            .field("source", &self.source)
            .field("provides", &self.provides)
            .field("is_source", &self.is_source)
            .field("is_udeb", &self.is_udeb)
            .field("files_hash", &format_args!("{:016x}", self.files_hash))
            .field("contents_loaded", &self.contents.get().is_some())
            .finish()
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.architecture == other.architecture
            && self.source_architecture == other.source_architecture
            && self.source == other.source
            && self.is_source == other.is_source
            && self.files_hash == other.files_hash
    }
}

impl Eq for Package {}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.architecture)
    }
}

fn take_field(para: &mut ControlParagraph<'static>, name: &str) -> Option<String> {
    para.remove_field(name)
        .map(|field| field.value_str().to_string())
}

fn take_required_field(para: &mut ControlParagraph<'static>, name: &str) -> Result<String> {
    take_field(para, name).ok_or_else(|| DebianError::ControlRequiredFieldMissing(name.to_string()))
}

impl Package {
    /// Construct an instance from a binary package paragraph, as found in `Packages` files.
    ///
    /// Packages whose `Filename` ends in `.udeb` or which declare `Package-Type: udeb`
    /// are flagged as installer packages.
    pub fn from_binary_paragraph(para: &ControlParagraph) -> Result<Self> {
        let mut extra = para.clone().into_owned();

        let name = take_required_field(&mut extra, "Package")?;
        let version = take_required_field(&mut extra, "Version")?;
        let architecture = take_required_field(&mut extra, "Architecture")?;
        let source = take_field(&mut extra, "Source");
        let provides = take_field(&mut extra, "Provides")
            .map(|v| parse_provides(&v))
            .unwrap_or_default();

        let dependencies = PackageDependencyFields::from_paragraph(&extra);
        for field in DependencyField::iter() {
            extra.remove_field(field.as_ref());
        }

        let size = extra.field_u64("Size").transpose()?.unwrap_or_default();
        let mut files = vec![];
        if let Some(path) = extra.field_str("Filename") {
            let (download_path, filename) = path.rsplit_once('/').unwrap_or(("", path));

            let mut checksums = PackageFileChecksums {
                size,
                ..Default::default()
            };
            for (field, kind) in [
                ("MD5sum", ChecksumKind::Md5),
                ("SHA1", ChecksumKind::Sha1),
                ("SHA256", ChecksumKind::Sha256),
                ("SHA512", ChecksumKind::Sha512),
            ] {
                if let Some(digest) = extra.field_str(field) {
                    checksums.set(kind, digest.trim());
                }
            }

            files.push(PackageFile {
                filename: filename.to_string(),
                download_path: download_path.to_string(),
                checksums,
            });
        }
        for field in BINARY_FILE_FIELDS {
            extra.remove_field(field);
        }

        let is_udeb = files.iter().any(|f| f.filename.ends_with(".udeb"))
            || matches!(take_field(&mut extra, "Package-Type").as_deref(), Some("udeb"));

        Ok(Self {
            name,
            version,
            architecture,
            source_architecture: None,
            source,
            provides,
            is_source: false,
            is_udeb,
            files_hash: files_hash(&files),
            contents: OnceCell::with_value(PackageContents {
                dependencies,
                extra,
                files,
            }),
            loader: None,
        })
    }

    /// Construct an instance from a source package paragraph, as found in `Sources` files.
    ///
    /// The architecture of source packages is always `source`. The `Architecture` field
    /// of the paragraph is retained as the source architecture.
    pub fn from_source_paragraph(para: &ControlParagraph) -> Result<Self> {
        let mut extra = para.clone().into_owned();

        let name = take_required_field(&mut extra, "Package")?;
        let version = take_required_field(&mut extra, "Version")?;
        let source_architecture = take_field(&mut extra, "Architecture");
        let directory = take_field(&mut extra, "Directory").unwrap_or_default();

        let dependencies = PackageDependencyFields::from_paragraph(&extra);
        extra.remove_field(DependencyField::BuildDepends.as_ref());
        extra.remove_field(DependencyField::BuildDependsIndep.as_ref());

        let mut files = BTreeMap::<String, PackageFile>::new();
        for (field, kind) in SOURCE_FILE_FIELDS {
            let value = match take_field(&mut extra, field) {
                Some(value) => value,
                None => continue,
            };

            for line in value.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
                let parts = line.split_ascii_whitespace().collect::<Vec<_>>();
                let (digest, size, filename) = match parts.as_slice() {
                    [digest, size, filename] => (*digest, *size, *filename),
                    _ => {
                        return Err(DebianError::PackageChecksumLine(
                            field.to_string(),
                            line.to_string(),
                        ))
                    }
                };

                let entry = files
                    .entry(filename.to_string())
                    .or_insert_with(|| PackageFile {
                        filename: filename.to_string(),
                        download_path: directory.clone(),
                        checksums: PackageFileChecksums::default(),
                    });
                entry.checksums.size = u64::from_str(size)?;
                entry.checksums.set(*kind, digest);
            }
        }
        let files = files.into_values().collect::<Vec<_>>();

        Ok(Self {
            name,
            version,
            architecture: ARCHITECTURE_SOURCE.to_string(),
            source_architecture,
            source: None,
            provides: vec![],
            is_source: true,
            is_udeb: false,
            files_hash: files_hash(&files),
            contents: OnceCell::with_value(PackageContents {
                dependencies,
                extra,
                files,
            }),
            loader: None,
        })
    }

    /// Detach inline contents and load them through a loader on demand.
    ///
    /// The loader is held weakly. Accessing contents after it is dropped is an error.
    #[must_use]
    pub fn into_deferred(mut self, loader: Weak<dyn PackageContentsLoader>) -> Self {
        self.contents = OnceCell::new();
        self.loader = Some(loader);
        self
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The architecture. `source` for source packages.
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// The architecture list of a source package, as declared in its paragraph.
    pub fn source_architecture(&self) -> Option<&str> {
        self.source_architecture.as_deref()
    }

    /// The raw `Source` field, possibly of the form `name (version)`.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Names of virtual packages this package provides.
    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    /// Whether this is a source package.
    pub fn is_source(&self) -> bool {
        self.is_source
    }

    /// Whether this is an installer (udeb) package.
    pub fn is_udeb(&self) -> bool {
        self.is_udeb
    }

    /// Hash of the files backing this package.
    pub fn files_hash(&self) -> u64 {
        self.files_hash
    }

    /// The full ref of this package, including the files hash.
    pub fn package_ref(&self) -> PackageRef {
        PackageRef::new(&self.architecture, &self.name, &self.version, self.files_hash)
    }

    /// Key ignoring file contents: `P<architecture> <name> <version>`.
    pub fn short_key(&self) -> String {
        format!("P{} {} {}", self.architecture, self.name, self.version)
    }

    /// Whether contents are available without invoking a loader.
    pub fn is_contents_loaded(&self) -> bool {
        self.contents.get().is_some()
    }

    /// Obtain package contents, loading them if necessary.
    pub fn contents(&self) -> Result<&PackageContents> {
        self.contents.get_or_try_init(|| {
            let loader = self
                .loader
                .as_ref()
                .and_then(|loader| loader.upgrade())
                .ok_or_else(|| DebianError::PackageContentsUnavailable(self.to_string()))?;

            loader.load_contents(&self.package_ref())
        })
    }

    /// Unparsed dependency expressions.
    pub fn dependencies(&self) -> Result<&PackageDependencyFields> {
        Ok(&self.contents()?.dependencies)
    }

    /// Control fields not modeled by dedicated accessors.
    pub fn extra(&self) -> Result<&ControlParagraph<'static>> {
        Ok(&self.contents()?.extra)
    }

    /// Files backing this package.
    pub fn files(&self) -> Result<&[PackageFile]> {
        Ok(&self.contents()?.files)
    }

    /// The source package name this package was built from.
    ///
    /// Empty for source packages.
    pub fn source_name(&self) -> &str {
        if self.is_source {
            return "";
        }

        match self.source.as_deref() {
            None => &self.name,
            Some(source) => match source.find('(') {
                Some(pos) => source[..pos].trim(),
                None => source.trim(),
            },
        }
    }

    /// The version of the source package this package was built from.
    ///
    /// Empty for source packages.
    pub fn source_version(&self) -> &str {
        if self.is_source {
            return "";
        }

        if let Some(source) = self.source.as_deref() {
            if let (Some(open), Some(close)) = (source.find('('), source.rfind(')')) {
                if close > open {
                    return source[open + 1..close].trim();
                }
            }
        }

        &self.version
    }

    /// The package type: `source`, `udeb` or `deb`.
    pub fn package_type(&self) -> &'static str {
        if self.is_source {
            ARCHITECTURE_SOURCE
        } else if self.is_udeb {
            "udeb"
        } else {
            "deb"
        }
    }

    /// Whether this package is usable on an architecture.
    ///
    /// `all` packages match every architecture except `source`.
    pub fn matches_architecture(&self, arch: &str) -> bool {
        if arch == ARCHITECTURE_ALL && self.architecture == ARCHITECTURE_ALL {
            return true;
        }

        self.architecture == arch
            || (self.architecture == ARCHITECTURE_ALL && arch != ARCHITECTURE_SOURCE)
    }

    /// Whether this package satisfies a dependency.
    ///
    /// Provided virtual packages only satisfy unversioned dependencies.
    pub fn matches_dependency(&self, dep: &Dependency) -> bool {
        if let Some(arch) = dep.architecture() {
            if !self.matches_architecture(arch) {
                return false;
            }
        }

        if dep.relation() == VersionRelation::DontCare {
            return self.name == dep.package() || self.provides.iter().any(|p| p == dep.package());
        }

        self.name == dep.package() && dep.matches_version(&self.version)
    }

    /// Unparsed dependency expressions followed under a set of options.
    ///
    /// With [DependencyOptions::FOLLOW_SOURCE], a dependency on the source package
    /// restricted to the `source` architecture is appended.
    pub fn dependencies_for(&self, options: DependencyOptions) -> Result<Vec<String>> {
        let fields = self.dependencies()?;

        let mut deps = PackageDependencyFields::followed_fields(options)
            .flat_map(|field| fields.field(field).iter().cloned())
            .collect::<Vec<_>>();

        if options.contains(DependencyOptions::FOLLOW_SOURCE) {
            let source = self.source.as_deref().unwrap_or(&self.name);

            deps.push(if source.contains(')') {
                format!("{} {{{}}}", source, ARCHITECTURE_SOURCE)
            } else {
                format!("{} (= {}) {{{}}}", source, self.version, ARCHITECTURE_SOURCE)
            });
        }

        Ok(deps)
    }

    /// Obtain the value of a field by name.
    ///
    /// Besides control field names, synthetic fields are recognized: `$Source`,
    /// `$SourceVersion`, `$Architecture` and `$PackageType`. Missing fields are empty.
    pub fn field(&self, name: &str) -> Cow<'_, str> {
        match name {
            "$Source" => return self.source_name().into(),
            "$SourceVersion" => return self.source_version().into(),
            "$Architecture" => return self.architecture.as_str().into(),
            "$PackageType" => return self.package_type().into(),
            _ => {}
        }

        if name.eq_ignore_ascii_case("Package") || name == "Name" {
            return self.name.as_str().into();
        }
        if name.eq_ignore_ascii_case("Version") {
            return self.version.as_str().into();
        }
        if name.eq_ignore_ascii_case("Architecture") {
            return match (self.is_source, &self.source_architecture) {
                (true, Some(arch)) => arch.as_str().into(),
                _ => self.architecture.as_str().into(),
            };
        }
        if name.eq_ignore_ascii_case("Source") {
            return self.source.as_deref().unwrap_or_default().into();
        }
        if name.eq_ignore_ascii_case("Provides") {
            return self.provides.join(", ").into();
        }

        let contents = match self.contents() {
            Ok(contents) => contents,
            Err(e) => {
                warn!("unable to read field {} of {}: {}", name, self, e);
                return "".into();
            }
        };

        if let Ok(field) = DependencyField::from_str(name) {
            return contents.dependencies.field(field).join(", ").into();
        }

        contents.extra.field_str(name).unwrap_or_default().into()
    }

    /// Reconstruct a control paragraph describing this package.
    pub fn to_paragraph(&self) -> Result<ControlParagraph<'static>> {
        let contents = self.contents()?;
        let mut para = contents.extra.clone();

        let mut set = |name: &'static str, value: String| {
            para.set_field_from_string(name.into(), value.into());
        };

        set("Package", self.name.clone());
        set("Version", self.version.clone());

        if self.is_source {
            if let Some(arch) = &self.source_architecture {
                set("Architecture", arch.clone());
            }
            if let Some(directory) = contents.files.first().map(|f| &f.download_path) {
                if !directory.is_empty() {
                    set("Directory", directory.clone());
                }
            }
            for (field, kind) in SOURCE_FILE_FIELDS {
                let lines = contents
                    .files
                    .iter()
                    .filter(|f| !f.checksums.get(*kind).is_empty())
                    .map(|f| {
                        format!(
                            "{} {} {}",
                            f.checksums.get(*kind),
                            f.checksums.size,
                            f.filename
                        )
                    })
                    .collect::<Vec<_>>();

                if !lines.is_empty() {
                    set(*field, lines.join("\n "));
                }
            }
        } else {
            set("Architecture", self.architecture.clone());
            if let Some(source) = &self.source {
                set("Source", source.clone());
            }
            if !self.provides.is_empty() {
                set("Provides", self.provides.join(", "));
            }
            if let Some(file) = contents.files.first() {
                set("Filename", file.path());
                set("Size", file.checksums.size.to_string());
                for (field, kind) in [
                    ("MD5sum", ChecksumKind::Md5),
                    ("SHA1", ChecksumKind::Sha1),
                    ("SHA256", ChecksumKind::Sha256),
                    ("SHA512", ChecksumKind::Sha512),
                ] {
                    let digest = file.checksums.get(kind);
                    if !digest.is_empty() {
                        set(field, digest.to_string());
                    }
                }
            }
        }

        contents.dependencies.write_to_paragraph(&mut para);
        para.sort_canonical();

        Ok(para)
    }
}

/// Extract virtual package names from a `Provides` field.
///
/// Version qualifiers like `foo (= 1.0)` are dropped.
fn parse_provides(value: &str) -> Vec<String> {
    split_dependency_field(value)
        .into_iter()
        .filter_map(|entry| {
            entry
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .filter(|name| !name.is_empty())
                .map(|name| name.to_string())
        })
        .collect()
}
