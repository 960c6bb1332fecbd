// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package dependency expressions.

See <https://www.debian.org/doc/debian-policy/ch-relationships.html> for the
canonical definition of the syntax.

A dependency expression like `libc6 (>= 2.4) {amd64}` is parsed into a [Dependency].
Alternatives separated by `|` (e.g. `mail-transport-agent | postfix`) are parsed into
*variants* by [parse_dependency_variants()].
*/

use {
    crate::{
        control::ControlParagraph,
        error::{DebianError, Result},
        package_version::compare_versions,
    },
    regex::Regex,
    smallvec::SmallVec,
    std::{
        cmp::Ordering,
        collections::HashSet,
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
        str::FromStr,
    },
    strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator},
};

/// Alternatives of a single dependency expression.
pub type DependencyVariants = SmallVec<[Dependency; 2]>;

bitflags::bitflags! {
    /// Controls dependency resolution.
    ///
    /// `Depends` and `Pre-Depends` are always followed. Other fields are opt-in.
    pub struct DependencyOptions: u32 {
        /// Follow `Suggests`.
        const FOLLOW_SUGGESTS = 0x01;
        /// Follow `Recommends`.
        const FOLLOW_RECOMMENDS = 0x02;
        /// Explore every alternative of an `a | b` expression, not just the first satisfied one.
        const FOLLOW_ALL_VARIANTS = 0x04;
        /// Follow the link from a binary package to its source package.
        const FOLLOW_SOURCE = 0x08;
        /// Follow `Build-Depends` and `Build-Depends-Indep`.
        const FOLLOW_BUILD = 0x10;
        /// Emit progress messages describing resolution decisions.
        const VERBOSE_RESOLVE = 0x20;
    }
}

/// Relationship between a package's version and the version operand of a dependency.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum VersionRelation {
    /// Any version matches.
    DontCare,
    /// `=`
    Equal,
    /// `<<`
    Less,
    /// `>>`
    Greater,
    /// `<=` (or the deprecated `<`)
    LessOrEqual,
    /// `>=` (or the deprecated `>`)
    GreaterOrEqual,
    /// `%`: the operand is a shell glob.
    PatternMatch,
    /// `~`: the operand is a regular expression.
    Regexp,
}

impl VersionRelation {
    /// The operator token used when rendering this relation.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::DontCare => "",
            Self::Equal => "=",
            Self::Less => "<<",
            Self::Greater => ">>",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::PatternMatch => "%",
            Self::Regexp => "~",
        }
    }

    /// Whether an [Ordering] of `package version <=> operand` satisfies this relation.
    ///
    /// Only meaningful for the ordering relations.
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::DontCare => true,
            Self::Equal => ordering == Ordering::Equal,
            Self::Less => ordering == Ordering::Less,
            Self::Greater => ordering == Ordering::Greater,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::PatternMatch | Self::Regexp => false,
        }
    }
}

impl FromStr for VersionRelation {
    type Err = DebianError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "" => Self::DontCare,
            "=" => Self::Equal,
            "<<" => Self::Less,
            ">>" => Self::Greater,
            "<=" | "<" => Self::LessOrEqual,
            ">=" | ">" => Self::GreaterOrEqual,
            "%" => Self::PatternMatch,
            "~" => Self::Regexp,
            _ => {
                return Err(DebianError::DependencyParse(format!(
                    "unknown relation: {}",
                    s
                )))
            }
        })
    }
}

/// Relation operators recognized by the parser, longest first.
const OPERATORS: &[&str] = &["<<", "<=", ">>", ">=", "=", "<", ">", "%", "~"];

#[derive(Clone, Debug)]
enum VersionMatcher {
    Pattern(glob::Pattern),
    Regexp(Regex),
}

/// A single parsed dependency predicate.
///
/// Equality and hashing consider the package name, relation, version operand and
/// architecture. Compiled patterns are derived from the operand and don't participate.
#[derive(Clone, Debug)]
pub struct Dependency {
    package: String,
    relation: VersionRelation,
    version: String,
    architecture: Option<String>,
    matcher: Option<VersionMatcher>,
}

impl Dependency {
    /// Construct an instance matching any version of a package.
    pub fn new(package: impl ToString) -> Self {
        Self {
            package: package.to_string(),
            relation: VersionRelation::DontCare,
            version: String::new(),
            architecture: None,
            matcher: None,
        }
    }

    /// Construct an instance with a version constraint.
    ///
    /// Glob and regular expression operands are compiled here, so invalid patterns
    /// are reported immediately.
    pub fn with_version(
        package: impl ToString,
        relation: VersionRelation,
        version: impl ToString,
    ) -> Result<Self> {
        let version = version.to_string();

        let matcher = match relation {
            VersionRelation::PatternMatch => {
                Some(VersionMatcher::Pattern(glob::Pattern::new(&version)?))
            }
            VersionRelation::Regexp => Some(VersionMatcher::Regexp(Regex::new(&version)?)),
            _ => None,
        };

        Ok(Self {
            package: package.to_string(),
            relation,
            version,
            architecture: None,
            matcher,
        })
    }

    /// Restrict this dependency to an architecture.
    #[must_use]
    pub fn with_architecture(mut self, architecture: impl ToString) -> Self {
        self.architecture = Some(architecture.to_string());
        self
    }

    /// Parse a single dependency expression.
    ///
    /// The grammar is `name [(relop version)] [{architecture}]`. Architecture restriction
    /// lists (`[amd64 i386]`) and build profiles (`<!nocheck>`) are accepted and ignored.
    pub fn parse(expr: &str) -> Result<Self> {
        let err = |reason: &str| DebianError::DependencyParse(format!("{}: {}", reason, expr));

        let s = expr.trim();
        let name_end = s
            .find(|c: char| c.is_whitespace() || "(){}[]<>|,".contains(c))
            .unwrap_or(s.len());

        let mut package = &s[..name_end];
        if let Some((name, qualifier)) = package.split_once(':') {
            if matches!(qualifier, "any" | "native") {
                package = name;
            }
        }
        if package.is_empty() {
            return Err(err("missing package name"));
        }

        let mut rest = s[name_end..].trim_start();

        let mut dep = if let Some(inner) = rest.strip_prefix('(') {
            let close = inner.rfind(')').ok_or_else(|| err("unbalanced parenthesis"))?;
            let constraint = inner[..close].trim();
            rest = inner[close + 1..].trim_start();

            let operator = OPERATORS
                .iter()
                .find(|op| constraint.starts_with(**op))
                .copied()
                .unwrap_or("");
            let version = constraint[operator.len()..].trim();

            if version.starts_with(|c: char| matches!(c, '<' | '>' | '=')) {
                return Err(err("unknown relation"));
            }

            let relation = if operator.is_empty() {
                VersionRelation::Equal
            } else {
                VersionRelation::from_str(operator)?
            };

            let plain_version = !matches!(
                relation,
                VersionRelation::PatternMatch | VersionRelation::Regexp
            );
            let malformed = |c: char| c.is_whitespace() || "(){}".contains(c);
            if version.is_empty() || (plain_version && version.contains(malformed)) {
                return Err(err("malformed version"));
            }

            Self::with_version(package, relation, version)?
        } else {
            Self::new(package)
        };

        while let Some(c) = rest.chars().next() {
            let close = match c {
                '{' => '}',
                '[' => ']',
                '<' => '>',
                _ => return Err(err("trailing characters")),
            };

            let end = rest
                .find(close)
                .ok_or_else(|| err("unbalanced qualifier"))?;
            let inner = rest[1..end].trim();

            if c == '{' {
                if inner.is_empty() || inner.contains(char::is_whitespace) {
                    return Err(err("malformed architecture"));
                }
                if dep.architecture.is_some() {
                    return Err(err("duplicate architecture"));
                }
                dep.architecture = Some(inner.to_string());
            }

            rest = rest[end + 1..].trim_start();
        }

        Ok(dep)
    }

    /// The name of the package this dependency refers to.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The version relation.
    pub fn relation(&self) -> VersionRelation {
        self.relation
    }

    /// The version operand. Empty for [VersionRelation::DontCare].
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The architecture restriction, if any.
    pub fn architecture(&self) -> Option<&str> {
        self.architecture.as_deref()
    }

    /// Set the architecture restriction if none is defined.
    pub(crate) fn default_architecture(&mut self, architecture: &str) {
        if self.architecture.is_none() {
            self.architecture = Some(architecture.to_string());
        }
    }

    /// Whether a version string satisfies the version constraint of this dependency.
    ///
    /// Package name and architecture are not considered.
    pub fn matches_version(&self, version: &str) -> bool {
        match (&self.matcher, self.relation) {
            (_, VersionRelation::DontCare) => true,
            (Some(VersionMatcher::Pattern(pattern)), _) => pattern.matches(version),
            (Some(VersionMatcher::Regexp(re)), _) => re.is_match(version),
            (None, relation) => relation.accepts(compare_versions(version, &self.version)),
        }
    }

    fn identity(&self) -> (&str, VersionRelation, &str, Option<&str>) {
        (
            &self.package,
            self.relation,
            &self.version,
            self.architecture.as_deref(),
        )
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for Dependency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dependency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl FromStr for Dependency {
    type Err = DebianError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.package)?;

        if self.relation != VersionRelation::DontCare {
            write!(f, " ({} {})", self.relation.operator(), self.version)?;
        }

        if let Some(arch) = &self.architecture {
            write!(f, " {{{}}}", arch)?;
        }

        Ok(())
    }
}

/// Parse a dependency expression that may contain `|` separated alternatives.
pub fn parse_dependency_variants(expr: &str) -> Result<DependencyVariants> {
    expr.split('|').map(Dependency::parse).collect()
}

/// Remove duplicate variants, preserving the order of first occurrence.
pub fn dedupe_variants(variants: DependencyVariants) -> DependencyVariants {
    let mut seen = HashSet::with_capacity(variants.len());

    variants
        .into_iter()
        .filter(|dep| seen.insert(dep.clone()))
        .collect()
}

/// Control fields expressing dependencies between packages.
#[derive(AsRefStr, Clone, Copy, Debug, EnumIter, EnumString, Eq, Hash, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum DependencyField {
    #[strum(serialize = "Depends")]
    Depends,
    #[strum(serialize = "Pre-Depends")]
    PreDepends,
    #[strum(serialize = "Suggests")]
    Suggests,
    #[strum(serialize = "Recommends")]
    Recommends,
    #[strum(serialize = "Build-Depends")]
    BuildDepends,
    #[strum(serialize = "Build-Depends-Indep")]
    BuildDependsIndep,
}

/// Split a comma delimited dependency field into its unparsed expressions.
pub fn split_dependency_field(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Unparsed dependency expressions of a package, grouped by control field.
///
/// Expressions are stored as strings and only parsed when dependencies are resolved.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageDependencyFields {
    pub depends: Vec<String>,
    pub pre_depends: Vec<String>,
    pub suggests: Vec<String>,
    pub recommends: Vec<String>,
    pub build_depends: Vec<String>,
    pub build_depends_indep: Vec<String>,
}

impl PackageDependencyFields {
    /// Collect dependency fields present in a control paragraph.
    pub fn from_paragraph(para: &ControlParagraph) -> Self {
        let mut fields = Self::default();

        for field in DependencyField::iter() {
            if let Some(value) = para.field_str(field.as_ref()) {
                *fields.field_mut(field) = split_dependency_field(value);
            }
        }

        fields
    }

    /// Expressions recorded for a field.
    pub fn field(&self, field: DependencyField) -> &[String] {
        match field {
            DependencyField::Depends => &self.depends,
            DependencyField::PreDepends => &self.pre_depends,
            DependencyField::Suggests => &self.suggests,
            DependencyField::Recommends => &self.recommends,
            DependencyField::BuildDepends => &self.build_depends,
            DependencyField::BuildDependsIndep => &self.build_depends_indep,
        }
    }

    fn field_mut(&mut self, field: DependencyField) -> &mut Vec<String> {
        match field {
            DependencyField::Depends => &mut self.depends,
            DependencyField::PreDepends => &mut self.pre_depends,
            DependencyField::Suggests => &mut self.suggests,
            DependencyField::Recommends => &mut self.recommends,
            DependencyField::BuildDepends => &mut self.build_depends,
            DependencyField::BuildDependsIndep => &mut self.build_depends_indep,
        }
    }

    /// Fields followed for a given set of options.
    pub fn followed_fields(options: DependencyOptions) -> impl Iterator<Item = DependencyField> {
        DependencyField::iter().filter(move |field| match field {
            DependencyField::Depends | DependencyField::PreDepends => true,
            DependencyField::Suggests => options.contains(DependencyOptions::FOLLOW_SUGGESTS),
            DependencyField::Recommends => {
                options.contains(DependencyOptions::FOLLOW_RECOMMENDS)
            }
            DependencyField::BuildDepends | DependencyField::BuildDependsIndep => {
                options.contains(DependencyOptions::FOLLOW_BUILD)
            }
        })
    }

    /// Write non-empty fields into a control paragraph.
    pub fn write_to_paragraph(&self, para: &mut ControlParagraph) {
        for field in DependencyField::iter() {
            let values = self.field(field);

            if !values.is_empty() {
                para.set_field_from_string(
                    field.as_ref().to_string().into(),
                    values.join(", ").into(),
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_simple() -> Result<()> {
        let dep = Dependency::parse("libc6")?;
        assert_eq!(dep.package(), "libc6");
        assert_eq!(dep.relation(), VersionRelation::DontCare);
        assert_eq!(dep.version(), "");
        assert_eq!(dep.architecture(), None);

        let dep = Dependency::parse("  python3:any ")?;
        assert_eq!(dep.package(), "python3");

        Ok(())
    }

    #[test]
    fn parse_relations() -> Result<()> {
        for (expr, relation, version) in [
            ("lib (= 1.0)", VersionRelation::Equal, "1.0"),
            ("lib (<< 1.0)", VersionRelation::Less, "1.0"),
            ("lib (>> 0.9)", VersionRelation::Greater, "0.9"),
            ("lib (<= 1:2.0-1)", VersionRelation::LessOrEqual, "1:2.0-1"),
            ("lib (>= 2.4)", VersionRelation::GreaterOrEqual, "2.4"),
            ("lib (< 1.0)", VersionRelation::LessOrEqual, "1.0"),
            ("lib (> 1.0)", VersionRelation::GreaterOrEqual, "1.0"),
            ("lib(>=2.4)", VersionRelation::GreaterOrEqual, "2.4"),
            ("lib (1.0)", VersionRelation::Equal, "1.0"),
            ("lib (% 1.*)", VersionRelation::PatternMatch, "1.*"),
            ("lib (~ ^1\\.(0|1)$)", VersionRelation::Regexp, "^1\\.(0|1)$"),
        ] {
            let dep = Dependency::parse(expr)?;
            assert_eq!(dep.package(), "lib", "{}", expr);
            assert_eq!(dep.relation(), relation, "{}", expr);
            assert_eq!(dep.version(), version, "{}", expr);
        }

        Ok(())
    }

    #[test]
    fn parse_architecture_and_qualifiers() -> Result<()> {
        let dep = Dependency::parse("lib (>= 1.0) {i386}")?;
        assert_eq!(dep.architecture(), Some("i386"));
        assert_eq!(dep.version(), "1.0");

        let dep = Dependency::parse("dpkg {source}")?;
        assert_eq!(dep.architecture(), Some("source"));
        assert_eq!(dep.relation(), VersionRelation::DontCare);

        let dep = Dependency::parse("libfoo-dev (>= 2) [linux-any] <!nocheck>")?;
        assert_eq!(dep.package(), "libfoo-dev");
        assert_eq!(dep.architecture(), None);

        Ok(())
    }

    #[test]
    fn parse_errors() {
        for expr in [
            "",
            "lib (>= 1.0",
            "lib >= 1.0)",
            "lib (=> 1.0)",
            "lib (<> 1.0)",
            "lib (== 1.0)",
            "lib (>= )",
            "lib (!= 1.0)",
            "lib (>= 1.0) trailing",
            "lib {amd64",
            "lib {amd64} {i386}",
            "lib (% [)",
        ] {
            assert!(Dependency::parse(expr).is_err(), "{}", expr);
        }
    }

    #[test]
    fn display_round_trip() -> Result<()> {
        for expr in [
            "lib",
            "lib (>= 1.0)",
            "lib (<< 2:1.0-1) {amd64}",
            "lib {source}",
            "lib (% 1.*)",
        ] {
            let dep = Dependency::parse(expr)?;
            assert_eq!(dep.to_string(), expr);
            assert_eq!(Dependency::parse(&dep.to_string())?, dep);
        }

        assert_eq!(Dependency::parse("lib (> 1.0)")?.to_string(), "lib (>= 1.0)");

        Ok(())
    }

    #[test]
    fn variants() -> Result<()> {
        let variants = parse_dependency_variants("mta | postfix (>= 3) | mta")?;
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[1].package(), "postfix");

        let deduped = dedupe_variants(variants);
        assert_eq!(
            deduped.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            vec!["mta", "postfix (>= 3)"]
        );

        assert!(parse_dependency_variants("a | | b").is_err());

        Ok(())
    }

    #[test]
    fn matches_version() -> Result<()> {
        let dep = Dependency::parse("lib (>> 0.9)")?;
        assert!(dep.matches_version("1.0"));
        assert!(!dep.matches_version("0.9"));
        assert!(!dep.matches_version("0.9~rc1"));

        let dep = Dependency::parse("lib (<< 1.0)")?;
        assert!(dep.matches_version("1.0~beta1"));
        assert!(!dep.matches_version("1.0"));

        let dep = Dependency::parse("lib (= 1.0)")?;
        assert!(dep.matches_version("0:1.0"));

        let dep = Dependency::parse("lib (% 1.*)")?;
        assert!(dep.matches_version("1.5"));
        assert!(!dep.matches_version("2.0"));

        let dep = Dependency::parse("lib (~ ^2\\.)")?;
        assert!(dep.matches_version("2.0"));
        assert!(!dep.matches_version("12.0"));

        assert!(Dependency::new("lib").matches_version("anything"));

        Ok(())
    }

    #[test]
    fn equality_ignores_compiled_matcher() -> Result<()> {
        let a = Dependency::with_version("lib", VersionRelation::Regexp, "^1")?;
        let b = Dependency::parse("lib (~ ^1)")?;
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_architecture("amd64"));

        Ok(())
    }

    #[test]
    fn dependency_fields() -> Result<()> {
        let para = crate::control::ControlFile::parse_str(
            "Package: app\nDepends: lib (>= 1.0),\n data, dpkg | apt\nBuild-Depends: debhelper (>= 9)\n",
        )?
        .into_paragraphs()
        .next()
        .unwrap();

        let fields = PackageDependencyFields::from_paragraph(&para);
        assert_eq!(fields.depends, vec!["lib (>= 1.0)", "data", "dpkg | apt"]);
        assert_eq!(fields.field(DependencyField::BuildDepends), ["debhelper (>= 9)"]);
        assert!(fields.recommends.is_empty());

        assert_eq!(
            PackageDependencyFields::followed_fields(DependencyOptions::empty())
                .collect::<Vec<_>>(),
            vec![DependencyField::Depends, DependencyField::PreDepends]
        );
        assert_eq!(
            PackageDependencyFields::followed_fields(
                DependencyOptions::FOLLOW_BUILD | DependencyOptions::FOLLOW_SUGGESTS
            )
            .count(),
            5
        );

        assert_eq!(
            DependencyField::from_str("pre-depends").unwrap(),
            DependencyField::PreDepends
        );

        Ok(())
    }
}
