// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package queries.

A [PackageQuery] is a predicate tree evaluated against packages. Queries can be
evaluated by testing every package of a [PackageList] ([PackageList::scan()]) or,
for *fast* queries, by using the list's search index ([PackageQuery::query()]).
Both produce the same set of packages.

[QueryDefinition] describes a query tree in a serializable form, e.g. in YAML
configuration files.
*/

use {
    crate::{
        dependency::{Dependency, VersionRelation},
        error::{DebianError, Result},
        package::Package,
        package_list::PackageList,
    },
    regex::Regex,
    serde::{Deserialize, Serialize},
    std::{
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// Characters which force quoting when rendering query values.
const QUOTED_CHARACTERS: &[char] = &['(', ')', '|', ',', '!', '{', '}', ' ', '\t', '\n'];

fn escape(value: &str) -> String {
    if value.contains(QUOTED_CHARACTERS) {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

#[derive(Clone, Debug)]
enum FieldMatcher {
    Pattern(glob::Pattern),
    Regexp(Regex),
    Version(Dependency),
}

/// Compares a package field against a value.
///
/// Besides control fields, the synthetic fields recognized by [Package::field()] can be
/// queried. `$Version` compares versions with Debian semantics and `$Architecture` with
/// the `=` relation honors `all` packages. Other fields are compared as strings.
#[derive(Clone, Debug)]
pub struct FieldQuery {
    field: String,
    relation: VersionRelation,
    value: String,
    matcher: Option<FieldMatcher>,
}

impl FieldQuery {
    /// Construct an instance.
    ///
    /// Glob and regular expression values are compiled here.
    pub fn new(
        field: impl ToString,
        relation: VersionRelation,
        value: impl ToString,
    ) -> Result<Self> {
        let field = field.to_string();
        let value = value.to_string();

        let matcher = if field == "$Version" {
            Some(FieldMatcher::Version(Dependency::with_version(
                &field, relation, &value,
            )?))
        } else {
            match relation {
                VersionRelation::PatternMatch => {
                    Some(FieldMatcher::Pattern(glob::Pattern::new(&value)?))
                }
                VersionRelation::Regexp => Some(FieldMatcher::Regexp(Regex::new(&value)?)),
                _ => None,
            }
        };

        Ok(Self {
            field,
            relation,
            value,
            matcher,
        })
    }

    /// The queried field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn relation(&self) -> VersionRelation {
        self.relation
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether a package satisfies this query.
    pub fn matches(&self, package: &Package) -> bool {
        if let Some(FieldMatcher::Version(dep)) = &self.matcher {
            return dep.matches_version(package.version());
        }

        if self.field == "$Architecture" && self.relation == VersionRelation::Equal {
            return package.matches_architecture(&self.value);
        }

        let field = package.field(&self.field);
        let value: &str = &field;

        match (self.relation, &self.matcher) {
            (VersionRelation::DontCare, _) => !value.is_empty(),
            (VersionRelation::Equal, _) => value == self.value,
            (VersionRelation::Greater, _) => value > self.value.as_str(),
            (VersionRelation::GreaterOrEqual, _) => value >= self.value.as_str(),
            (VersionRelation::Less, _) => value < self.value.as_str(),
            (VersionRelation::LessOrEqual, _) => value <= self.value.as_str(),
            (_, Some(FieldMatcher::Pattern(pattern))) => pattern.matches(value),
            (_, Some(FieldMatcher::Regexp(re))) => re.is_match(value),
            _ => false,
        }
    }
}

impl Display for FieldQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.relation == VersionRelation::DontCare {
            f.write_str(&escape(&self.field))
        } else {
            write!(
                f,
                "{} ({} {})",
                escape(&self.field),
                self.relation.operator(),
                escape(&self.value)
            )
        }
    }
}

/// A predicate over packages.
#[derive(Clone, Debug)]
pub enum PackageQuery {
    /// Both queries match.
    And(Box<PackageQuery>, Box<PackageQuery>),
    /// Either query matches.
    Or(Box<PackageQuery>, Box<PackageQuery>),
    /// The query doesn't match.
    Not(Box<PackageQuery>),
    /// A field comparison.
    Field(FieldQuery),
    /// The package satisfies a dependency.
    Dependency(Dependency),
    /// Exact name, version and architecture.
    PkgExact {
        name: String,
        version: String,
        architecture: String,
    },
    /// Every package.
    MatchAll,
}

impl PackageQuery {
    pub fn and(left: PackageQuery, right: PackageQuery) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: PackageQuery, right: PackageQuery) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(query: PackageQuery) -> Self {
        Self::Not(Box::new(query))
    }

    /// Construct a field comparison query.
    pub fn field(
        field: impl ToString,
        relation: VersionRelation,
        value: impl ToString,
    ) -> Result<Self> {
        Ok(Self::Field(FieldQuery::new(field, relation, value)?))
    }

    /// Construct a query matching exactly one package identity.
    pub fn exact(name: impl ToString, version: impl ToString, architecture: impl ToString) -> Self {
        Self::PkgExact {
            name: name.to_string(),
            version: version.to_string(),
            architecture: architecture.to_string(),
        }
    }

    /// Whether a package satisfies this query.
    pub fn matches(&self, package: &Package) -> bool {
        match self {
            Self::And(left, right) => left.matches(package) && right.matches(package),
            Self::Or(left, right) => left.matches(package) || right.matches(package),
            Self::Not(query) => !query.matches(package),
            Self::Field(query) => query.matches(package),
            Self::Dependency(dep) => package.matches_dependency(dep),
            Self::PkgExact {
                name,
                version,
                architecture,
            } => {
                package.name() == name
                    && package.version() == version
                    && package.architecture() == architecture
            }
            Self::MatchAll => true,
        }
    }

    /// Whether this query can be evaluated through a list's search index.
    pub fn fast(&self) -> bool {
        match self {
            Self::And(left, right) => left.fast() || right.fast(),
            Self::Or(left, right) => left.fast() && right.fast(),
            Self::Dependency(_) | Self::PkgExact { .. } => true,
            Self::Not(_) | Self::Field(_) | Self::MatchAll => false,
        }
    }

    /// Packages of a list matching this query.
    ///
    /// Fast queries use the search index. Other queries scan every package.
    ///
    /// # Panics
    ///
    /// If this query is fast and the list is not indexed.
    pub fn query(&self, list: &PackageList) -> PackageList {
        match self {
            Self::Dependency(dep) => list.sublist(list.search(dep, true)),
            Self::PkgExact {
                name,
                version,
                architecture,
            } => list.sublist(list.search_by_key(architecture, name, version)),
            Self::And(left, right) if left.fast() => left.query(list).scan(right),
            Self::And(left, right) if right.fast() => right.query(list).scan(left),
            Self::Or(left, right) if left.fast() && right.fast() => {
                let mut result = left.query(list);
                result.union_with(right.query(list));
                result
            }
            _ => list.scan(self),
        }
    }
}

impl Display for PackageQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And(left, right) => write!(f, "({}), ({})", left, right),
            Self::Or(left, right) => write!(f, "({}) | ({})", left, right),
            Self::Not(query) => write!(f, "!({})", query),
            Self::Field(query) => write!(f, "{}", query),
            Self::Dependency(dep) => write!(f, "{}", dep),
            Self::PkgExact {
                name,
                version,
                architecture,
            } => write!(f, "{}_{}_{}", name, version, architecture),
            Self::MatchAll => Ok(()),
        }
    }
}

/// Serializable description of a [PackageQuery].
///
/// In YAML, a query is written as a single-key map naming the node type:
///
/// ```yaml
/// and:
///   - dependency: "libc6 (>= 2.31)"
///   - not:
///       field:
///         field: Priority
///         relation: "="
///         value: extra
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub enum QueryDefinition {
    /// All nested queries match. An empty list matches everything.
    And(Vec<QueryDefinition>),
    /// Any nested query matches. An empty list matches nothing.
    Or(Vec<QueryDefinition>),
    Not(Box<QueryDefinition>),
    Field {
        field: String,
        #[serde(default)]
        relation: String,
        #[serde(default)]
        value: String,
    },
    /// A dependency expression like `libc6 (>= 2.31) {amd64}`.
    Dependency(String),
    Exact {
        name: String,
        version: String,
        architecture: String,
    },
    All,
}

impl TryFrom<QueryDefinition> for PackageQuery {
    type Error = DebianError;

    fn try_from(def: QueryDefinition) -> Result<Self> {
        Ok(match def {
            QueryDefinition::And(queries) => queries
                .into_iter()
                .map(PackageQuery::try_from)
                .reduce(|left, right| Ok(PackageQuery::and(left?, right?)))
                .transpose()?
                .unwrap_or(PackageQuery::MatchAll),
            QueryDefinition::Or(queries) => queries
                .into_iter()
                .map(PackageQuery::try_from)
                .reduce(|left, right| Ok(PackageQuery::or(left?, right?)))
                .transpose()?
                .unwrap_or_else(|| PackageQuery::not(PackageQuery::MatchAll)),
            QueryDefinition::Not(query) => PackageQuery::not(PackageQuery::try_from(*query)?),
            QueryDefinition::Field {
                field,
                relation,
                value,
            } => PackageQuery::field(field, VersionRelation::from_str(&relation)?, value)?,
            QueryDefinition::Dependency(expr) => PackageQuery::Dependency(Dependency::parse(&expr)?),
            QueryDefinition::Exact {
                name,
                version,
                architecture,
            } => PackageQuery::exact(name, version, architecture),
            QueryDefinition::All => PackageQuery::MatchAll,
        })
    }
}
