// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_repo_index::{
        dependency::DependencyOptions,
        error::DebianError,
        io::{read_packages_index, write_index},
        package_list::{IndexEvent, PackageList},
        query::{PackageQuery, QueryDefinition},
        ref_list::PackageRefList,
        store::{MemoryPackageStore, PackageStore},
    },
    log::{info, warn, LevelFilter},
    serde::Deserialize,
    std::{
        collections::BTreeSet,
        ffi::OsStr,
        io::{Stderr, Write},
        path::Path,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

const VERIFY_DEPENDENCIES_ABOUT: &str = "\
Verify that dependencies of packages can be satisfied.

Every package in the given `Packages` (or `Sources`) files is loaded into a single
package list. Then the dependencies of every package are resolved against that
list. Dependencies which cannot be satisfied are printed, one per line.

By default, only `Depends` and `Pre-Depends` are followed. The `--follow-*`
arguments enable following additional dependency fields.

If no `--architecture` is given, all architectures found in the input are
checked.

Index files may be compressed with gzip (`.gz`) or xz (`.xz`).
";

const FILTER_ABOUT: &str = "\
Select packages from indices using queries.

Packages matching any of the configured queries are printed as control
paragraphs, suitable for use as a `Packages` file.

# YAML Configuration

queries (required) (list[query])
   Queries selecting packages. A query is one of:

   all
      Matches every package.
   field: {field: <name>, relation: <op>, value: <value>}
      Compares a control field. `relation` is one of `=`, `<<`, `<=`, `>>`,
      `>=`, `%` (glob) or `~` (regular expression). Without a relation, the
      query matches packages having the field. The `$Source`,
      `$Architecture`, `$Version` and `$PackageType` pseudo-fields are
      supported.
   dependency: <expression>
      Matches packages satisfying a dependency expression like
      `libc6 (>= 2.31) {amd64}`.
   exact: {name: <name>, version: <version>, architecture: <arch>}
      Matches one specific package.
   and: [query, ...] / or: [query, ...] / not: query
      Combine queries.

with_dependencies (optional) (bool)
   Whether to add dependencies of matching packages, transitively.

follow_suggests, follow_recommends, follow_all_variants, follow_source,
follow_build (optional) (bool)
   Control which dependencies are followed.

architectures (optional) (list[string])
   Architectures to resolve dependencies for. Defaults to all architectures
   found in the input.
";

const DIFF_ABOUT: &str = "\
Compare two package indices.

Packages only in the left index are printed with a `-` prefix. Packages only
in the right index are printed with a `+` prefix. Packages present on both
sides with a different version or different files are printed with a `!`
prefix.
";

const MERGE_ABOUT: &str = "\
Merge two package indices.

Packages of the right index are added to packages of the left index and the
full names of the resulting packages are printed.

--override-matching
   Packages of the right index replace every package of the left index with the
   same name and architecture, regardless of version.

--merge-conflicting
   Packages with the same name, version and architecture but different files
   collapse to the package of the right index.

--latest
   Only keep the newest version of each name and architecture.
";

#[derive(Debug, Error)]
pub enum DrtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Debian(#[from] DebianError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, DrtError>;

/// Configuration of the `filter` command.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub queries: Vec<QueryDefinition>,
    #[serde(default)]
    pub with_dependencies: bool,
    #[serde(default)]
    pub follow_suggests: bool,
    #[serde(default)]
    pub follow_recommends: bool,
    #[serde(default)]
    pub follow_all_variants: bool,
    #[serde(default)]
    pub follow_source: bool,
    #[serde(default)]
    pub follow_build: bool,
    #[serde(default)]
    pub architectures: Vec<String>,
}

impl FilterConfig {
    pub fn dependency_options(&self) -> DependencyOptions {
        dependency_options(
            self.follow_suggests,
            self.follow_recommends,
            self.follow_all_variants,
            self.follow_source,
            self.follow_build,
        )
    }

    pub fn package_queries(&self) -> Result<Vec<PackageQuery>> {
        Ok(self
            .queries
            .iter()
            .cloned()
            .map(PackageQuery::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn dependency_options(
    suggests: bool,
    recommends: bool,
    all_variants: bool,
    source: bool,
    build: bool,
) -> DependencyOptions {
    let mut options = DependencyOptions::empty();
    options.set(DependencyOptions::FOLLOW_SUGGESTS, suggests);
    options.set(DependencyOptions::FOLLOW_RECOMMENDS, recommends);
    options.set(DependencyOptions::FOLLOW_ALL_VARIANTS, all_variants);
    options.set(DependencyOptions::FOLLOW_SOURCE, source);
    options.set(DependencyOptions::FOLLOW_BUILD, build);

    options
}

/// Renders [IndexEvent]s as a progress bar and log messages.
#[derive(Default)]
struct ProgressRenderer {
    bar: Mutex<Option<pbr::ProgressBar<Stderr>>>,
}

impl ProgressRenderer {
    fn handle(&self, event: IndexEvent) {
        let mut guard = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match event {
            IndexEvent::ProgressBegin { total, bytes } => {
                let mut bar = pbr::ProgressBar::on(std::io::stderr(), total as u64);
                if bytes {
                    bar.set_units(pbr::Units::Bytes);
                }

                guard.replace(bar);
            }
            IndexEvent::ProgressAdvance(count) => {
                if let Some(bar) = guard.as_mut() {
                    bar.add(count as u64);
                }
            }
            IndexEvent::ProgressFinished => {
                if let Some(mut bar) = guard.take() {
                    bar.finish();
                }
            }
            IndexEvent::PackageInjected { .. } => {
                info!("{}", event);
            }
            IndexEvent::MissingDependencies { .. } | IndexEvent::DependencyUnsatisfied(_) => {
                warn!("{}", event);
            }
        }
    }
}

/// Load packages from index files into a single list.
///
/// Packages conflicting with an already loaded package are skipped.
fn load_package_list<'a>(paths: impl Iterator<Item = &'a OsStr>) -> Result<PackageList> {
    let mut list = PackageList::new();

    for path in paths {
        for package in read_packages_index(path)? {
            let name = package.to_string();

            match list.add(Arc::new(package)) {
                Ok(()) => {}
                Err(err) if err.is_conflict() => {
                    warn!("ignoring {} from {}: {}", name, Path::new(path).display(), err);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    info!("loaded {} packages", list.len());

    Ok(list)
}

/// Load an index into a store, returning refs to its packages.
fn load_ref_list(path: &OsStr, store: &mut MemoryPackageStore) -> Result<PackageRefList> {
    Ok(read_packages_index(path)?
        .into_iter()
        .map(|package| store.add(Arc::new(package)))
        .collect())
}

fn resolve_architectures(requested: Vec<String>, list: &PackageList) -> Vec<String> {
    if requested.is_empty() {
        list.architectures(true)
    } else {
        requested
    }
}

/// Unsatisfied dependencies of packages in `list`, rendered and sorted.
pub fn verify_dependencies(
    mut list: PackageList,
    architectures: Vec<String>,
    options: DependencyOptions,
) -> Result<Vec<String>> {
    let architectures = resolve_architectures(architectures, &list);
    list.prepare_index();

    let renderer = ProgressRenderer::default();
    let cb = |event: IndexEvent| renderer.handle(event);

    let missing = list.verify_dependencies(options, &architectures, &list, Some(&cb))?;

    Ok(missing
        .into_iter()
        .map(|dep| dep.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

/// Apply a filter configuration to `list`.
pub fn filter(mut list: PackageList, config: &FilterConfig) -> Result<PackageList> {
    let queries = config.package_queries()?;
    let architectures = resolve_architectures(config.architectures.clone(), &list);
    list.prepare_index();

    let renderer = ProgressRenderer::default();
    let cb = |event: IndexEvent| renderer.handle(event);

    Ok(list.filter_with_progress(
        &queries,
        config.with_dependencies,
        None,
        config.dependency_options(),
        &architectures,
        Some(&cb),
    )?)
}

/// Lines describing differences between two ref lists.
pub fn diff_lines(
    left: &PackageRefList,
    right: &PackageRefList,
    store: &MemoryPackageStore,
) -> Result<Vec<String>> {
    Ok(left
        .diff(right, store)?
        .into_iter()
        .filter_map(|diff| match (diff.left, diff.right) {
            (Some(left), Some(right)) => Some(format!("! {} -> {}", left, right)),
            (Some(left), None) => Some(format!("- {}", left)),
            (None, Some(right)) => Some(format!("+ {}", right)),
            (None, None) => None,
        })
        .collect())
}

/// Full names of the packages in the merge of two ref lists.
pub fn merge_names(
    left: &PackageRefList,
    right: &PackageRefList,
    store: &MemoryPackageStore,
    override_matching: bool,
    merge_conflicting: bool,
    latest: bool,
) -> Result<Vec<String>> {
    let mut merged = left.merge(right, override_matching, merge_conflicting);
    if latest {
        merged.filter_latest_refs();
    }

    Ok(merged
        .iter()
        .map(|r| Ok(store.package_by_ref(r)?.to_string()))
        .collect::<std::result::Result<Vec<_>, DebianError>>()?)
}

pub fn run_cli() -> Result<()> {
    let app = Command::new("Debian Repository Tool")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Inspect and reconcile Debian package indices")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(add_follow_args(
        Command::new("verify-dependencies")
            .about("Print dependencies of packages which cannot be satisfied")
            .long_about(VERIFY_DEPENDENCIES_ABOUT)
            .arg(packages_file_arg())
            .arg(
                Arg::new("architecture")
                    .long("architecture")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("Architecture to verify dependencies for"),
            ),
    ));

    let app = app.subcommand(
        Command::new("filter")
            .about("Print packages matching queries")
            .long_about(FILTER_ABOUT)
            .arg(packages_file_arg())
            .arg(
                Arg::new("yaml-config")
                    .long("yaml-config")
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to a YAML file defining the filter configuration"),
            ),
    );

    let app = app.subcommand(add_left_right_args(
        Command::new("diff")
            .about("Print differences between two package indices")
            .long_about(DIFF_ABOUT),
    ));

    let mut app = app.subcommand(add_left_right_args(
        Command::new("merge")
            .about("Merge two package indices")
            .long_about(MERGE_ABOUT)
            .arg(
                Arg::new("override-matching")
                    .long("override-matching")
                    .help("Replace packages of the left index having the same name and architecture"),
            )
            .arg(
                Arg::new("merge-conflicting")
                    .long("merge-conflicting")
                    .help("Collapse packages with the same name, version and architecture"),
            )
            .arg(
                Arg::new("latest")
                    .long("latest")
                    .help("Only keep the newest version of each package"),
            ),
    ));

    let matches = app.clone().get_matches();

    configure_logging(&matches);

    match matches.subcommand() {
        Some(("verify-dependencies", args)) => command_verify_dependencies(args),
        Some(("filter", args)) => command_filter(args),
        Some(("diff", args)) => command_diff(args),
        Some(("merge", args)) => command_merge(args),
        Some((command, _)) => Err(DrtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn configure_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();
}

fn packages_file_arg() -> Arg<'static> {
    Arg::new("packages-file")
        .long("packages-file")
        .takes_value(true)
        .multiple_occurrences(true)
        .required(true)
        .allow_invalid_utf8(true)
        .help("Path to a Packages or Sources file (may be .gz or .xz compressed)")
}

fn add_follow_args(app: Command<'static>) -> Command<'static> {
    app.arg(
        Arg::new("follow-suggests")
            .long("follow-suggests")
            .help("Also follow Suggests"),
    )
    .arg(
        Arg::new("follow-recommends")
            .long("follow-recommends")
            .help("Also follow Recommends"),
    )
    .arg(
        Arg::new("follow-all-variants")
            .long("follow-all-variants")
            .help("Report every unsatisfied alternative of `a | b` dependencies"),
    )
    .arg(
        Arg::new("follow-source")
            .long("follow-source")
            .help("Also follow source packages of binary packages"),
    )
    .arg(
        Arg::new("follow-build")
            .long("follow-build")
            .help("Also follow Build-Depends and Build-Depends-Indep"),
    )
}

fn add_left_right_args(app: Command<'static>) -> Command<'static> {
    app.arg(
        Arg::new("left")
            .long("left")
            .takes_value(true)
            .required(true)
            .allow_invalid_utf8(true)
            .help("Path to the left Packages file"),
    )
    .arg(
        Arg::new("right")
            .long("right")
            .takes_value(true)
            .required(true)
            .allow_invalid_utf8(true)
            .help("Path to the right Packages file"),
    )
}

fn command_verify_dependencies(args: &ArgMatches) -> Result<()> {
    let paths = args
        .values_of_os("packages-file")
        .expect("packages-file argument is required");
    let list = load_package_list(paths)?;

    let architectures = args
        .values_of("architecture")
        .map(|values| values.map(|v| v.to_string()).collect::<Vec<_>>())
        .unwrap_or_default();

    let options = dependency_options(
        args.is_present("follow-suggests"),
        args.is_present("follow-recommends"),
        args.is_present("follow-all-variants"),
        args.is_present("follow-source"),
        args.is_present("follow-build"),
    );

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    for line in verify_dependencies(list, architectures, options)? {
        writeln!(stdout, "{}", line)?;
    }

    Ok(())
}

fn command_filter(args: &ArgMatches) -> Result<()> {
    let yaml_path = args
        .value_of_os("yaml-config")
        .expect("yaml-config argument is required");

    let f = std::fs::File::open(yaml_path)?;
    let config: FilterConfig = serde_yaml::from_reader(f)?;

    let paths = args
        .values_of_os("packages-file")
        .expect("packages-file argument is required");
    let list = load_package_list(paths)?;

    let result = filter(list, &config)?;
    info!("{} packages matched", result.len());

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    write_index(&mut stdout, result.iter().map(|p| &**p))?;

    Ok(())
}

fn command_diff(args: &ArgMatches) -> Result<()> {
    let mut store = MemoryPackageStore::new();
    let left = load_ref_list(
        args.value_of_os("left").expect("left argument is required"),
        &mut store,
    )?;
    let right = load_ref_list(
        args.value_of_os("right").expect("right argument is required"),
        &mut store,
    )?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    for line in diff_lines(&left, &right, &store)? {
        writeln!(stdout, "{}", line)?;
    }

    Ok(())
}

fn command_merge(args: &ArgMatches) -> Result<()> {
    let mut store = MemoryPackageStore::new();
    let left = load_ref_list(
        args.value_of_os("left").expect("left argument is required"),
        &mut store,
    )?;
    let right = load_ref_list(
        args.value_of_os("right").expect("right argument is required"),
        &mut store,
    )?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    for name in merge_names(
        &left,
        &right,
        &store,
        args.is_present("override-matching"),
        args.is_present("merge-conflicting"),
        args.is_present("latest"),
    )? {
        writeln!(stdout, "{}", name)?;
    }

    Ok(())
}
