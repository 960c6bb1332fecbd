// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package indexing, querying and reference lists.

This crate implements the package bookkeeping core of a Debian repository manager:
the machinery for answering questions like "which packages satisfy `libc6 (>= 2.31)`?",
"what does this package need that isn't available?" and "how do these two snapshots of a
repository differ?".

# A Tour of Functionality

Debian metadata is expressed as *control files*: paragraphs of key-value fields. Low-level
control file primitives are defined in the [control] module. [control::ControlParagraph]
defines a paragraph and [control::ControlParagraphReader] implements a streaming reader of
paragraphs, such as the ones found in `Packages` and `Sources` indices.

The [package_version] module implements Debian version string comparison via
[package_version::compare_versions()] and [package_version::PackageVersion].

There is a meta language for expressing dependencies between Debian packages. The
[dependency] module parses it: [dependency::Dependency] is a single constraint like
`libc6 (>= 2.31) {amd64}` and [dependency::parse_dependency_variants()] handles
alternatives like `mail-transport-agent | postfix`.

[package::Package] is a package record built from a control paragraph. Records keep the
fields needed for identity and dependency resolution in memory. Everything else lives in
[package::PackageContents], which may be loaded lazily through a
[package::PackageContentsLoader].

[package_list::PackageList] is an in-memory collection of packages. Once indexed, it
answers dependency searches, verifies that dependencies of its packages are satisfiable
and computes filtered lists with dependency closures. The [query] module defines the
[query::PackageQuery] expressions used to select packages from lists.

[package_ref::PackageRef] is the compact textual identity of a package. A sorted set of
them forms a [ref_list::PackageRefList], the persistent representation of a repository
snapshot. Ref lists support set algebra (subtraction, merging, pruning superseded
versions) and diffing against each other. Resolving refs back to packages goes through a
[store::PackageStore].

The [io] module reads (possibly compressed) `Packages` and `Sources` files.

# Crate Features

There are no optional features. Everything is synchronous and in-process.
*/

pub mod control;
pub mod dependency;
pub mod error;
pub mod io;
pub mod package;
pub mod package_list;
pub mod package_ref;
pub mod package_version;
pub mod query;
pub mod ref_list;
pub mod store;
