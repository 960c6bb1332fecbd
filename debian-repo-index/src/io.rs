// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reading and writing package indices. */

use {
    crate::{
        control::ControlParagraphReader,
        error::{DebianError, Result},
        package::Package,
    },
    log::debug,
    std::{
        fs::File,
        io::{BufRead, BufReader, Read, Write},
        path::Path,
    },
};

/// Compression format of an index file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// XZ compression (.xz extension).
    Xz,

    /// Gzip compression (.gz extension).
    Gzip,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Xz => ".xz",
            Self::Gzip => ".gz",
        }
    }

    /// Resolve the compression of a file from its extension.
    ///
    /// Files without a recognized compression extension are uncompressed. Known but
    /// unsupported formats (`.bz2`, `.lzma`, `.zst`) are errors.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Ok(Self::Gzip),
            Some("xz") => Ok(Self::Xz),
            Some(ext @ ("bz2" | "lzma" | "zst")) => {
                Err(DebianError::UnknownCompression(ext.to_string()))
            }
            _ => Ok(Self::None),
        }
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed<'a>(
    reader: impl Read + 'a,
    compression: Compression,
) -> Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(libflate::gzip::Decoder::new(reader)?),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
    })
}

/// Flavor of a package index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexKind {
    /// A `Packages` file describing binary packages.
    Packages,
    /// A `Sources` file describing source packages.
    Sources,
}

impl IndexKind {
    /// Infer the index flavor from a file name. Names starting with `Sources` are
    /// source indices.
    pub fn from_path(path: &Path) -> Self {
        match path.file_name().and_then(|name| name.to_str()) {
            Some(name) if name.starts_with("Sources") => Self::Sources,
            _ => Self::Packages,
        }
    }
}

/// Parse every paragraph of an index into packages.
pub fn read_index(reader: impl BufRead, kind: IndexKind) -> Result<Vec<Package>> {
    ControlParagraphReader::new(reader)
        .map(|para| {
            let para = para?;

            match kind {
                IndexKind::Packages => Package::from_binary_paragraph(&para),
                IndexKind::Sources => Package::from_source_paragraph(&para),
            }
        })
        .collect()
}

/// Read a possibly compressed `Packages` or `Sources` file.
///
/// Compression is detected from the file extension and the index flavor from the
/// file name.
pub fn read_packages_index(path: impl AsRef<Path>) -> Result<Vec<Package>> {
    let path = path.as_ref();
    let compression = Compression::from_path(path)?;
    let kind = IndexKind::from_path(path);

    let reader = BufReader::new(read_decompressed(File::open(path)?, compression)?);
    let packages = read_index(reader, kind)?;

    debug!(
        "read {} packages from {} ({:?}, {:?})",
        packages.len(),
        path.display(),
        kind,
        compression
    );

    Ok(packages)
}

/// Write packages as paragraphs of an index file.
pub fn write_index<'a>(
    writer: &mut impl Write,
    packages: impl IntoIterator<Item = &'a Package>,
) -> Result<()> {
    for (i, package) in packages.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b"\n")?;
        }
        package.to_paragraph()?.write(writer)?;
    }

    Ok(())
}
