// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Defines primitives in control files.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for the canonical source of truth for how control files work.

Package indices (`Packages` and `Sources` files) are control files with one
paragraph per package. [ControlParagraphReader] streams them and
[crate::package::Package] converts paragraphs into package records.
*/

use {
    crate::error::{DebianError, Result},
    std::{
        borrow::Cow,
        io::{BufRead, Write},
    },
};

/// Fields whose value is a list of lines starting on the line after the field name.
///
/// The first line of these values is always empty when serialized.
pub const MULTILINE_FIELDS: &[&str] = &[
    "Files",
    "Checksums-Sha1",
    "Checksums-Sha256",
    "Checksums-Sha512",
    "Package-List",
];

/// Order in which well-known fields are emitted by [ControlParagraph::sort_canonical()].
///
/// Fields not in this list sort after all listed fields, preserving their relative order.
pub const CANONICAL_FIELD_ORDER: &[&str] = &[
    "Package",
    "Source",
    "Binary",
    "Version",
    "Installed-Size",
    "Maintainer",
    "Uploaders",
    "Architecture",
    "Standards-Version",
    "Format",
    "Replaces",
    "Provides",
    "Depends",
    "Pre-Depends",
    "Recommends",
    "Suggests",
    "Conflicts",
    "Breaks",
    "Enhances",
    "Build-Depends",
    "Build-Depends-Indep",
    "Package-List",
    "Description",
    "Homepage",
    "Section",
    "Priority",
    "Directory",
    "Filename",
    "Size",
    "MD5sum",
    "SHA1",
    "SHA256",
    "SHA512",
    "Files",
    "Checksums-Sha1",
    "Checksums-Sha256",
    "Checksums-Sha512",
];

/// Whether a field name (case insensitive) holds a multiline list value.
pub fn is_multiline_field(name: &str) -> bool {
    MULTILINE_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

fn canonical_position(name: &str) -> usize {
    CANONICAL_FIELD_ORDER
        .iter()
        .position(|f| f.eq_ignore_ascii_case(name))
        .unwrap_or(CANONICAL_FIELD_ORDER.len())
}

/// A field in a control file.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    value: Cow<'a, str>,
}

impl<'a> ControlField<'a> {
    /// Construct an instance from a field name and value.
    pub fn new(name: Cow<'a, str>, value: Cow<'a, str>) -> Self {
        Self { name, value }
    }

    /// Construct an instance from an iterable of lines.
    ///
    /// Each line should not have leading whitespace.
    pub fn from_lines(name: Cow<'a, str>, lines: impl Iterator<Item = String>) -> Self {
        let value = lines.collect::<Vec<_>>().join("\n ").into();

        Self { name, value }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Obtain the value as a [&str].
    ///
    /// The value's original file formatting (including newlines and leading whitespace)
    /// is included.
    pub fn value_str(&self) -> &str {
        self.value.as_ref()
    }

    /// Obtain an iterator of words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> {
        self.value.split_ascii_whitespace()
    }

    /// Obtain an iterator of lines in the value.
    ///
    /// Leading whitespace from each line is stripped and empty lines are skipped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value
            .lines()
            .map(|x| x.trim_start())
            .filter(|x| !x.is_empty())
    }

    /// Write the contents of this field to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;

        if is_multiline_field(&self.name) {
            writer.write_all(b":")?;
            for line in self.iter_lines() {
                writer.write_all(b"\n ")?;
                writer.write_all(line.as_bytes())?;
            }
        } else {
            writer.write_all(b": ")?;
            writer.write_all(self.value.as_bytes())?;
        }

        writer.write_all(b"\n")
    }

    /// Obtain an owned copy of this field.
    pub fn into_owned(self) -> ControlField<'static> {
        ControlField {
            name: Cow::Owned(self.name.into_owned()),
            value: Cow::Owned(self.value.into_owned()),
        }
    }
}

/// A paragraph in a control file.
///
/// A paragraph is an ordered series of control fields.
///
/// Field names are case insensitive on read and case preserving on set.
///
/// Paragraphs can only contain a single occurrence of a field and this is enforced through
/// the mutation APIs.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    /// Whether the paragraph is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The number of fields in this paragraph.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Set the value of a field via a [ControlField].
    ///
    /// If a field with the same name (case insensitive compare) already exists, the old value
    /// will be replaced by the incoming value.
    pub fn set_field(&mut self, field: ControlField<'a>) {
        self.fields
            .retain(|cf| !cf.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Set the value of a field defined via strings.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        self.set_field(ControlField::new(name, value));
    }

    /// Remove a field by name, returning it if present.
    pub fn remove_field(&mut self, name: &str) -> Option<ControlField<'a>> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))?;

        Some(self.fields.remove(pos))
    }

    /// Whether a named field is present in this paragraph.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in this paragraph.
    ///
    /// Iteration order is insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField<'a>> {
        self.fields.iter()
    }

    /// Obtain the field with a given name in this paragraph.
    pub fn field(&self, name: &str) -> Option<&'_ ControlField<'a>> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref().eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the raw string value of a field that must be present.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing(name.to_string()))
    }

    /// Obtain the value of a field parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| u64::from_str_radix(v.trim(), 10).map_err(DebianError::from))
    }

    /// Obtain an iterator of lines in the named field.
    pub fn field_iter_value_lines(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        self.field(name).map(|f| f.iter_lines())
    }

    /// Reorder fields following [CANONICAL_FIELD_ORDER].
    ///
    /// The sort is stable, so unknown fields keep their relative order.
    pub fn sort_canonical(&mut self) {
        self.fields.sort_by_key(|f| canonical_position(&f.name));
    }

    /// Obtain an owned copy of this paragraph.
    pub fn into_owned(self) -> ControlParagraph<'static> {
        ControlParagraph {
            fields: self.fields.into_iter().map(|f| f.into_owned()).collect(),
        }
    }

    /// Serialize the paragraph to a writer.
    ///
    /// A trailing newline is written as part of the final field. However, an
    /// extra newline is not present. So if serializing multiple paragraphs, an
    /// additional line break must be written to effectively terminate this paragraph
    /// if the writer is not at EOF.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

/// Holds parsing state for Debian control files.
///
/// Instances of this type are essentially fed lines of text and periodically emit
/// [ControlParagraph] instances as they are completed.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph<'static>,
    field: Option<String>,
}

impl ControlFileParser {
    /// Write a line to the parser.
    ///
    /// If the line terminates an in-progress paragraph, that paragraph will be returned.
    /// Otherwise `Ok(None)` is returned.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph<'static>>> {
        let is_empty_line = line.trim().is_empty();
        let is_indented = (line.starts_with(' ') || line.starts_with('\t')) && line.len() > 1;

        let current_field = self.field.take();

        if is_empty_line {
            if let Some(field) = current_field {
                self.flush_field(field)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        // Comment lines are permitted in some control files and carry no data.
        if line.starts_with('#') {
            self.field = current_field;
            return Ok(None);
        }

        self.field = Some(match (current_field, is_indented) {
            (Some(v), false) => {
                self.flush_field(v)?;
                line.to_string()
            }
            (None, true) => {
                return Err(DebianError::ControlParseError(format!(
                    "continuation line without field: {}",
                    line.trim_end()
                )));
            }
            (None, false) => line.to_string(),
            (Some(v), true) => v + line,
        });

        Ok(None)
    }

    /// Finish parsing, consuming self.
    ///
    /// If a non-empty paragraph is present in the instance, it will be returned.
    pub fn finish(mut self) -> Result<Option<ControlParagraph<'static>>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, v: String) -> Result<()> {
        let (name, value) = v.split_once(':').ok_or_else(|| {
            DebianError::ControlParseError(format!(
                "error parsing line '{}'; missing colon",
                v.trim_end()
            ))
        })?;

        self.paragraph.set_field_from_string(
            Cow::Owned(name.trim().to_string()),
            Cow::Owned(value.trim().to_string()),
        );

        Ok(())
    }
}

/// A reader for [ControlParagraph].
///
/// Instances are bound to a reader, which is capable of feeding lines into a parser.
///
/// Instances can be consumed as an iterator. Each call into the iterator will attempt to
/// read a full paragraph from the underlying reader.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    /// Consumes the instance, returning the original reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn get_next(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let mut parser = match self.parser.take() {
            Some(parser) => parser,
            None => return Ok(None),
        };

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line)? != 0 {
                if let Some(paragraph) = parser.write_line(&line)? {
                    self.parser.replace(parser);
                    return Ok(Some(paragraph));
                }
            } else {
                return parser.finish();
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next().transpose()
    }
}

/// A debian control file.
///
/// A control file is an ordered series of paragraphs.
#[derive(Clone, Debug, Default)]
pub struct ControlFile<'a> {
    paragraphs: Vec<ControlParagraph<'a>>,
}

impl<'a> ControlFile<'a> {
    /// Construct a new instance by parsing data from a reader.
    pub fn parse_reader<R: BufRead>(reader: R) -> Result<Self> {
        Ok(Self {
            paragraphs: ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?,
        })
    }

    /// Parse a control file from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::parse_reader(std::io::BufReader::new(s.as_bytes()))
    }

    /// Add a paragraph to this control file.
    pub fn add_paragraph(&mut self, p: ControlParagraph<'a>) {
        self.paragraphs.push(p);
    }

    /// Obtain paragraphs in this control file.
    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph<'a>> {
        self.paragraphs.iter()
    }

    /// Obtain paragraphs in this control file, consuming self.
    pub fn into_paragraphs(self) -> impl Iterator<Item = ControlParagraph<'a>> {
        self.paragraphs.into_iter()
    }

    /// Serialize the control file to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for p in &self.paragraphs {
            p.write(writer)?;
            writer.write_all(b"\n")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    const SOURCES: &str = indoc! {"
        Package: zlib
        Binary: zlib1g, zlib1g-dev
        Version: 1:1.2.11.dfsg-2
        Architecture: any
        Files:
         8a7a6e1d2d5b1b7c0d9b2c5c46ce6c53 2091 zlib_1.2.11.dfsg-2.dsc
         4a6b0d9f2e2a8bfd8ba3b0e8d9f2f9a1 370248 zlib_1.2.11.dfsg.orig.tar.gz

        # a comment between paragraphs
        Package: bash
        Version: 5.1-2
        Description: GNU Bourne Again SHell
         Bash is an sh-compatible command language interpreter.
         .
         It also incorporates useful features from the Korn and C shells.
    "};

    #[test]
    fn control_paragraph_field_semantics() {
        let mut p = ControlParagraph::default();

        p.set_field_from_string("foo".into(), "bar".into());
        p.set_field_from_string("foo".into(), "baz".into());
        assert_eq!(p.field("foo").unwrap().value, "baz");

        p.set_field_from_string("FOO".into(), "bar".into());
        assert_eq!(p.field("foo").unwrap().value, "bar");
        assert_eq!(p.field("FOO").unwrap().value, "bar");
        assert_eq!(p.len(), 1);

        assert!(p.remove_field("Foo").is_some());
        assert!(p.is_empty());
    }

    #[test]
    fn parse_paragraphs() -> Result<()> {
        let control = ControlFile::parse_str(SOURCES)?;
        let paragraphs = control.paragraphs().collect::<Vec<_>>();
        assert_eq!(paragraphs.len(), 2);

        let zlib = paragraphs[0];
        assert_eq!(zlib.required_field_str("Package")?, "zlib");
        assert_eq!(zlib.field_str("version"), Some("1:1.2.11.dfsg-2"));
        assert_eq!(
            zlib.field_iter_value_lines("Files").unwrap().collect::<Vec<_>>(),
            vec![
                "8a7a6e1d2d5b1b7c0d9b2c5c46ce6c53 2091 zlib_1.2.11.dfsg-2.dsc",
                "4a6b0d9f2e2a8bfd8ba3b0e8d9f2f9a1 370248 zlib_1.2.11.dfsg.orig.tar.gz",
            ]
        );
        assert!(matches!(
            zlib.required_field_str("Maintainer"),
            Err(DebianError::ControlRequiredFieldMissing(_))
        ));

        let bash = paragraphs[1];
        assert_eq!(
            bash.field_iter_value_lines("Description")
                .unwrap()
                .collect::<Vec<_>>()
                .len(),
            4
        );

        Ok(())
    }

    #[test]
    fn continuation_without_field_is_error() {
        assert!(matches!(
            ControlFile::parse_str(" orphan\n"),
            Err(DebianError::ControlParseError(_))
        ));
        assert!(matches!(
            ControlFile::parse_str("no colon here\n"),
            Err(DebianError::ControlParseError(_))
        ));
    }

    #[test]
    fn write_round_trip() -> Result<()> {
        let control = ControlFile::parse_str(SOURCES)?;

        let mut buf = vec![];
        control.write(&mut buf)?;
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Files:\n 8a7a6e1d2d5b1b7c0d9b2c5c46ce6c53 2091"));

        let reparsed = ControlFile::parse_str(&text)?;
        assert_eq!(
            reparsed.paragraphs().collect::<Vec<_>>(),
            control.paragraphs().collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn canonical_sort() {
        let mut p = ControlParagraph::default();
        p.set_field_from_string("X-Custom".into(), "1".into());
        p.set_field_from_string("Version".into(), "1.0".into());
        p.set_field_from_string("Package".into(), "foo".into());
        p.sort_canonical();

        assert_eq!(
            p.iter_fields().map(|f| f.name()).collect::<Vec<_>>(),
            vec!["Package", "Version", "X-Custom"]
        );
    }
}
