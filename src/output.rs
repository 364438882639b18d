//! Rendering of resolved entries as text, XML or JSON, to stdout or a file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MetadataError;
use crate::metadata::{Leaves, MetadataEntry};

/// Root element of XML output.
pub const XML_ROOT: &str = "metadata";

/// How entries are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One line per leaf, `key: value` or the bare value.
    Text { with_key_prefix: bool },
    /// `<metadata>` with one element per leaf.
    Xml,
    /// One JSON object, keys in entry order.
    Json,
}

/// Where rendered output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    #[default]
    Stdout,
    /// Created or truncated for each write, closed right after.
    File(PathBuf),
}

/// Renders entries in one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormatter {
    format: Format,
}

impl OutputFormatter {
    pub fn new(format: Format) -> Self {
        Self { format }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Render `entries` into `out`.
    pub fn render<W: Write>(&self, out: &mut W, entries: &[MetadataEntry]) -> Result<(), MetadataError> {
        match self.format {
            Format::Text { with_key_prefix } => write_text(out, entries, with_key_prefix)?,
            Format::Xml => write_xml(out, entries)?,
            Format::Json => {
                serde_json::to_writer_pretty(&mut *out, &Leaves(entries))?;
                writeln!(out)?;
            }
        }
        Ok(())
    }

    /// Render `entries` to `target`.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Io` if the file cannot be created or written.
    pub fn emit(&self, target: &OutputTarget, entries: &[MetadataEntry]) -> Result<(), MetadataError> {
        match target {
            OutputTarget::Stdout => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                self.render(&mut out, entries)?;
                out.flush()?;
            }
            OutputTarget::File(path) => {
                debug!(path = %path.display(), "writing output file");
                let mut out = BufWriter::new(File::create(path)?);
                self.render(&mut out, entries)?;
                out.flush()?;
            }
        }
        Ok(())
    }
}

/// Print entries to stdout as text.
pub fn display(entries: &[MetadataEntry], with_key_prefix: bool) -> Result<(), MetadataError> {
    OutputFormatter::new(Format::Text { with_key_prefix }).emit(&OutputTarget::Stdout, entries)
}

/// Print entries to stdout as XML.
pub fn display_xml(entries: &[MetadataEntry]) -> Result<(), MetadataError> {
    OutputFormatter::new(Format::Xml).emit(&OutputTarget::Stdout, entries)
}

/// Write entries to `path` as text.
pub fn write_file(
    path: impl AsRef<Path>,
    entries: &[MetadataEntry],
    with_key_prefix: bool,
) -> Result<(), MetadataError> {
    OutputFormatter::new(Format::Text { with_key_prefix })
        .emit(&OutputTarget::File(path.as_ref().to_path_buf()), entries)
}

/// Write entries to `path` as XML.
pub fn write_xml_file(path: impl AsRef<Path>, entries: &[MetadataEntry]) -> Result<(), MetadataError> {
    OutputFormatter::new(Format::Xml).emit(&OutputTarget::File(path.as_ref().to_path_buf()), entries)
}

/// Write one line per leaf.
pub fn write_text<W: Write>(out: &mut W, entries: &[MetadataEntry], with_key_prefix: bool) -> io::Result<()> {
    for (key, value) in entries.iter().flat_map(MetadataEntry::leaves) {
        if with_key_prefix {
            writeln!(out, "{}: {}", key, value)?;
        } else {
            writeln!(out, "{}", value)?;
        }
    }
    Ok(())
}

/// Write an XML document with one element per leaf.
pub fn write_xml<W: Write>(out: &mut W, entries: &[MetadataEntry]) -> io::Result<()> {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(out, "<{}>", XML_ROOT)?;
    for (key, value) in entries.iter().flat_map(MetadataEntry::leaves) {
        let tag = sanitize_tag(key);
        writeln!(out, "  <{tag}>{}</{tag}>", escape_text(value))?;
    }
    writeln!(out, "</{}>", XML_ROOT)?;
    Ok(())
}

/// Turn a metadata key into a valid XML element name.
///
/// Letters, digits, `-`, `_` and `.` are kept; every other character becomes
/// `_`. A name that would not start with a letter or `_` gets a `_` prefix.
/// The mapping is lossy (`a/b` and `a_b` collide) but deterministic.
pub fn sanitize_tag(key: &str) -> String {
    let mut tag: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !tag.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        tag.insert(0, '_');
    }
    tag
}

fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
