//! `multipart/form-data` body construction.
//!
//! # Design
//! Each appended field is rendered into its pre-content header block right
//! away, and its byte length is added to a running total. The total is what
//! the transport declares as the fixed request length, so the writer in
//! `executor` and `FormData::encode` both emit exactly the strings stored
//! here. File sizes are sampled once, at append time; if a file changes
//! afterwards the transport's length check fails the send.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const BOUNDARY_PREFIX: &str = "---------------------------";

const CRLF: &str = "\r\n";
const TEXT_CONTENT_TYPE: &str = "Content-Type: text/plain; charset=UTF-8";
const FILE_CONTENT_TYPE: &str =
    "Content-Type: application/octet-stream\r\nContent-Transfer-Encoding: binary";

/// Kind of a form entry. Raw values are the ones accepted over FFI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldKind {
    Text = 1,
    File = 2,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported field kind: {0}")]
pub struct UnsupportedFieldKind(pub i32);

impl TryFrom<i32> for FieldKind {
    type Error = UnsupportedFieldKind;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(FieldKind::Text),
            2 => Ok(FieldKind::File),
            other => Err(UnsupportedFieldKind(other)),
        }
    }
}

/// One form entry. `value` is literal text, or a filesystem path for
/// `FieldKind::File`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub name: String,
    pub value: String,
}

/// A field together with its rendered framing.
#[derive(Debug, Clone)]
pub struct Part {
    field: Field,
    pre_content: String,
    content_length: u64,
}

impl Part {
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Boundary line, disposition and content-type lines, blank line.
    pub fn pre_content(&self) -> &str {
        &self.pre_content
    }

    /// Line terminator after the content; doubled for files.
    pub fn post_content(&self) -> &'static str {
        match self.field.kind {
            FieldKind::Text => CRLF,
            FieldKind::File => "\r\n\r\n",
        }
    }

    /// Content bytes as counted at append time.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn path(&self) -> Option<&Path> {
        match self.field.kind {
            FieldKind::File => Some(Path::new(&self.field.value)),
            FieldKind::Text => None,
        }
    }

    fn len(&self) -> u64 {
        self.pre_content.len() as u64 + self.content_length + self.post_content().len() as u64
    }
}

/// An ordered multipart body with its boundary and precomputed length.
#[derive(Debug, Clone)]
pub struct FormData {
    boundary: String,
    parts: Vec<Part>,
    content_length: u64,
    files_count: usize,
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

impl FormData {
    /// Create an empty body with a fresh boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("{BOUNDARY_PREFIX}{}", Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        let boundary = boundary.into();
        let content_length = finish_line(&boundary).len() as u64;
        Self {
            boundary,
            parts: Vec::new(),
            content_length,
            files_count: 0,
        }
    }

    pub fn append_text(&mut self, name: &str, value: &str) -> &mut Self {
        self.append(FieldKind::Text, name, value)
    }

    pub fn append_file(&mut self, name: &str, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.append(FieldKind::File, name, &path)
    }

    pub fn append(&mut self, kind: FieldKind, name: &str, value: &str) -> &mut Self {
        let content_length = match kind {
            FieldKind::Text => value.len() as u64,
            FieldKind::File => {
                self.files_count += 1;
                match fs::metadata(value) {
                    Ok(meta) => meta.len(),
                    Err(err) => {
                        log::debug!("counting 0 bytes for unreadable upload {value}: {err}");
                        0
                    }
                }
            }
        };
        let field = Field {
            kind,
            name: name.to_string(),
            value: value.to_string(),
        };
        let part = Part {
            pre_content: pre_content(&self.boundary, &field),
            field,
            content_length,
        };
        self.content_length += part.len();
        self.parts.push(part);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the request `Content-Type` header for this body.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact number of bytes the encoded body occupies.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn files_count(&self) -> usize {
        self.files_count
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The closing `--<boundary>--` line.
    pub fn finish_line(&self) -> String {
        finish_line(&self.boundary)
    }

    /// Render the whole body in memory, reading file contents from disk.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.content_length as usize);
        for part in &self.parts {
            out.extend_from_slice(part.pre_content.as_bytes());
            match part.path() {
                Some(path) => {
                    File::open(path)?.read_to_end(&mut out)?;
                }
                None => out.extend_from_slice(part.field.value.as_bytes()),
            }
            out.extend_from_slice(part.post_content().as_bytes());
        }
        out.extend_from_slice(self.finish_line().as_bytes());
        Ok(out)
    }
}

fn finish_line(boundary: &str) -> String {
    format!("--{boundary}--{CRLF}")
}

fn pre_content(boundary: &str, field: &Field) -> String {
    let name = escape_quoted(&field.name);
    match field.kind {
        FieldKind::Text => format!(
            "--{boundary}{CRLF}Content-Disposition: form-data; name=\"{name}\"{CRLF}{TEXT_CONTENT_TYPE}{CRLF}{CRLF}"
        ),
        FieldKind::File => {
            let file_name = escape_quoted(&file_name(&field.value));
            format!(
                "--{boundary}{CRLF}Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"{CRLF}{FILE_CONTENT_TYPE}{CRLF}{CRLF}"
            )
        }
    }
}

fn file_name(path: &str) -> String {
    PathBuf::from(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

// percent-encode the characters that would break a quoted-string header parameter
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
