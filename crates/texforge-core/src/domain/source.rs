//! Source files and engine selection.

use std::path::{Component, Path};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::{CompileError, Result};

/// What role a source file plays in the build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Markup,
    Bibliography,
    Class,
    Style,
    Image,
    Other,
}

impl FileKind {
    /// Infer the kind from a file extension.
    pub fn infer(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "tex" | "ltx" | "latex" => FileKind::Markup,
            "bib" => FileKind::Bibliography,
            "cls" => FileKind::Class,
            "sty" | "bst" | "bbx" | "cbx" => FileKind::Style,
            "png" | "jpg" | "jpeg" | "gif" | "pdf" | "eps" | "svg" | "webp" => FileKind::Image,
            _ => FileKind::Other,
        }
    }
}

/// How `SourceFile::content` is encoded on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentEncoding {
    #[default]
    Text,
    Base64,
}

/// A single input file, addressed by its path inside the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "SourceFileWire")]
pub struct SourceFile {
    /// Logical path relative to the workspace root (e.g. `chapters/intro.tex`).
    pub path: String,

    pub content: String,

    pub encoding: ContentEncoding,

    pub kind: FileKind,
}

/// Wire shape: `encoding` and `kind` are optional, `kind` is inferred from the path.
#[derive(Deserialize)]
struct SourceFileWire {
    path: String,
    content: String,
    #[serde(default)]
    encoding: ContentEncoding,
    #[serde(default)]
    kind: Option<FileKind>,
}

impl From<SourceFileWire> for SourceFile {
    fn from(wire: SourceFileWire) -> Self {
        let kind = wire.kind.unwrap_or_else(|| FileKind::infer(&wire.path));
        Self {
            path: wire.path,
            content: wire.content,
            encoding: wire.encoding,
            kind,
        }
    }
}

impl SourceFile {
    /// Text file whose kind is inferred from the extension.
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let kind = FileKind::infer(&path);
        Self {
            path,
            content: content.into(),
            encoding: ContentEncoding::Text,
            kind,
        }
    }

    /// Binary file carried as base64.
    pub fn base64(path: impl Into<String>, data: impl Into<String>) -> Self {
        let path = path.into();
        let kind = FileKind::infer(&path);
        Self {
            path,
            content: data.into(),
            encoding: ContentEncoding::Base64,
            kind,
        }
    }

    /// Override the inferred kind.
    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    fn is_binary(&self) -> bool {
        self.encoding == ContentEncoding::Base64 || self.kind == FileKind::Image
    }

    /// Bytes to write into the workspace.
    ///
    /// Image files are always decoded from base64, even when the caller sent
    /// them without an explicit encoding.
    pub fn decoded_bytes(&self) -> Result<Vec<u8>> {
        if self.is_binary() {
            BASE64
                .decode(strip_data_url(&self.content).trim())
                .map_err(|e| CompileError::Decode(format!("{}: {}", self.path, e)))
        } else {
            Ok(self.content.as_bytes().to_vec())
        }
    }

    /// Text view of the file, used for analysis of markup sources.
    pub fn text_content(&self) -> Result<String> {
        if self.is_binary() {
            Ok(String::from_utf8_lossy(&self.decoded_bytes()?).into_owned())
        } else {
            Ok(self.content.clone())
        }
    }
}

/// Drop a `data:<mime>;base64,` prefix if the client sent one.
fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some(idx) = data.find(";base64,") {
            return &data[idx + ";base64,".len()..];
        }
    }
    data
}

/// Reject paths that could escape the workspace.
pub(crate) fn validate_logical_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(CompileError::InvalidRequest("file path must not be empty".into()));
    }
    let p = Path::new(path);
    for component in p.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(CompileError::InvalidRequest(format!(
                    "file path must be relative and stay inside the project: {path}"
                )))
            }
        }
    }
    Ok(())
}

/// Rendering engine selected by the caller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    #[default]
    PdfLatex,
    XeLatex,
    LuaLatex,
}

impl EngineChoice {
    /// Executable name inside the toolchain image.
    pub fn binary(&self) -> &'static str {
        match self {
            EngineChoice::PdfLatex => "pdflatex",
            EngineChoice::XeLatex => "xelatex",
            EngineChoice::LuaLatex => "lualatex",
        }
    }
}

impl std::fmt::Display for EngineChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.binary())
    }
}

impl std::str::FromStr for EngineChoice {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdflatex" => Ok(EngineChoice::PdfLatex),
            "xelatex" => Ok(EngineChoice::XeLatex),
            "lualatex" => Ok(EngineChoice::LuaLatex),
            other => Err(CompileError::InvalidRequest(format!("unknown engine: {other}"))),
        }
    }
}
