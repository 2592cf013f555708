//! Build request contract and validation.

use std::collections::HashSet;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use super::error::{CompileError, Result};
use super::source::{validate_logical_path, EngineChoice, FileKind, SourceFile};

/// Conventional name of the main document when the caller does not pick one.
pub const DEFAULT_MAIN_FILE: &str = "main.tex";

/// Default wall-clock budget for a build.
pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;

fn default_main_file() -> String {
    DEFAULT_MAIN_FILE.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Per-request build options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilationOptions {
    pub engine: EngineChoice,

    /// Wall-clock limit for the whole build, in milliseconds.
    pub timeout_ms: u64,

    /// Single abbreviated pass, no reference resolution.
    pub check_only: bool,
}

impl Default for CompilationOptions {
    fn default() -> Self {
        Self {
            engine: EngineChoice::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            check_only: false,
        }
    }
}

/// A build request as received from a caller.
///
/// Either `source_files` or the single-document shorthand `content` must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default)]
    pub source_files: Vec<SourceFile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default = "default_main_file")]
    pub main_file_path: String,

    #[serde(default, alias = "engineChoice")]
    pub engine: EngineChoice,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub check_only: bool,
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            source_files: Vec::new(),
            content: None,
            main_file_path: default_main_file(),
            engine: EngineChoice::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            check_only: false,
        }
    }
}

impl BuildRequest {
    /// Single-document request.
    pub fn single(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Multi-file request with an explicit main file.
    pub fn project(files: Vec<SourceFile>, main_file_path: impl Into<String>) -> Self {
        Self {
            source_files: files,
            main_file_path: main_file_path.into(),
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, engine: EngineChoice) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_check_only(mut self, check_only: bool) -> Self {
        self.check_only = check_only;
        self
    }

    /// Validate the request and pin down the main file.
    ///
    /// Runs before any sandbox resource is allocated.
    pub fn resolve(self) -> Result<ResolvedRequest> {
        if self.timeout_ms == 0 {
            return Err(CompileError::InvalidRequest(
                "timeout must be greater than zero".into(),
            ));
        }

        let main_file = normalize_path(&self.main_file_path);
        validate_logical_path(&main_file)?;

        let mut files = self.source_files;
        if files.is_empty() {
            match self.content {
                Some(content) if !content.trim().is_empty() => {
                    files.push(SourceFile::text(main_file.clone(), content).with_kind(FileKind::Markup));
                }
                _ => return Err(CompileError::InvalidRequest("no source provided".into())),
            }
        }

        let mut seen = HashSet::new();
        for file in &mut files {
            file.path = normalize_path(&file.path);
            validate_logical_path(&file.path)?;
            if !seen.insert(file.path.clone()) {
                return Err(CompileError::InvalidRequest(format!(
                    "duplicate file path: {}",
                    file.path
                )));
            }
        }

        let main = files
            .iter()
            .find(|f| f.path == main_file)
            .ok_or_else(|| {
                CompileError::InvalidRequest(format!("main file not found: {main_file}"))
            })?;
        if main.kind != FileKind::Markup {
            return Err(CompileError::InvalidRequest(format!(
                "main file is not a markup document: {main_file}"
            )));
        }

        Ok(ResolvedRequest {
            files,
            main_file,
            options: CompilationOptions {
                engine: self.engine,
                timeout_ms: self.timeout_ms,
                check_only: self.check_only,
            },
        })
    }
}

/// Drop `.` segments and repeated separators so paths compare equal however
/// the caller spelled them. Other components are kept for validation to reject.
fn normalize_path(path: &str) -> String {
    Path::new(path.trim())
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// A validated request, ready for analysis and planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub files: Vec<SourceFile>,
    pub main_file: String,
    pub options: CompilationOptions,
}

impl ResolvedRequest {
    /// The designated main markup file.
    pub fn main(&self) -> &SourceFile {
        self.files
            .iter()
            .find(|f| f.path == self.main_file)
            .unwrap_or(&self.files[0])
    }

    /// Directory of the main file, relative to the workspace root (`""` for the root).
    pub fn main_dir(&self) -> String {
        Path::new(&self.main_file)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name of the main file without its directory.
    pub fn main_file_name(&self) -> String {
        Path::new(&self.main_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.main_file.clone())
    }
}
