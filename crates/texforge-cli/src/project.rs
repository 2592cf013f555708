//! Loading a project directory into build request files.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use texforge_core::{FileKind, SourceFile};

/// Extensions of files the toolchain writes; never sent as inputs.
const BUILD_PRODUCTS: &[&str] = &[
    "aux", "log", "out", "toc", "lof", "lot", "bbl", "blg", "bcf", "fls", "idx", "ind", "ilg",
    "glo", "gls", "glg", "ist", "xdv", "fdb_latexmk", "synctex",
];

/// A project on disk, ready to be turned into a request.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    /// Main file relative to `root`, `/`-separated.
    pub main: String,
    pub files: Vec<SourceFile>,
}

impl Project {
    /// Where the rendered PDF goes by default: next to the main file.
    pub fn default_output(&self) -> PathBuf {
        self.root.join(&self.main).with_extension("pdf")
    }
}

/// Collect every input file under `root` (default: the main file's directory).
pub fn load_project(main: &Path, root: Option<&Path>) -> Result<Project> {
    let main_abs = main
        .canonicalize()
        .with_context(|| format!("main file not found: {}", main.display()))?;
    let root_abs = match root {
        Some(r) => r
            .canonicalize()
            .with_context(|| format!("project root not found: {}", r.display()))?,
        None => main_abs
            .parent()
            .map(Path::to_path_buf)
            .context("main file has no parent directory")?,
    };
    let relative = main_abs.strip_prefix(&root_abs).with_context(|| {
        format!(
            "{} is not inside project root {}",
            main_abs.display(),
            root_abs.display()
        )
    })?;
    let main_rel = to_logical(relative);
    let skip_pdf = to_logical(&relative.with_extension("pdf"));

    let mut files = Vec::new();
    collect(&root_abs, &root_abs, &skip_pdf, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    if !files.iter().any(|f| f.path == main_rel) {
        bail!("main file {main_rel} was skipped while loading the project");
    }

    Ok(Project {
        root: root_abs,
        main: main_rel,
        files,
    })
}

fn collect(dir: &Path, root: &Path, skip: &str, out: &mut Vec<SourceFile>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect(&path, root, skip, out)?;
            continue;
        }
        if !file_type.is_file() || is_build_product(&path) {
            continue;
        }
        let logical = to_logical(path.strip_prefix(root)?);
        if logical == skip {
            continue;
        }
        let bytes =
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        out.push(source_file(logical, bytes));
    }
    Ok(())
}

fn source_file(logical: String, bytes: Vec<u8>) -> SourceFile {
    if FileKind::infer(&logical) == FileKind::Image {
        return SourceFile::base64(logical, BASE64.encode(&bytes));
    }
    match String::from_utf8(bytes) {
        Ok(text) => SourceFile::text(logical, text),
        Err(e) => SourceFile::base64(logical, BASE64.encode(e.as_bytes())),
    }
}

fn is_build_product(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.ends_with(".synctex.gz") || name.ends_with(".run.xml") {
        return true;
    }
    path.extension()
        .map(|ext| BUILD_PRODUCTS.contains(&ext.to_string_lossy().as_ref()))
        .unwrap_or(false)
}

fn to_logical(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
