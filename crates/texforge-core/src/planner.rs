//! Compilation planning: analyzer verdict + options -> ordered build steps.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analyzer::{BibTool, ToolRequirements};
use crate::domain::EngineChoice;

/// Number of engine passes appended after auxiliary tools run.
///
/// One extra pass is not enough to converge when several tools interact
/// (glossary entries that are also cited, for example).
pub const RESOLUTION_PASSES: usize = 2;

/// What a step does.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepKind {
    /// Engine pass, numbered from 1.
    EnginePass(usize),
    Bibliography(BibTool),
    Glossary,
    Index,
}

impl StepKind {
    pub fn is_engine_pass(&self) -> bool {
        matches!(self, StepKind::EnginePass(_))
    }

    /// Stable name for logs.
    pub fn name(&self) -> String {
        match self {
            StepKind::EnginePass(n) => format!("pass_{n}"),
            StepKind::Bibliography(BibTool::Advanced) => "biber".to_string(),
            StepKind::Bibliography(_) => "bibtex".to_string(),
            StepKind::Glossary => "makeglossaries".to_string(),
            StepKind::Index => "makeindex".to_string(),
        }
    }
}

/// One discrete subprocess invocation inside the sandbox.
///
/// The command is an argv, never a shell string, so file names cannot inject
/// shell syntax.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellStep {
    pub kind: StepKind,

    pub program: String,

    pub args: Vec<String>,

    /// Working directory relative to the workspace root (`""` = root).
    pub workdir: String,

    /// Failure does not abort the remaining steps.
    pub tolerant: bool,
}

impl ShellStep {
    /// Full argv, program first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Human-readable command line (for logs only, never executed).
    pub fn display_command(&self) -> String {
        self.argv().join(" ")
    }
}

/// Ordered build steps for one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilationPlan {
    pub engine: EngineChoice,
    pub requirements: ToolRequirements,
    pub check_only: bool,
    /// Main file name (no directory).
    pub main_file: String,
    pub workdir: String,
    pub steps: Vec<ShellStep>,
}

impl CompilationPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn engine_passes(&self) -> usize {
        self.steps.iter().filter(|s| s.kind.is_engine_pass()).count()
    }

    /// Where the engine writes the PDF, relative to the workspace root.
    pub fn artifact_path(&self) -> String {
        let pdf = format!("{}.pdf", file_stem(&self.main_file));
        if self.workdir.is_empty() {
            pdf
        } else {
            format!("{}/{}", self.workdir, pdf)
        }
    }
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

/// Build the plan.
///
/// `main_file` is the main document's file name, `workdir` its directory
/// relative to the workspace root. Auxiliary steps run in fixed order
/// bibliography -> glossary -> index, because glossary and index page numbers
/// only settle once citations are placed.
pub fn plan(
    main_file: &str,
    workdir: &str,
    engine: EngineChoice,
    requirements: ToolRequirements,
    check_only: bool,
) -> CompilationPlan {
    let stem = file_stem(main_file);
    let mut steps = vec![engine_pass(1, main_file, workdir, engine, &requirements)];

    if !check_only {
        let aux = |kind: StepKind, program: &str, arg: String| ShellStep {
            kind,
            program: program.to_string(),
            args: vec![arg],
            workdir: workdir.to_string(),
            tolerant: true,
        };

        let mut auxiliary = Vec::new();
        if let Some(bin) = requirements.bib_tool.binary() {
            auxiliary.push(aux(
                StepKind::Bibliography(requirements.bib_tool),
                bin,
                stem.clone(),
            ));
        }
        if requirements.glossary {
            auxiliary.push(aux(StepKind::Glossary, "makeglossaries", stem.clone()));
        }
        if requirements.index {
            auxiliary.push(aux(StepKind::Index, "makeindex", format!("{stem}.idx")));
        }

        if !auxiliary.is_empty() {
            steps.extend(auxiliary);
            for n in 0..RESOLUTION_PASSES {
                steps.push(engine_pass(2 + n, main_file, workdir, engine, &requirements));
            }
        }
    }

    CompilationPlan {
        engine,
        requirements,
        check_only,
        main_file: main_file.to_string(),
        workdir: workdir.to_string(),
        steps,
    }
}

fn engine_pass(
    n: usize,
    main_file: &str,
    workdir: &str,
    engine: EngineChoice,
    requirements: &ToolRequirements,
) -> ShellStep {
    let mut args = vec![
        "-interaction=nonstopmode".to_string(),
        "-file-line-error".to_string(),
    ];
    if requirements.elevated_shell {
        args.push("-shell-escape".to_string());
    }
    args.push(main_file.to_string());

    ShellStep {
        kind: StepKind::EnginePass(n),
        program: engine.binary().to_string(),
        args,
        workdir: workdir.to_string(),
        tolerant: false,
    }
}
