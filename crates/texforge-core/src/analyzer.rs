//! Auxiliary-tool detection for LaTeX sources.
//!
//! The macro language is too permissive to parse, so detection is a line-level
//! structural scan behind the [`RequirementDetector`] trait. A fuller parser can
//! replace [`HeuristicDetector`] without touching the planner or executor.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which bibliography processor a document needs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BibTool {
    #[default]
    None,
    /// biblatex + biber.
    Advanced,
    /// `\bibliography` + bibtex.
    Legacy,
}

impl BibTool {
    /// Executable name, if any.
    pub fn binary(&self) -> Option<&'static str> {
        match self {
            BibTool::None => None,
            BibTool::Advanced => Some("biber"),
            BibTool::Legacy => Some("bibtex"),
        }
    }
}

/// Analyzer verdict: which auxiliary tools a build needs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ToolRequirements {
    pub bib_tool: BibTool,
    pub glossary: bool,
    pub index: bool,
    /// Engine must run with `-shell-escape`.
    pub elevated_shell: bool,
}

impl ToolRequirements {
    /// Number of auxiliary tool steps these requirements imply.
    pub fn auxiliary_count(&self) -> usize {
        usize::from(self.bib_tool != BibTool::None)
            + usize::from(self.glossary)
            + usize::from(self.index)
    }

    pub fn needs_auxiliary(&self) -> bool {
        self.auxiliary_count() > 0
    }
}

/// Pluggable detection policy.
pub trait RequirementDetector: Send + Sync {
    fn detect(&self, source: &str) -> ToolRequirements;
}

static ADVANCED_BIB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\usepackage\s*(\[[^\]]*\])?\s*\{[^}]*\bbiblatex\b[^}]*\}|\\addbibresource\s*(\[[^\]]*\])?\s*\{")
        .expect("valid regex")
});

static LEGACY_BIB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\bibliography(style)?\s*\{").expect("valid regex"));

static GLOSSARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\usepackage\s*(\[[^\]]*\])?\s*\{[^}]*\bglossaries(-extra)?\b[^}]*\}|\\makeglossaries\b")
        .expect("valid regex")
});

static INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\usepackage\s*(\[[^\]]*\])?\s*\{[^}]*\bi?makeidx\b[^}]*\}|\\makeindex\b")
        .expect("valid regex")
});

static ELEVATED_SHELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\\usepackage\s*(\[[^\]]*\])?\s*\{[^}]*\b(minted|pythontex|svg|gnuplottex|epstopdf)\b[^}]*\}|\\write18\b",
    )
    .expect("valid regex")
});

/// Regex-based structural scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDetector;

impl RequirementDetector for HeuristicDetector {
    fn detect(&self, source: &str) -> ToolRequirements {
        let text = strip_comments(source);

        let bib_tool = if ADVANCED_BIB.is_match(&text) {
            BibTool::Advanced
        } else if LEGACY_BIB.is_match(&text) {
            BibTool::Legacy
        } else {
            BibTool::None
        };

        ToolRequirements {
            bib_tool,
            glossary: GLOSSARY.is_match(&text),
            index: INDEX.is_match(&text),
            elevated_shell: ELEVATED_SHELL.is_match(&text),
        }
    }
}

/// Remove `%` line comments, keeping escaped `\%`.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let mut escaped = false;
        for ch in line.chars() {
            if ch == '%' && !escaped {
                break;
            }
            escaped = ch == '\\' && !escaped;
            out.push(ch);
        }
        out.push('\n');
    }
    out
}

/// Entry point used by the compiler: wraps whichever detector is configured.
pub struct DocumentAnalyzer {
    detector: Box<dyn RequirementDetector>,
}

impl Default for DocumentAnalyzer {
    fn default() -> Self {
        Self::new(Box::new(HeuristicDetector))
    }
}

impl DocumentAnalyzer {
    pub fn new(detector: Box<dyn RequirementDetector>) -> Self {
        Self { detector }
    }

    /// Inspect the main markup source. Pure; never fails.
    pub fn analyze(&self, source: &str) -> ToolRequirements {
        self.detector.detect(source)
    }
}
