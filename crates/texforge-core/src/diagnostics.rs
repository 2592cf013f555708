//! Diagnostics parser for toolchain output.
//!
//! Classifies captured engine/biber/bibtex output into structured errors and
//! warnings. Output from every step is concatenated before classification, so
//! diagnostics belong to the whole build rather than to a single pass.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::Diagnostic;
use crate::sandbox::CONTAINER_WORKDIR;

/// Configuration for the diagnostics parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsParserConfig {
    /// Maximum number of errors to retain.
    pub max_errors: usize,

    /// Maximum number of warnings to retain.
    pub max_warnings: usize,
}

impl Default for DiagnosticsParserConfig {
    fn default() -> Self {
        Self {
            max_errors: 100,
            max_warnings: 200,
        }
    }
}

/// Classified diagnostics, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDiagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ParsedDiagnostics {
    /// Warnings flattened to display strings.
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}

// `./chapter2.tex:42: Undefined control sequence.` (-file-line-error format),
// optionally `file:line:column:` as some engines and packages print it.
static FILE_LINE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>(?:[A-Za-z]:)?[^:\s][^:]*?\.[A-Za-z0-9]+):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<msg>.*)$",
    )
    .expect("valid regex")
});

// `! LaTeX Error: File `foo.sty' not found.`
static TEX_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!\s+(?P<msg>.+)$").expect("valid regex"));

static BIBER_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ERROR - (?P<msg>.+)$").expect("valid regex"));

static BIBTEX_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<msg>I (?:couldn't open|found no) .+)$").expect("valid regex")
});

static WARNING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:LaTeX(?: Font)? Warning:|Package (?P<pkg>\S+) Warning:|Class \S+ Warning:|(?:Overfull|Underfull) \\[hv]box|Missing character:|pdfTeX warning|WARN - |Warning--)",
    )
    .expect("valid regex")
});

static WARNING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:on input line|at lines?|detected at line) (?P<line>\d+)").expect("valid regex")
});

/// Parse combined toolchain output.
pub fn parse(output: &str, config: &DiagnosticsParserConfig) -> ParsedDiagnostics {
    let mut parsed = ParsedDiagnostics::default();
    let mut seen = HashSet::new();
    let lines: Vec<&str> = output.lines().map(str::trim_end).collect();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if line.is_empty() {
            continue;
        }

        if let Some(diag) = classify_error(line) {
            if seen.insert(diag.clone()) {
                parsed.errors.push(diag);
            }
            continue;
        }

        if let Some(caps) = WARNING.captures(line) {
            let mut message = line.trim().to_string();
            // Package warnings continue on lines prefixed with `(pkg)`.
            if let Some(pkg) = caps.name("pkg") {
                let prefix = format!("({})", pkg.as_str());
                while i < lines.len() && lines[i].starts_with(&prefix) {
                    message.push(' ');
                    message.push_str(lines[i][prefix.len()..].trim());
                    i += 1;
                }
            }
            let mut diag = Diagnostic::warning(message.clone());
            if let Some(n) = WARNING_LINE
                .captures(&message)
                .and_then(|c| c["line"].parse::<u32>().ok())
            {
                diag = diag.with_line(n);
            }
            if seen.insert(diag.clone()) {
                parsed.warnings.push(diag);
            }
        }
    }

    parsed.errors.truncate(config.max_errors);
    parsed.warnings.truncate(config.max_warnings);
    parsed
}

fn classify_error(line: &str) -> Option<Diagnostic> {
    if let Some(caps) = FILE_LINE_ERROR.captures(line) {
        if let Ok(n) = caps["line"].parse::<u32>() {
            let message = caps["msg"].trim();
            let message = if message.is_empty() { line } else { message };
            let mut diag = Diagnostic::error(message).with_location(logical_file(&caps["file"]), n);
            if let Some(col) = caps.name("col").and_then(|c| c.as_str().parse::<u32>().ok()) {
                diag = diag.with_column(col);
            }
            return Some(diag);
        }
    }
    for re in [&*TEX_ERROR, &*BIBER_ERROR, &*BIBTEX_ERROR] {
        if let Some(caps) = re.captures(line) {
            return Some(Diagnostic::error(caps["msg"].trim()));
        }
    }
    None
}

/// Map an in-container path back to the caller's logical path.
fn logical_file(file: &str) -> String {
    let mut f = file
        .strip_prefix(CONTAINER_WORKDIR)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(file);
    while let Some(rest) = f.strip_prefix("./") {
        f = rest;
    }
    f.to_string()
}

/// Raw output split into non-blank lines.
pub fn log_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn parse_default(output: &str) -> ParsedDiagnostics {
        parse(output, &DiagnosticsParserConfig::default())
    }

    #[test]
    fn test_file_line_error_extracted() {
        let parsed = parse_default("./chapter2.tex:42: Undefined control sequence.");
        assert_eq!(parsed.errors.len(), 1);
        let err = &parsed.errors[0];
        assert_eq!(err.severity, Severity::Error);
        assert_eq!(err.file.as_deref(), Some("chapter2.tex"));
        assert_eq!(err.line, Some(42));
        assert_eq!(err.message, "Undefined control sequence.");
    }

    #[test]
    fn test_file_line_column_error_extracted() {
        let parsed = parse_default("./main.tex:12:5: Missing $ inserted.");
        let err = &parsed.errors[0];
        assert_eq!(err.line, Some(12));
        assert_eq!(err.column, Some(5));
        assert_eq!(err.message, "Missing $ inserted.");
        assert!(parse_default("./main.tex:12: x").errors[0].column.is_none());
    }

    #[test]
    fn test_container_prefix_stripped() {
        let parsed = parse_default("/workspace/paper/intro.tex:7: Missing $ inserted.");
        assert_eq!(parsed.errors[0].file.as_deref(), Some("paper/intro.tex"));
    }

    #[test]
    fn test_bang_errors_without_location() {
        let parsed = parse_default("! LaTeX Error: File `foo.sty' not found.\n! Emergency stop.");
        assert_eq!(parsed.errors.len(), 2);
        assert!(parsed.errors[0].file.is_none());
        assert!(parsed.errors[0].message.starts_with("LaTeX Error"));
    }

    #[test]
    fn test_bibliography_tool_errors() {
        let out = "INFO - This is Biber 2.19\nERROR - Cannot find 'refs.bib'!\nI couldn't open database file refs.bib";
        let parsed = parse_default(out);
        assert_eq!(parsed.errors.len(), 2);
        assert_eq!(parsed.errors[0].message, "Cannot find 'refs.bib'!");
    }

    #[test]
    fn test_warning_markers() {
        let out = "\
LaTeX Warning: Reference `fig:1' on page 1 undefined on input line 12.
Overfull \\hbox (3.2pt too wide) in paragraph at lines 20--22
Missing character: There is no ^^A in font cmr10!
LaTeX Font Warning: Font shape `OT1/cmr/bx/it' undefined
WARN - Duplicate entry key 'smith'
Warning--empty year in knuth
This line is just noise";
        let parsed = parse_default(out);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.warnings.len(), 6);
        assert_eq!(parsed.warnings[0].line, Some(12));
        assert_eq!(parsed.warnings[1].line, Some(20));
        assert!(parsed.warnings[2].line.is_none());
    }

    #[test]
    fn test_package_warning_continuation_joined() {
        let out = "Package hyperref Warning: Token not allowed in a PDF string\n(hyperref)                removing `math shift' on input line 5.\nnext";
        let parsed = parse_default(out);
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].message.contains("removing `math shift'"));
        assert_eq!(parsed.warnings[0].line, Some(5));
    }

    #[test]
    fn test_repeated_pass_output_deduplicated() {
        let pass = "./main.tex:3: Undefined control sequence.\nLaTeX Warning: There were undefined references.\n";
        let parsed = parse_default(&pass.repeat(3));
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_informational_lines_ignored() {
        let out = "This is pdfTeX, Version 3.141592653\n(./main.tex\nOutput written on main.pdf (1 page, 1234 bytes).";
        let parsed = parse_default(out);
        assert!(parsed.errors.is_empty());
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_parse_respects_limits() {
        let config = DiagnosticsParserConfig {
            max_errors: 1,
            max_warnings: 0,
        };
        let out = "a.tex:1: x\nb.tex:2: y\nLaTeX Warning: z";
        let parsed = parse(out, &config);
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_warning_messages_render_line() {
        let parsed = parse_default("LaTeX Warning: Citation `x' undefined on input line 9.");
        assert_eq!(
            parsed.warning_messages(),
            vec!["line 9: LaTeX Warning: Citation `x' undefined on input line 9."]
        );
    }

    #[test]
    fn test_log_lines_drop_blanks() {
        assert_eq!(log_lines("a\n\n  \nb  \n"), vec!["a", "b"]);
    }

    #[test]
    fn test_parser_config_default() {
        let config = DiagnosticsParserConfig::default();
        assert_eq!(config.max_errors, 100);
        assert_eq!(config.max_warnings, 200);
    }
}
