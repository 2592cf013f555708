//! texforge - sandboxed LaTeX compilation from the command line
//!
//! ## Commands
//!
//! - `build`: compile a project and write the PDF
//! - `check`: single-pass buildability check, no PDF written
//! - `status`: report container runtime and toolchain image availability
//! - `analyze`: show which auxiliary tools a document needs
//! - `plan`: show the steps a build would run

mod project;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use texforge_core::{
    BuildOutcome, BuildRequest, BuildResponse, Compiler, DocumentAnalyzer, EngineChoice,
    PullPolicy, SandboxConfig, DEFAULT_TIMEOUT_MS,
};

use crate::project::load_project;

#[derive(Parser)]
#[command(name = "texforge")]
#[command(version = texforge_core::VERSION)]
#[command(about = "Sandboxed multi-pass LaTeX compilation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a project and write the rendered PDF
    Build {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output path for the PDF (default: next to the main file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        sandbox: SandboxArgs,
    },

    /// Run a single fast pass to check the project builds
    Check {
        #[command(flatten)]
        project: ProjectArgs,

        #[command(flatten)]
        sandbox: SandboxArgs,
    },

    /// Report container runtime and toolchain image availability
    Status {
        #[command(flatten)]
        sandbox: SandboxArgs,
    },

    /// Show the auxiliary tools a document needs
    Analyze {
        /// Markup file to inspect
        file: PathBuf,
    },

    /// Show the steps a build would run, without running them
    Plan {
        #[command(flatten)]
        project: ProjectArgs,

        /// Plan a check-only build
        #[arg(long)]
        check_only: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct ProjectArgs {
    /// Main markup file
    main: PathBuf,

    /// Project root sent to the sandbox (default: the main file's directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Rendering engine (pdflatex, xelatex, lualatex)
    #[arg(short, long, default_value = "pdflatex", value_parser = parse_engine)]
    engine: EngineChoice,

    /// Wall-clock budget for the whole build, in milliseconds
    #[arg(long, env = "TEXFORGE_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
}

#[derive(Args, Debug, Clone, Default)]
struct SandboxArgs {
    /// Container runtime CLI
    #[arg(long, env = "TEXFORGE_RUNTIME")]
    runtime: Option<String>,

    /// Toolchain image
    #[arg(long, env = "TEXFORGE_IMAGE")]
    image: Option<String>,

    /// Directory for per-build workspaces
    #[arg(long, env = "TEXFORGE_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Pull a missing image (`missing`) or fail (`never`)
    #[arg(long, env = "TEXFORGE_PULL_POLICY")]
    pull: Option<PullPolicy>,
}

impl SandboxArgs {
    fn config(&self) -> SandboxConfig {
        let mut config = SandboxConfig::from_env();
        if let Some(runtime) = &self.runtime {
            config = config.with_runtime_binary(runtime.clone());
        }
        if let Some(image) = &self.image {
            config = config.with_image(image.clone());
        }
        if let Some(root) = &self.workspace_root {
            config = config.with_workspace_root(root.clone());
        }
        if let Some(pull) = self.pull {
            config = config.with_pull_policy(pull);
        }
        config
    }
}

fn parse_engine(s: &str) -> std::result::Result<EngineChoice, String> {
    s.parse::<EngineChoice>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    texforge_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Build {
            project,
            output,
            sandbox,
        } => {
            let compiler = Compiler::docker(sandbox.config());
            cmd_build(&compiler, &project, output.as_deref()).await
        }
        Commands::Check { project, sandbox } => {
            let compiler = Compiler::docker(sandbox.config());
            cmd_check(&compiler, &project).await
        }
        Commands::Status { sandbox } => cmd_status(&Compiler::docker(sandbox.config())).await,
        Commands::Analyze { file } => cmd_analyze(&file),
        Commands::Plan {
            project,
            check_only,
        } => cmd_plan(&Compiler::docker(SandboxConfig::from_env()), &project, check_only),
    }
}

fn request_for(args: &ProjectArgs, check_only: bool) -> Result<(BuildRequest, project::Project)> {
    let project = load_project(&args.main, args.root.as_deref())?;
    let request = BuildRequest::project(project.files.clone(), project.main.clone())
        .with_engine(args.engine)
        .with_timeout_ms(args.timeout_ms)
        .with_check_only(check_only);
    Ok((request, project))
}

/// Compile and write the PDF.
async fn cmd_build(compiler: &Compiler, args: &ProjectArgs, output: Option<&Path>) -> Result<()> {
    let (request, project) = request_for(args, false)?;
    info!(main = %project.main, files = project.files.len(), "building project");

    let response = finished(compiler.build(request).await.context("Build failed")?)?;
    print_response(&response);

    if !response.success {
        bail!("build produced no PDF");
    }
    let artifact = response
        .artifact
        .as_deref()
        .context("successful build returned no artifact")?;
    let dest = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project.default_output());
    std::fs::write(&dest, artifact)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    println!("Wrote {} ({} bytes)", dest.display(), artifact.len());
    Ok(())
}

/// Single-pass buildability check.
async fn cmd_check(compiler: &Compiler, args: &ProjectArgs) -> Result<()> {
    let (request, _) = request_for(args, true)?;
    let response = finished(compiler.build(request).await.context("Check failed")?)?;
    print_response(&response);
    if !response.success {
        bail!("check failed with {} error(s)", response.errors.len());
    }
    println!("OK");
    Ok(())
}

async fn cmd_status(compiler: &Compiler) -> Result<()> {
    let report = compiler.status_probe().probe().await;
    println!(
        "Runtime:  {}",
        if report.runtime_up { "up" } else { "unavailable" }
    );
    println!(
        "Image:    {} ({})",
        report.toolchain_image_name,
        if report.toolchain_image_present {
            "present"
        } else {
            "missing"
        }
    );
    println!("{}", report.probe_message);
    if !report.runtime_up || !report.toolchain_image_present {
        bail!("toolchain not ready");
    }
    Ok(())
}

fn cmd_analyze(file: &Path) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let req = DocumentAnalyzer::default().analyze(&source);
    println!(
        "{}",
        serde_json::to_string_pretty(&req).context("Failed to serialize requirements")?
    );
    Ok(())
}

fn cmd_plan(compiler: &Compiler, args: &ProjectArgs, check_only: bool) -> Result<()> {
    let (request, _) = request_for(args, check_only)?;
    let resolved = request.resolve().context("Invalid project")?;
    let plan = compiler.plan_for(&resolved).context("Failed to plan build")?;

    println!("Engine:  {}", plan.engine);
    println!("Workdir: {}", if plan.workdir.is_empty() { "." } else { plan.workdir.as_str() });
    println!("Steps:   {}", plan.len());
    for (i, step) in plan.steps.iter().enumerate() {
        let mode = if step.tolerant { "tolerant" } else { "fatal" };
        println!("  {:>2}. [{mode:<8}] {}", i + 1, step.display_command());
    }
    println!("Artifact: {}", plan.artifact_path());
    Ok(())
}

/// Unwrap a finished build; timeouts and an unreachable runtime are errors here.
fn finished(outcome: BuildOutcome) -> Result<BuildResponse> {
    match outcome {
        BuildOutcome::Finished(response) => Ok(response),
        BuildOutcome::TimedOut {
            timeout_ms,
            response,
        } => {
            print_response(&response);
            bail!("build timed out after {timeout_ms}ms")
        }
        BuildOutcome::RuntimeUnavailable { message } => {
            bail!("container runtime unavailable: {message}")
        }
    }
}

fn print_response(response: &BuildResponse) {
    for err in &response.errors {
        eprintln!("error: {err}");
    }
    for warning in &response.warnings {
        eprintln!("warning: {warning}");
    }
    eprintln!(
        "{} in {}ms ({} step(s), {} error(s), {} warning(s))",
        if response.success { "Succeeded" } else { "Failed" },
        response.duration_ms,
        response.plan_steps,
        response.errors.len(),
        response.warnings.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use texforge_core::fakes::{ScriptedRuntime, FAKE_PDF};
    use texforge_core::StepKind;

    const DOC: &str = "\\documentclass{article}\n\\usepackage{makeidx}\n\\makeindex\n\\begin{document}x\\end{document}\n";

    fn project_args(main: PathBuf) -> ProjectArgs {
        ProjectArgs {
            main,
            root: None,
            engine: EngineChoice::PdfLatex,
            timeout_ms: 10_000,
        }
    }

    fn fake_compiler(root: &Path, runtime: ScriptedRuntime) -> Compiler {
        let config = SandboxConfig::default().with_workspace_root(root);
        Compiler::new(config, Arc::new(runtime))
    }

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from([
            "texforge", "--json", "build", "paper/main.tex", "-e", "xelatex", "-o", "out.pdf",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Build {
                project, output, ..
            } => {
                assert_eq!(project.engine, EngineChoice::XeLatex);
                assert_eq!(output, Some(PathBuf::from("out.pdf")));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_engine() {
        assert!(Cli::try_parse_from(["texforge", "check", "main.tex", "-e", "context"]).is_err());
    }

    #[test]
    fn test_sandbox_args_override_config() {
        let args = SandboxArgs {
            runtime: Some("podman".into()),
            image: Some("tex:small".into()),
            workspace_root: None,
            pull: Some(PullPolicy::Never),
        };
        let config = args.config();
        assert_eq!(config.runtime_binary, "podman");
        assert_eq!(config.image, "tex:small");
        assert_eq!(config.pull_policy, PullPolicy::Never);
    }

    #[tokio::test]
    async fn test_cmd_build_writes_pdf() {
        let project = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let main = project.path().join("main.tex");
        std::fs::write(&main, DOC).unwrap();

        let compiler = fake_compiler(scratch.path(), ScriptedRuntime::new());
        cmd_build(&compiler, &project_args(main), None).await.unwrap();

        let pdf = std::fs::read(project.path().join("main.pdf")).unwrap();
        assert_eq!(pdf, FAKE_PDF);
    }

    #[tokio::test]
    async fn test_cmd_check_fails_on_errors_without_pdf() {
        let project = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let main = project.path().join("main.tex");
        std::fs::write(&main, DOC).unwrap();

        let runtime = ScriptedRuntime::new().without_artifact().on_step(
            StepKind::EnginePass(1),
            1,
            "./main.tex:4: Undefined control sequence.",
        );
        let compiler = fake_compiler(scratch.path(), runtime);
        let err = cmd_check(&compiler, &project_args(main)).await.unwrap_err();
        assert!(err.to_string().contains("1 error"));
    }

    #[tokio::test]
    async fn test_cmd_build_reports_unavailable_runtime() {
        let project = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let main = project.path().join("main.tex");
        std::fs::write(&main, DOC).unwrap();

        let compiler = fake_compiler(scratch.path(), ScriptedRuntime::new().unavailable("no daemon"));
        let err = cmd_build(&compiler, &project_args(main), None).await.unwrap_err();
        assert!(err.to_string().contains("runtime unavailable"));
    }

    #[tokio::test]
    async fn test_cmd_status_not_ready() {
        let scratch = tempfile::tempdir().unwrap();
        let compiler = fake_compiler(scratch.path(), ScriptedRuntime::new().image_missing());
        assert!(cmd_status(&compiler).await.is_err());

        let compiler = fake_compiler(scratch.path(), ScriptedRuntime::new());
        cmd_status(&compiler).await.unwrap();
    }

    #[test]
    fn test_cmd_plan_and_analyze() {
        let project = tempfile::tempdir().unwrap();
        let main = project.path().join("main.tex");
        std::fs::write(&main, DOC).unwrap();

        cmd_analyze(&main).unwrap();
        let compiler = Compiler::docker(SandboxConfig::default());
        cmd_plan(&compiler, &project_args(main), false).unwrap();
    }
}
