//! End-to-end build scenarios against the scripted runtime.

use std::path::Path;
use std::sync::Arc;

use texforge_core::fakes::{ScriptedRuntime, FAKE_PDF};
use texforge_core::{
    BibTool, BuildOutcome, BuildRequest, Compiler, CompileError, SandboxConfig, Severity,
    SourceFile, StepKind,
};

const PLAIN: &str = "\\documentclass{article}\n\\begin{document}Hello\\end{document}\n";
const MIXED_BIB: &str = "\\documentclass{article}\n\\usepackage{biblatex}\n\\addbibresource{refs.bib}\n\\bibliographystyle{plain}\n\\begin{document}\\cite{knuth}\\end{document}\n";

fn compiler(root: &Path, runtime: Arc<ScriptedRuntime>) -> Compiler {
    let config = SandboxConfig::default().with_workspace_root(root);
    Compiler::new(config, runtime)
}

fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

fn finished(outcome: BuildOutcome) -> texforge_core::BuildResponse {
    match outcome {
        BuildOutcome::Finished(response) => response,
        other => panic!("expected finished build, got {}", other.label()),
    }
}

#[tokio::test]
async fn scenario_a_single_file_single_pass() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    let outcome = compiler(root.path(), runtime.clone())
        .build(BuildRequest::single(PLAIN))
        .await
        .unwrap();

    let response = finished(outcome);
    assert!(response.success);
    assert_eq!(response.plan_steps, 1);
    assert_eq!(runtime.executed(), vec![StepKind::EnginePass(1)]);
    assert_eq!(response.artifact.as_deref(), Some(FAKE_PDF));
    assert_eq!(response.artifact_sha256.as_ref().map(String::len), Some(64));
    assert_eq!(entries(root.path()), 0);
    assert_eq!(runtime.live_containers(), 0);
}

#[tokio::test]
async fn scenario_a_missing_artifact_is_failure() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().without_artifact());
    let response = finished(
        compiler(root.path(), runtime)
            .build(BuildRequest::single(PLAIN))
            .await
            .unwrap(),
    );
    assert!(!response.success);
    assert!(response.artifact.is_none());
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn scenario_b_advanced_bibliography_four_steps() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    let response = finished(
        compiler(root.path(), runtime.clone())
            .build(BuildRequest::single(MIXED_BIB))
            .await
            .unwrap(),
    );
    assert!(response.success);
    assert_eq!(response.plan_steps, 4);
    assert_eq!(
        runtime.executed(),
        vec![
            StepKind::EnginePass(1),
            StepKind::Bibliography(BibTool::Advanced),
            StepKind::EnginePass(2),
            StepKind::EnginePass(3),
        ]
    );
    let biber = &runtime.executed_steps()[1];
    assert_eq!(biber.argv(), vec!["biber", "main"]);
}

#[tokio::test]
async fn scenario_c_check_only_single_pass() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    let response = finished(
        compiler(root.path(), runtime.clone())
            .build(BuildRequest::single(MIXED_BIB).with_check_only(true))
            .await
            .unwrap(),
    );
    assert!(response.success);
    assert_eq!(response.plan_steps, 1);
    assert_eq!(runtime.executed(), vec![StepKind::EnginePass(1)]);
    // check-only never ships the artifact
    assert!(response.artifact.is_none());
    assert!(response.artifact_sha256.is_none());
}

#[tokio::test]
async fn scenario_c_check_only_errors_without_artifact_fail() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(
        ScriptedRuntime::new()
            .without_artifact()
            .on_step(StepKind::EnginePass(1), 1, "./main.tex:3: Undefined control sequence.\n"),
    );
    let response = finished(
        compiler(root.path(), runtime)
            .build(BuildRequest::single(MIXED_BIB).with_check_only(true))
            .await
            .unwrap(),
    );
    assert!(!response.success);
    assert_eq!(response.errors.len(), 1);
}

#[tokio::test]
async fn scenario_c_check_only_clean_without_artifact_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().without_artifact());
    let response = finished(
        compiler(root.path(), runtime)
            .build(BuildRequest::single(PLAIN).with_check_only(true))
            .await
            .unwrap(),
    );
    assert!(response.success);
}

#[tokio::test]
async fn scenario_d_file_line_error_surfaced_with_artifact() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().on_step(
        StepKind::EnginePass(1),
        1,
        "This is pdfTeX\n./chapter2.tex:42: Undefined control sequence.\nOutput written on main.pdf\n",
    ));
    let response = finished(
        compiler(root.path(), runtime)
            .build(BuildRequest::single(PLAIN))
            .await
            .unwrap(),
    );

    // the artifact on disk decides success in full mode
    assert!(response.success);
    assert_eq!(response.errors.len(), 1);
    let err = &response.errors[0];
    assert_eq!(err.severity, Severity::Error);
    assert_eq!(err.file.as_deref(), Some("chapter2.tex"));
    assert_eq!(err.line, Some(42));
    assert!(response.log.iter().any(|l| l.starts_with("This is pdfTeX")));
}

#[tokio::test]
async fn scenario_e_runtime_unavailable_is_distinguished() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().unavailable("docker not found in PATH"));
    let outcome = compiler(root.path(), runtime.clone())
        .build(BuildRequest::single(PLAIN))
        .await
        .unwrap();

    match &outcome {
        BuildOutcome::RuntimeUnavailable { message } => assert!(message.contains("not found")),
        other => panic!("expected runtime unavailable, got {}", other.label()),
    }
    assert!(!outcome.is_success());
    assert!(outcome.response().is_none());
    assert!(runtime.executed().is_empty());
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn missing_image_reported_as_unavailable() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().image_missing());
    let c = compiler(root.path(), runtime.clone());
    let image = c.config().image.clone();
    let outcome = c.build(BuildRequest::single(PLAIN)).await.unwrap();

    match &outcome {
        BuildOutcome::RuntimeUnavailable { message } => {
            assert!(message.contains(&image));
            assert!(message.contains("not present"));
        }
        other => panic!("expected runtime unavailable, got {}", other.label()),
    }
    assert!(runtime.executed().is_empty());
    assert_eq!(runtime.live_containers(), 0);
    assert_eq!(entries(root.path()), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_artifact_is_not_returned() {
    let root = tempfile::tempdir().unwrap();
    let host = tempfile::tempdir().unwrap();
    let secret = host.path().join("id_rsa");
    std::fs::write(&secret, b"HOST-SECRET-KEY").unwrap();

    let runtime = Arc::new(ScriptedRuntime::new().link_artifact_to(&secret));
    let response = finished(
        compiler(root.path(), runtime)
            .build(BuildRequest::single(PLAIN))
            .await
            .unwrap(),
    );
    assert!(!response.success);
    assert!(response.artifact.is_none());
    assert!(response.artifact_sha256.is_none());
    assert_eq!(std::fs::read(&secret).unwrap(), b"HOST-SECRET-KEY");
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn timeout_carries_configured_value_and_partial_output() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().hang_on(StepKind::EnginePass(1)));
    let outcome = compiler(root.path(), runtime.clone())
        .build(BuildRequest::single(PLAIN).with_timeout_ms(50))
        .await
        .unwrap();

    match outcome {
        BuildOutcome::TimedOut {
            timeout_ms,
            response,
        } => {
            assert_eq!(timeout_ms, 50);
            assert!(!response.success);
            assert!(response.artifact.is_none());
            assert!(response.log.iter().any(|l| l.contains("pdflatex started")));
        }
        other => panic!("expected timeout, got {}", other.label()),
    }
    assert_eq!(entries(root.path()), 0);
    assert_eq!(runtime.live_containers(), 0);
}

#[tokio::test]
async fn timeout_during_auxiliary_step_stops_plan() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(
        ScriptedRuntime::new().hang_on(StepKind::Bibliography(BibTool::Advanced)),
    );
    let outcome = compiler(root.path(), runtime.clone())
        .build(BuildRequest::single(MIXED_BIB).with_timeout_ms(80))
        .await
        .unwrap();
    assert!(matches!(outcome, BuildOutcome::TimedOut { timeout_ms: 80, .. }));
    assert_eq!(runtime.executed().len(), 2);
}

#[tokio::test]
async fn tolerant_step_failure_does_not_abort() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().on_step(
        StepKind::Bibliography(BibTool::Advanced),
        2,
        "INFO - This is Biber\nERROR - Cannot find 'refs.bib'!\n",
    ));
    let response = finished(
        compiler(root.path(), runtime.clone())
            .build(BuildRequest::single(MIXED_BIB))
            .await
            .unwrap(),
    );
    assert_eq!(runtime.executed().len(), 4);
    assert!(response.success);
    assert!(response.errors.iter().any(|e| e.message.contains("refs.bib")));
}

#[tokio::test]
async fn fatal_pass_failure_skips_remaining_steps() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(
        ScriptedRuntime::new()
            .without_artifact()
            .on_step(StepKind::EnginePass(1), 1, "! Emergency stop.\n"),
    );
    let response = finished(
        compiler(root.path(), runtime.clone())
            .build(BuildRequest::single(MIXED_BIB))
            .await
            .unwrap(),
    );
    assert_eq!(runtime.executed(), vec![StepKind::EnginePass(1)]);
    assert!(!response.success);
    assert_eq!(response.errors[0].message, "Emergency stop.");
}

#[tokio::test]
async fn nested_main_file_runs_in_its_directory() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    let files = vec![
        SourceFile::text("paper/thesis.tex", MIXED_BIB),
        SourceFile::text("paper/refs.bib", "@book{knuth, title={TAOCP}}"),
        SourceFile::base64("paper/figures/dot.png", "iVBORw0KGgo="),
    ];
    let response = finished(
        compiler(root.path(), runtime.clone())
            .build(BuildRequest::project(files, "paper/thesis.tex"))
            .await
            .unwrap(),
    );
    assert!(response.success);
    let steps = runtime.executed_steps();
    assert!(steps.iter().all(|s| s.workdir == "paper"));
    assert_eq!(steps[0].args.last().map(String::as_str), Some("thesis.tex"));
    assert_eq!(steps[1].argv(), vec!["biber", "thesis"]);
}

#[tokio::test]
async fn invalid_request_rejected_before_allocation() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    let c = compiler(root.path(), runtime.clone());

    let err = c
        .build(BuildRequest::project(vec![], "main.tex"))
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidRequest(_)));

    let files = vec![SourceFile::text("main.tex", PLAIN)];
    let err = c
        .build(BuildRequest::project(files, "other.tex"))
        .await
        .unwrap_err();
    assert!(err.is_client_error());

    assert_eq!(runtime.started(), 0);
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn injected_start_failure_still_removes_workspace() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().fail_start("exec format error"));
    let err = compiler(root.path(), runtime.clone())
        .build(BuildRequest::single(PLAIN))
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::Runtime(_)));
    assert!(!err.is_client_error());
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn start_timeout_reported_as_timeout() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new().start_times_out());
    let outcome = compiler(root.path(), runtime)
        .build(BuildRequest::single(PLAIN).with_timeout_ms(1_000))
        .await
        .unwrap();
    assert!(matches!(outcome, BuildOutcome::TimedOut { timeout_ms: 1_000, .. }));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn concurrent_builds_use_separate_workspaces() {
    let root = tempfile::tempdir().unwrap();
    let runtime = Arc::new(ScriptedRuntime::new());
    let c = compiler(root.path(), runtime.clone());

    let (a, b) = tokio::join!(
        c.build(BuildRequest::single(PLAIN)),
        c.build(BuildRequest::single(MIXED_BIB)),
    );
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    assert_eq!(runtime.started(), 2);
    assert_eq!(runtime.removed(), 2);
    assert_eq!(entries(root.path()), 0);
}
