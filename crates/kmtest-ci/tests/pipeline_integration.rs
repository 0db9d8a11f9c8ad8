//! Integration tests for the full compile → link → test pipeline.

use std::path::Path;
use std::sync::Arc;

use kmtest_ci::fakes::RecordingRunner;
use kmtest_ci::{
    FailurePolicy, HarnessConfig, Pipeline, ProcessRunner, Stage, SINGLE_THREAD_FLAG,
};
use tempfile::TempDir;

const ARCHIVE_DIR: &str = "target/x86_64-linux-kernel-module/debug";

fn base_with_projects(names: &[&str]) -> TempDir {
    let base = tempfile::tempdir().expect("tempdir");
    for name in names {
        std::fs::create_dir_all(base.path().join(name).join("tests")).unwrap();
    }
    base
}

/// A fake toolchain that produces every artifact the modern layout expects.
fn toolchain_for(base: &Path, names: &[&str]) -> RecordingRunner {
    let mut runner = RecordingRunner::new();
    for name in names {
        let archive = base
            .join(ARCHIVE_DIR)
            .join(format!("lib{}_tests.a", name.replace('-', "_")));
        // compile lines look alike for every project; each xbuild writes all
        // archives and the stage picks its own by path
        runner = runner.producing("xbuild", archive);
    }
    runner.producing("make", base.join("testmodule.ko"))
}

/// Test: `foo-bar` with a marker goes through all three stages.
#[tokio::test]
async fn test_dashed_project_end_to_end() {
    let base = base_with_projects(&["foo-bar"]);
    let runner = Arc::new(toolchain_for(base.path(), &["foo-bar"]));

    let pipeline = Pipeline::new(base.path(), &HarnessConfig::modern(), runner.clone())
        .expect("pipeline");
    let result = pipeline.run().await.expect("run");

    assert!(result.success(), "pipeline should succeed");
    assert_eq!(result.exit_code(), 0);
    assert_eq!(result.passed_count(), 1);

    let stages: Vec<Stage> = result.projects[0].stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, Stage::ORDER.to_vec());

    let invs = runner.invocations();
    assert_eq!(invs.len(), 3);
    let archive = base.path().join(ARCHIVE_DIR).join("libfoo_bar_tests.a");
    assert_eq!(
        result.projects[0].stages[0].artifact.as_deref(),
        Some(archive.as_path())
    );
    assert!(invs[1]
        .args
        .contains(&format!("TEST_LIBRARY={}", archive.display())));
    assert!(invs[1]
        .args
        .contains(&"TEST_LIBRARY_ARCHIVE=libfoo_bar_tests".to_string()));

    let test_run = &invs[2];
    assert!(test_run.has_arg(SINGLE_THREAD_FLAG));
    assert_eq!(
        test_run.env.get("KERNEL_MODULE"),
        Some(base.path().join("testmodule.ko").to_str().unwrap())
    );
}

/// Test: a directory without the marker is not a project.
#[tokio::test]
async fn test_unmarked_directory_is_a_no_op() {
    let base = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(base.path().join("utils/src")).unwrap();
    let runner = Arc::new(RecordingRunner::new());

    let pipeline = Pipeline::new(base.path(), &HarnessConfig::modern(), runner.clone()).unwrap();
    let result = pipeline.run().await.unwrap();

    assert!(result.success());
    assert!(result.projects.is_empty());
    assert_eq!(result.exit_code(), 0);
    assert!(runner.invocations().is_empty());
}

/// Test: a failing cross-compile stops everything after it.
#[tokio::test]
async fn test_compile_failure_aborts_run() {
    let base = base_with_projects(&["alpha", "beta"]);
    let runner = Arc::new(
        toolchain_for(base.path(), &["alpha", "beta"]).failing_on("xbuild", 1),
    );

    let pipeline = Pipeline::new(base.path(), &HarnessConfig::modern(), runner.clone()).unwrap();
    let result = pipeline.run().await.unwrap();

    assert!(!result.success());
    assert!(result.aborted);
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.projects.len(), 1, "beta must never start");

    let failure = result.first_failure().unwrap();
    assert_eq!(failure.project, "alpha");
    assert_eq!(failure.stage, Stage::CrossCompile);

    assert_eq!(runner.count_matching("make"), 0);
    assert_eq!(runner.count_matching("cargo test"), 0);
}

/// Test: continue-on-failure still runs later projects but reports red.
#[tokio::test]
async fn test_continue_on_failure_policy() {
    let base = base_with_projects(&["alpha", "beta"]);
    // only beta's archive is ever produced, so alpha fails its artifact check
    let runner = Arc::new(
        RecordingRunner::new()
            .producing("xbuild", base.path().join(ARCHIVE_DIR).join("libbeta_tests.a"))
            .producing("make", base.path().join("testmodule.ko")),
    );
    let mut config = HarnessConfig::modern();
    config.failure_policy = FailurePolicy::ContinueOnFailure;

    let result = Pipeline::new(base.path(), &config, runner.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!result.success());
    assert!(!result.aborted);
    assert_eq!(result.passed_count(), 1);
    assert_eq!(result.failed_count(), 1);
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.project, "alpha");
    assert!(failure.message.contains("libalpha_tests.a"));
    assert_eq!(runner.count_matching("make"), 1);
}

/// Test: test-process failure surfaces its exit code.
#[tokio::test]
async fn test_failing_tests_surface_exit_code() {
    let base = base_with_projects(&["printk"]);
    let runner = Arc::new(toolchain_for(base.path(), &["printk"]).failing_on("cargo test", 101));

    let result = Pipeline::new(base.path(), &HarnessConfig::modern(), runner)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(result.exit_code(), 101);
    let outcome = &result.projects[0];
    assert_eq!(outcome.stages.len(), 2);
    assert_eq!(outcome.failure.as_ref().unwrap().stage, Stage::TestExecution);
}

/// Test: a module left by an earlier project does not satisfy a later link.
#[tokio::test]
async fn test_stale_kernel_module_is_not_reused() {
    let base = base_with_projects(&["alpha", "beta"]);
    let module = base.path().join("testmodule.ko");
    let mut runner = RecordingRunner::new().producing("TEST_PATH=alpha", &module);
    for name in ["alpha", "beta"] {
        runner = runner.producing(
            "xbuild",
            base.path().join(ARCHIVE_DIR).join(format!("lib{}_tests.a", name)),
        );
    }
    let runner = Arc::new(runner);

    let result = Pipeline::new(base.path(), &HarnessConfig::modern(), runner.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!result.success());
    assert!(result.projects[0].passed());
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.project, "beta");
    assert_eq!(failure.stage, Stage::NativeLink);
    assert_eq!(runner.count_matching("cargo test"), 1, "beta must not test alpha's module");
    assert!(!module.exists());
}

/// Test: an archive from an earlier run does not hide naming drift.
#[tokio::test]
async fn test_stale_archive_does_not_hide_naming_drift() {
    let base = base_with_projects(&["foo-bar"]);
    let profile_dir = base.path().join(ARCHIVE_DIR);
    let stale = profile_dir.join("libfoo_bar_tests.a");
    std::fs::create_dir_all(&profile_dir).unwrap();
    std::fs::write(&stale, b"!<arch>\nold").unwrap();

    let runner = Arc::new(
        RecordingRunner::new()
            .producing("xbuild", profile_dir.join("libfoo-bar_tests.a"))
            .producing("make", base.path().join("testmodule.ko")),
    );
    let result = Pipeline::new(base.path(), &HarnessConfig::modern(), runner.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!result.success());
    let failure = result.first_failure().unwrap();
    assert_eq!(failure.stage, Stage::CrossCompile);
    assert!(failure.message.contains("libfoo_bar_tests.a"));
    assert!(!stale.exists());
    assert_eq!(runner.count_matching("make"), 0);
}

/// Test: two runs over an unchanged tree issue the same commands.
#[tokio::test]
async fn test_pipeline_is_idempotent() {
    let names = ["chrdev", "foo-bar", "sysctl"];
    let base = base_with_projects(&names);
    let runner = Arc::new(toolchain_for(base.path(), &names));
    let pipeline = Pipeline::new(base.path(), &HarnessConfig::modern(), runner.clone()).unwrap();

    let first = pipeline.run().await.unwrap();
    let first_lines = runner.command_lines();
    let second = pipeline.run().await.unwrap();
    let all_lines = runner.command_lines();

    assert!(first.success() && second.success());
    assert_eq!(first.exit_code(), second.exit_code());
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(&all_lines[first_lines.len()..], first_lines.as_slice());

    let digests = |r: &kmtest_ci::PipelineResult| -> Vec<Option<String>> {
        r.projects
            .iter()
            .flat_map(|p| p.stages.iter().map(|s| s.artifact_digest.clone()))
            .collect()
    };
    assert_eq!(digests(&first), digests(&second));
}

/// Test: legacy generation end-to-end with a discovered archive name.
#[tokio::test]
async fn test_legacy_generation() {
    let base = tempfile::tempdir().unwrap();
    let dir = base.path().join("hello-world");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("tests.rs"), b"#[test] fn t() {}").unwrap();

    let archive = dir.join(ARCHIVE_DIR).join("libhello_world.a");
    let runner = Arc::new(
        RecordingRunner::new()
            .producing("xbuild", &archive)
            .producing("make", base.path().join("testmodule.ko")),
    );

    let result = Pipeline::new(base.path(), &HarnessConfig::legacy(), runner.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(result.success());
    let lines = runner.command_lines();
    assert_eq!(lines.len(), 4, "xbuild, make, rustc, test binary");
    assert_eq!(
        lines[1],
        format!("make -C {} TEST_LIBRARY={}", base.path().display(), archive.display())
    );
    assert!(lines[2].starts_with("rustc --test"));
    assert!(lines[3].ends_with(SINGLE_THREAD_FLAG));
}

/// Test: real child processes driven by stand-in toolchain scripts.
#[cfg(unix)]
#[tokio::test]
async fn test_real_processes_with_stub_toolchain() {
    let base = base_with_projects(&["foo-bar"]);
    let tools = tempfile::tempdir().unwrap();

    let xbuild = tools.path().join("xbuild.sh");
    std::fs::write(
        &xbuild,
        r#"name=$(basename "$PWD" | tr - _)
out="$CARGO_TARGET_DIR/$2/debug"
mkdir -p "$out" && printf 'archive' > "$out/lib${name}_tests.a"
"#,
    )
    .unwrap();
    let make = tools.path().join("make.sh");
    std::fs::write(&make, "printf 'module' > \"$2/testmodule.ko\"\n").unwrap();
    let test = tools.path().join("test.sh");
    std::fs::write(
        &test,
        r#"test -f "$KERNEL_MODULE" && [ "$RUST_TEST_THREADS" = 1 ] && [ "$2" = "--test-threads=1" ]"#,
    )
    .unwrap();

    let sh = |script: &Path| vec!["sh".to_string(), script.display().to_string()];
    let mut config = HarnessConfig::modern();
    config.cross_compiler = sh(&xbuild);
    config.native_build_tool = sh(&make);
    config.test_command = sh(&test);
    config.stage_timeout_secs = 30;

    let runner = Arc::new(ProcessRunner::new().with_timeout(config.stage_timeout()));
    let result = Pipeline::new(base.path(), &config, runner)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(result.success(), "{:?}", result.first_failure());
    assert!(base
        .path()
        .join(ARCHIVE_DIR)
        .join("libfoo_bar_tests.a")
        .is_file());
}
