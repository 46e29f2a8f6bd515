use std::fs;
use std::path::Path;

use assert_cmd::Command;
use lib::testing::redact_timings;
use tempfile::TempDir;

fn patchwork_ci(dir: &Path) -> eyre::Result<Command> {
    let mut command = Command::cargo_bin("patchwork-ci")?;
    command
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("PWCI_DRY_RUN")
        .env_remove("PWCI_SOURCE_DIR")
        .env_remove("PWCI_MOCK_APIS")
        .arg("--color")
        .arg("never");
    Ok(command)
}

fn make_ci_dir(config: serde_json::Value) -> eyre::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    fs::create_dir(dir.path().join("scripts"))?;
    fs::create_dir(dir.path().join("src"))?;
    fs::write(dir.path().join("scripts").join("build.sh"), "echo built\n")?;
    fs::write(
        dir.path().join("scripts").join("style.sh"),
        "echo 'line too long' 1>&2\nexit 250\n",
    )?;
    fs::write(
        dir.path().join("scripts").join("selftest.sh"),
        "echo 'selftest failed' 1>&2\nexit 1\n",
    )?;
    fs::write(
        dir.path().join(".patchwork-ci.json"),
        serde_json::to_string_pretty(&config)?,
    )?;
    Ok(dir)
}

fn default_tests() -> serde_json::Value {
    serde_json::json!([
        { "name": "build", "description": "Build", "script": "build.sh" },
        { "name": "style", "description": "Coding style", "script": "style.sh" },
        { "name": "selftest", "description": "Self tests", "script": "selftest.sh" },
    ])
}

fn stdout_of(output: &std::process::Output) -> String {
    redact_timings(&String::from_utf8_lossy(&output.stdout))
}

#[test]
fn test_series_id() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;

    let output = patchwork_ci(dir.path())?
        .args(["series-id", "[PW_SID:12345] some subject"])
        .output()?;
    assert!(output.status.success());
    insta::assert_snapshot!(stdout_of(&output), @"12345");

    let output = patchwork_ci(dir.path())?
        .args(["series-id", "no prefix here"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("Could not find a series ID in the pull request title: \"no prefix here\""));
    Ok(())
}

#[test]
fn test_list() -> eyre::Result<()> {
    let dir = make_ci_dir(serde_json::json!({
        "source_dir": "src",
        "tests": [
            { "name": "build", "description": "Build", "script": "build.sh" },
            { "name": "docs", "description": "Docs", "script": "docs.sh" },
        ],
    }))?;

    let output = patchwork_ci(dir.path())?.arg("list").output()?;
    assert!(output.status.success());
    let scripts_dir = dir.path().join("scripts");
    let stdout = stdout_of(&output).replace(&scripts_dir.display().to_string(), "<scripts>");
    insta::assert_snapshot!(stdout, @r###"
    - build: Build [<scripts>/build.sh]
    - docs: Docs [<scripts>/docs.sh (missing)]
    "###);
    Ok(())
}

#[test]
fn test_missing_config() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    let output = patchwork_ci(dir.path())?.arg("list").output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("could not read config file"));
    Ok(())
}

#[test]
fn test_dry_run() -> eyre::Result<()> {
    let dir = make_ci_dir(serde_json::json!({
        "source_dir": "src",
        "tests": default_tests(),
    }))?;

    let output = patchwork_ci(dir.path())?
        .args([
            "run",
            "--pr-title",
            "[PW_SID:77] net: fix a thing",
            "--patch",
            "5",
            "--pr",
            "9",
            "--dry-run",
        ])
        .output()?;
    assert_eq!(output.status.code(), Some(1));

    let stdout = stdout_of(&output);
    let interesting = stdout
        .lines()
        .filter(|line| !line.contains("pwci: running command:"))
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!(interesting, @r###"
    Testing series 77 patch 5
    build: | built
    build: pwci: command exited with code 0 after <time>
    build: pwci: dry run: would post check build=success(1) for series 77 patch 5: Build: PASS
    style: pwci: command exited with code 250 after <time>
    style: pwci: dry run: would upload artifact pw77-p5-style-WARNING (15 bytes)
    style: pwci: dry run: would post check style=warning(2) for series 77 patch 5: Coding style: WARNING
    selftest: pwci: command exited with code 1 after <time>
    selftest: pwci: dry run: would upload artifact pw77-p5-selftest-FAIL (17 bytes)
    selftest: pwci: dry run: would post check selftest=fail(3) for series 77 patch 5: Self tests: ERROR
    Results for series 77 patch 5:
    ✓ build (PASS) in <time>
    ! style (WARNING) in <time>
    X selftest (ERROR) in <time>
    1 passed, 1 warnings, 1 failed, 0 skipped
    pwci: dry run: would comment on pull request #9
    "###);
    Ok(())
}

#[test]
fn test_only_warnings_exit_successfully() -> eyre::Result<()> {
    let dir = make_ci_dir(serde_json::json!({
        "source_dir": "src",
        "dry_run": true,
        "tests": default_tests(),
    }))?;

    let output = patchwork_ci(dir.path())?
        .args(["run", "-s", "77", "-p", "5", "-p", "6", "--only", "build", "--only", "style"])
        .output()?;
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Results for series 77 patch 6:"));
    assert!(!stdout.contains("selftest"));
    Ok(())
}

#[test]
fn test_run_argument_errors() -> eyre::Result<()> {
    let dir = make_ci_dir(serde_json::json!({
        "source_dir": "src",
        "tests": default_tests(),
    }))?;

    let output = patchwork_ci(dir.path())?
        .args(["run", "-p", "5", "--dry-run"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("A series is required: pass --series or --pr-title"));

    let output = patchwork_ci(dir.path())?
        .args(["run", "-s", "1", "-p", "5", "--only", "lint", "--dry-run"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown test: lint"));

    let output = patchwork_ci(dir.path())?
        .args(["run", "-s", "1", "-p", "5", "-p", "6", "-w", "a", "-w", "b", "-w", "c", "-n"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("Got 3 worktrees for 2 patches; pass one worktree, or one per patch"));

    // Without --dry-run, the services must be configured.
    let output = patchwork_ci(dir.path())?
        .args(["run", "-s", "1", "-p", "5"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No \"patchwork\" section"));
    Ok(())
}

#[test]
fn test_run_with_mocked_services() -> eyre::Result<()> {
    let dir = make_ci_dir(serde_json::json!({
        "source_dir": "src",
        "patchwork": { "url": "https://patchwork.example.org" },
        "github": { "repo": "example/linux" },
        "tests": default_tests(),
    }))?;

    let output = patchwork_ci(dir.path())?
        .env("PWCI_MOCK_APIS", "1")
        .args(["run", "-s", "77", "-p", "5", "--pr", "9", "--only", "selftest"])
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout_of(&output);
    let mock_lines = stdout
        .lines()
        .filter(|line| line.contains("pwci: mock:"))
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!(mock_lines, @r###"
    pwci: mock: gh gist create --desc "selftest FAIL for series 77 patch 5" pw77-p5-selftest-FAIL (17 bytes) -> https://gist.github.com/mock/pw77-p5-selftest-FAIL
    pwci: mock: POST https://patchwork.example.org/api/patches/5/checks/ {"state":"fail","context":"selftest","description":"Self tests: ERROR","target_url":"https://gist.github.com/mock/pw77-p5-selftest-FAIL"}
    pwci: mock: gh pr comment 9 --repo example/linux
    "###);
    Ok(())
}
