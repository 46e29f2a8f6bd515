#![cfg(unix)]

use std::ffi::OsString;
use std::time::{Duration, Instant};

use maplit::hashmap;
use pwci::process::{ProcessError, ProcessRunInfo, ProcessRunOpts, TIMED_OUT_EXIT_CODE};
use pwci::testing::{CapturedEffects, ScriptDir};

fn make_run_info(dir: &ScriptDir) -> ProcessRunInfo {
    ProcessRunInfo::from_current_env(dir.worktree(), None)
}

#[test]
fn test_captures_stdout_and_stderr() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let script = dir.write_script(
        "both.sh",
        "echo out1\necho err1 1>&2\necho out2\nexit 3\n",
    )?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects,
        &["bash".into(), script.into_os_string()],
        &ProcessRunOpts::default(),
    )?;

    assert_eq!(result.exit_code, 3);
    assert!(!result.is_success());
    assert!(!result.timed_out);
    assert_eq!(result.stdout, "out1\nout2\n");
    assert_eq!(result.stderr, "\nerr1\n");
    assert_eq!(result.combined_output(), "out1\nout2\n\nerr1\n");
    assert!(result.elapsed_seconds() >= 0.0);

    let stdout = captured.stdout();
    assert!(stdout.starts_with("pwci: running command: bash "), "{stdout}");
    assert!(stdout.contains("| out1\n| out2\n"), "{stdout}");
    assert!(!stdout.contains("err1"), "{stdout}");
    assert!(
        stdout.ends_with("pwci: command exited with code 3 after <time>\n"),
        "{stdout}"
    );
    Ok(())
}

#[test]
fn test_runs_in_working_directory_override() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &["pwd"],
        &ProcessRunOpts {
            working_directory: Some(dir.scripts_dir()),
            ..Default::default()
        },
    )?;

    let expected = std::fs::canonicalize(dir.scripts_dir())?;
    let actual = std::fs::canonicalize(result.stdout.trim_end())?;
    assert_eq!(actual, expected);
    Ok(())
}

#[test]
fn test_env_overlay() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let captured = CapturedEffects::new();
    let mut run_info = make_run_info(&dir);
    run_info
        .env
        .insert(OsString::from("PWCI_BASE"), OsString::from("base"));

    let result = run_info.run(
        &captured.effects.suppress(),
        &["bash", "-c", "echo \"$PWCI_BASE $PWCI_OVERLAY\""],
        &ProcessRunOpts {
            env: hashmap! {
                OsString::from("PWCI_OVERLAY") => OsString::from("overlay"),
            },
            ..Default::default()
        },
    )?;

    assert_eq!(result.stdout, "base overlay\n");
    Ok(())
}

#[test]
fn test_spawn_failure_is_an_error() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &["/nonexistent/definitely-not-a-program"],
        &ProcessRunOpts::default(),
    );

    assert!(matches!(result, Err(ProcessError::Spawn { .. })), "{result:?}");
    Ok(())
}

#[test]
fn test_empty_command() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let captured = CapturedEffects::new();
    let args: &[&str] = &[];

    let result = make_run_info(&dir).run(&captured.effects, args, &ProcessRunOpts::default());

    assert!(matches!(result, Err(ProcessError::EmptyCommand)));
    Ok(())
}

#[test]
fn test_timeout_kills_process_tree() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let script = dir.write_script(
        "hang.sh",
        "echo started\nsleep 30 &\nsleep 30\necho unreachable\n",
    )?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &["bash".into(), script.into_os_string()],
        &ProcessRunOpts {
            timeout: Some(Duration::from_millis(300)),
            ..Default::default()
        },
    )?;

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMED_OUT_EXIT_CODE);
    assert_eq!(result.stdout, "started\n");
    assert!(result.stderr.contains("killed after exceeding timeout"));
    assert!(result.elapsed < Duration::from_secs(10));
    Ok(())
}

#[test]
fn test_background_job_does_not_outlive_timeout() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let script = dir.write_script("detach.sh", "sleep 30 &\necho done\nexit 0\n")?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &["bash".into(), script.into_os_string()],
        &ProcessRunOpts {
            timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        },
    )?;

    assert!(!result.timed_out);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "done\n");
    assert!(result.elapsed < Duration::from_secs(10), "{result:?}");
    Ok(())
}

#[test]
fn test_background_job_is_killed_without_timeout() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let script = dir.write_script(
        "detach.sh",
        "(sleep 30; echo late) &\necho early 1>&2\nexit 4\n",
    )?;
    let captured = CapturedEffects::new();

    let started = Instant::now();
    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &["bash".into(), script.into_os_string()],
        &ProcessRunOpts::default(),
    )?;

    assert!(started.elapsed() < Duration::from_secs(10), "{result:?}");
    assert!(result.elapsed <= started.elapsed());
    assert_eq!(result.exit_code, 4);
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr, "\nearly\n");
    Ok(())
}

#[test]
fn test_killed_by_signal_reports_shell_convention() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &["bash", "-c", "kill -TERM $$"],
        &ProcessRunOpts::default(),
    )?;

    assert_eq!(result.exit_code, 128 + 15);
    assert!(!result.timed_out);
    Ok(())
}

#[test]
fn test_large_output_does_not_deadlock() -> eyre::Result<()> {
    let dir = ScriptDir::new()?;
    let captured = CapturedEffects::new();

    let result = make_run_info(&dir).run(
        &captured.effects.suppress(),
        &[
            "bash",
            "-c",
            "for i in $(seq 1 20000); do echo \"line $i\"; echo \"err $i\" 1>&2; done",
        ],
        &ProcessRunOpts {
            timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        },
    )?;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.lines().count(), 20000);
    assert_eq!(result.stderr.lines().filter(|line| !line.is_empty()).count(), 20000);
    Ok(())
}
