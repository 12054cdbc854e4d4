use std::collections::HashMap;

use shell_gateway::config::{ShellConfig, ShellProgram};
use shell_gateway::models::session::ShellVariant;
use shell_gateway::shell::launcher::{launch, resolve_shell, ShellCommand};
use shell_gateway::AppError;

fn config_with_override() -> ShellConfig {
    let mut programs = HashMap::new();
    programs.insert(
        "bash".to_owned(),
        ShellProgram {
            program: "/opt/bash".into(),
            args: vec!["--login".into()],
        },
    );
    ShellConfig {
        programs,
        ..ShellConfig::default()
    }
}

#[test]
fn config_override_wins_over_builtin() {
    let command = resolve_shell(Some("BASH"), &config_with_override());
    assert_eq!(command.variant, Some(ShellVariant::Bash));
    assert_eq!(command.program, "/opt/bash");
    assert_eq!(command.args, vec!["--login"]);
}

#[test]
fn override_applies_to_unrecognized_names() {
    let mut config = ShellConfig::default();
    config.programs.insert(
        "fish".to_owned(),
        ShellProgram {
            program: "fish".into(),
            args: Vec::new(),
        },
    );

    let command = resolve_shell(Some("fish"), &config);
    assert_eq!(command.variant, None);
    assert_eq!(command.program, "fish");
}

#[test]
fn absent_request_uses_default_variant() {
    let config = ShellConfig {
        default_variant: "bash".into(),
        ..config_with_override()
    };
    let command = resolve_shell(None, &config);
    assert_eq!(command.program, "/opt/bash");

    let blank = resolve_shell(Some("   "), &config);
    assert_eq!(blank, command);
}

#[cfg(unix)]
#[test]
fn unix_variants_map_to_interactive_shells() {
    let config = ShellConfig::default();

    let bash = resolve_shell(Some("bash"), &config);
    assert_eq!(bash.program, "bash");
    assert_eq!(bash.args, vec!["-i", "+m"]);

    let pwsh = resolve_shell(Some("powershell"), &config);
    assert_eq!(pwsh.program, "pwsh");
}

#[cfg(unix)]
#[test]
fn cmd_and_unknown_fall_back_to_sh_on_unix() {
    let config = ShellConfig::default();
    let expected = ShellCommand {
        variant: None,
        program: "sh".into(),
        args: vec!["-i".into(), "+m".into()],
    };

    assert_eq!(resolve_shell(Some("cmd"), &config), expected);
    assert_eq!(resolve_shell(Some("fish"), &config), expected);
    assert_eq!(resolve_shell(None, &config), expected);
}

#[cfg(windows)]
#[test]
fn windows_variants_map_to_console_programs() {
    let config = ShellConfig::default();
    assert_eq!(resolve_shell(Some("cmd"), &config).program, "cmd.exe");
    assert_eq!(resolve_shell(Some("ps"), &config).program, "powershell.exe");
    assert_eq!(resolve_shell(Some("pwsh"), &config).program, "pwsh.exe");
    assert_eq!(resolve_shell(Some("fish"), &config).program, "cmd.exe");
}

#[tokio::test]
async fn missing_working_directory_fails_launch() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let command = resolve_shell(None, &ShellConfig::default());

    let err = launch(&command, missing.to_str()).expect_err("directory must exist");
    assert!(matches!(err, AppError::LaunchFailed(msg) if msg.contains("does-not-exist")));
}

#[tokio::test]
async fn file_as_working_directory_fails_launch() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let command = resolve_shell(None, &ShellConfig::default());

    let err = launch(&command, file.path().to_str()).expect_err("not a directory");
    assert!(matches!(err, AppError::LaunchFailed(_)));
}

#[tokio::test]
async fn missing_binary_fails_launch() {
    let command = ShellCommand {
        variant: None,
        program: "definitely-not-a-shell-binary".into(),
        args: Vec::new(),
    };

    let err = launch(&command, None).expect_err("binary missing");
    assert!(matches!(err, AppError::LaunchFailed(msg) if msg.contains("definitely-not-a-shell-binary")));
}

#[cfg(unix)]
#[tokio::test]
async fn launches_in_requested_directory() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let dir = tempfile::tempdir().unwrap();
    let command = ShellCommand {
        variant: Some(ShellVariant::Sh),
        program: "sh".into(),
        args: Vec::new(),
    };

    let mut shell = launch(&command, dir.path().to_str()).unwrap();
    assert!(shell.pid > 0);

    shell.stdin.write_all(b"pwd\nexit\n").await.unwrap();
    shell.stdin.flush().await.unwrap();

    let mut out = String::new();
    shell.stdout.read_to_string(&mut out).await.unwrap();
    let expected = dir.path().canonicalize().unwrap();
    let reported = std::path::Path::new(out.trim()).canonicalize().unwrap();
    assert_eq!(reported, expected);

    let status = shell.child.wait().await.unwrap();
    assert!(status.success());
}
