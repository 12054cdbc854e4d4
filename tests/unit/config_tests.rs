use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use shell_gateway::{config::GlobalConfig, AppError};

const DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn sample_toml() -> String {
    format!(
        r#"
bind_address = "0.0.0.0"
http_port = 9090

[shell]
default_variant = "Bash"
encoding = "gbk"
chunk_size = 4096

[shell.programs.Bash]
program = "/usr/local/bin/bash"
args = ["--noprofile", "-i"]

[interrupt]
settle_delay_ms = 10

[session]
pump_shutdown_ms = 500

[[auth.tokens]]
user = "alice"
token_sha256 = "{digest}"
"#,
        digest = DIGEST.to_ascii_uppercase(),
    )
}

fn minimal_toml() -> String {
    format!(
        r#"
[[auth.tokens]]
user = "alice"
token_sha256 = "{DIGEST}"
"#
    )
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");

    assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(config.http_port, 9090);
    assert_eq!(config.shell.encoding.as_deref(), Some("gbk"));
    assert_eq!(config.shell.chunk_size, 4096);
    assert_eq!(config.settle_delay(), Duration::from_millis(10));
    assert_eq!(config.pump_shutdown_timeout(), Duration::from_millis(500));
    assert_eq!(config.bind_addr().port(), 9090);
}

#[test]
fn variant_names_are_lowercased() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");

    assert_eq!(config.shell.default_variant, "bash");
    let program = config.shell.programs.get("bash").expect("override present");
    assert_eq!(program.program, "/usr/local/bin/bash");
    assert_eq!(program.args, vec!["--noprofile", "-i"]);
}

#[test]
fn token_digests_are_normalized() {
    let config = GlobalConfig::from_toml_str(&sample_toml()).expect("valid config");
    assert_eq!(config.auth.tokens[0].token_sha256, DIGEST);
}

#[test]
fn defaults_apply_to_minimal_config() {
    let config = GlobalConfig::from_toml_str(&minimal_toml()).expect("valid config");

    assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(config.http_port, 8080);
    assert_eq!(config.shell.default_variant, "cmd");
    assert_eq!(config.shell.chunk_size, 1024);
    assert!(config.shell.encoding.is_none());
    assert!(config.shell.programs.is_empty());
    assert_eq!(config.settle_delay(), Duration::from_millis(50));
    assert_eq!(config.pump_shutdown_timeout(), Duration::from_millis(2000));
}

#[test]
fn zero_chunk_size_is_rejected() {
    let raw = format!("[shell]\nchunk_size = 0\n{}", minimal_toml());
    let err = GlobalConfig::from_toml_str(&raw).expect_err("chunk size must be positive");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("chunk_size")));
}

#[test]
fn unknown_encoding_is_rejected() {
    let raw = format!("[shell]\nencoding = \"klingon\"\n{}", minimal_toml());
    let err = GlobalConfig::from_toml_str(&raw).expect_err("unknown encoding");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("klingon")));
}

#[test]
fn empty_program_override_is_rejected() {
    let raw = format!(
        "[shell.programs.zsh]\nprogram = \"  \"\n{}",
        minimal_toml()
    );
    let err = GlobalConfig::from_toml_str(&raw).expect_err("empty program");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("zsh")));
}

#[test]
fn missing_auth_section_is_rejected() {
    let err = GlobalConfig::from_toml_str("http_port = 1").expect_err("auth is required");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn empty_token_list_is_rejected() {
    let err = GlobalConfig::from_toml_str("[auth]\ntokens = []\n").expect_err("no tokens");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("auth.tokens")));
}

#[test]
fn plaintext_token_is_rejected() {
    let raw = r#"
[[auth.tokens]]
user = "bob"
token_sha256 = "hunter2"
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("not a digest");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("bob")));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, minimal_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load config");
    assert_eq!(config.auth.tokens.len(), 1);
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(msg) if msg.contains("failed to read config")));
}
