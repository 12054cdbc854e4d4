use shell_gateway::auth::{bearer_token, token_digest, Authenticator, StaticTokenAuthenticator};
use shell_gateway::config::{AuthConfig, TokenEntry};
use shell_gateway::AppError;

fn authenticator() -> StaticTokenAuthenticator {
    StaticTokenAuthenticator::from_config(&AuthConfig {
        tokens: vec![
            TokenEntry {
                user: "alice".into(),
                token_sha256: token_digest("alice-secret"),
            },
            TokenEntry {
                user: "bob".into(),
                token_sha256: token_digest("bob-secret"),
            },
        ],
    })
}

#[test]
fn known_token_resolves_identity() {
    let identity = authenticator()
        .validate_and_identify("bob-secret")
        .expect("bob is known");
    assert_eq!(identity.user, "bob");
}

#[test]
fn surrounding_whitespace_is_ignored() {
    let identity = authenticator()
        .validate_and_identify("  alice-secret\n")
        .expect("trimmed token accepted");
    assert_eq!(identity.user, "alice");
}

#[test]
fn empty_token_is_unauthorized() {
    let err = authenticator().validate_and_identify("   ").expect_err("empty");
    assert!(matches!(err, AppError::Unauthorized(msg) if msg == "missing token"));
}

#[test]
fn control_characters_are_malformed() {
    let err = authenticator()
        .validate_and_identify("alice\u{0}secret")
        .expect_err("malformed");
    assert!(matches!(err, AppError::Unauthorized(msg) if msg == "malformed token"));
}

#[test]
fn unknown_token_is_rejected() {
    let err = authenticator()
        .validate_and_identify("mallory")
        .expect_err("unknown");
    assert!(matches!(err, AppError::Unauthorized(msg) if msg == "token rejected"));
}

#[test]
fn digest_is_lowercase_hex() {
    let digest = token_digest("anything");
    assert_eq!(digest.len(), 64);
    assert!(digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
}

#[test]
fn bearer_header_is_parsed() {
    assert_eq!(bearer_token("Bearer abc123"), Some("abc123"));
    assert_eq!(bearer_token("  bearer   abc123 "), Some("abc123"));
    assert_eq!(bearer_token("Basic dXNlcg=="), None);
    assert_eq!(bearer_token("Bearer "), None);
    assert_eq!(bearer_token("abc123"), None);
}
