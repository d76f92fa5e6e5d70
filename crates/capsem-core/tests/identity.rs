//! Identity derivation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashSet;

use capsem_core::identity::{derive_user_id, Credential};

#[test]
fn derivation_is_deterministic_and_fixed_length() {
    let a = derive_user_id("sk-test-123");
    let b = derive_user_id("sk-test-123");
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 32);
    assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!a.as_str().contains("sk-test"));
}

#[test]
fn distinct_credentials_do_not_collide() {
    let ids: HashSet<String> = (0..500)
        .map(|i| derive_user_id(&format!("key-{i}")).to_string())
        .collect();
    assert_eq!(ids.len(), 500);
}

#[test]
fn bearer_header_parsing() {
    let c = Credential::from_bearer("Bearer sk-abc").unwrap();
    assert_eq!(c.expose(), "sk-abc");
    assert_eq!(c.user_id(), derive_user_id("sk-abc"));

    assert_eq!(Credential::from_bearer("sk-raw").unwrap().expose(), "sk-raw");
    assert!(Credential::from_bearer("Bearer ").is_none());
    assert!(Credential::from_bearer("").is_none());
}

#[test]
fn debug_output_is_redacted() {
    let c = Credential::new("super-secret");
    assert!(!format!("{c:?}").contains("super-secret"));
}
