use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use super::*;

fn jwt(payload: &str) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

#[test]
fn bare_channel_keeps_the_default_domain() {
    let info = extract_endpoint_info("acme").expect("endpoint info");
    assert_eq!(info.channel_id, "acme");
    assert_eq!(info.domain, None);
}

#[test]
fn hint_with_a_dot_is_a_custom_host() {
    let info = extract_endpoint_info("chat.example.com/acme").expect("endpoint info");
    assert_eq!(info.channel_id, "acme");
    assert_eq!(info.domain, Some(NetworkingDomain::Custom("chat.example.com".into())));
}

#[test]
fn hint_without_a_dot_is_a_sandbox() {
    let info = extract_endpoint_info("p2/acme").expect("endpoint info");
    assert_eq!(info.domain, Some(NetworkingDomain::Sandbox("p2".into())));
}

#[test]
fn single_segment_is_both_hint_and_channel() {
    let info = extract_endpoint_info("/acme").expect("endpoint info");
    assert_eq!(info.channel_id, "acme");
    assert_eq!(info.domain, Some(NetworkingDomain::Sandbox("acme".into())));

    let info = extract_endpoint_info("sandbox/").expect("endpoint info");
    assert_eq!(info.channel_id, "sandbox");
    assert_eq!(info.domain, Some(NetworkingDomain::Sandbox("sandbox".into())));
}

#[test]
fn empty_channel_yields_nothing() {
    assert_eq!(extract_endpoint_info(""), None);
    assert_eq!(extract_endpoint_info("/"), None);
    assert_eq!(extract_endpoint_info("//"), None);
}

#[test]
fn namespace_prefers_the_jwt_id() {
    let identity = UserIdentity::from_token(jwt(r#"{"id":"user-7"}"#));
    assert_eq!(
        construct_personal_namespace("acme", &identity),
        "channel(acme):userjwt(user-7)"
    );
}

#[test]
fn namespace_falls_back_to_the_raw_token() {
    let identity = UserIdentity::from_token("usertoken123");
    assert_eq!(
        construct_personal_namespace("acme", &identity),
        "channel(acme):usertmp(usertoken123)"
    );
}
