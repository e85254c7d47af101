use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fieldcrypt::{Context, Crypt, Endpoint, ErrorKind, Kek};

fn azure_context() -> Context {
    let crypt = Crypt::builder().azure_credentials("tok").build().unwrap();
    crypt
        .create_data_key_context(
            Kek::Azure {
                key_vault_endpoint: Endpoint::parse("example.vault.azure.net").unwrap(),
                key_name: "k1".into(),
                key_version: None,
            },
            vec![],
        )
        .unwrap()
}

fn ok_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

#[test]
fn response_parses_across_arbitrary_chunk_splits() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    assert!(!kms.message().is_empty());
    assert!(kms.message().is_empty()); // one-shot

    let body = format!("{{\"value\":\"{}\"}}", URL_SAFE_NO_PAD.encode([7u8; 16]));
    let response = ok_response(&body);
    let bytes = response.as_bytes();

    // before any headers the hint is a generic default
    assert!(kms.bytes_needed() > 0);

    // split inside the status line, inside the headers, inside the body
    let cuts = [3usize, 40, response.len() - 5];
    let mut start = 0;
    for cut in cuts {
        kms.feed(&bytes[start..cut]).unwrap();
        assert!(kms.bytes_needed() > 0);
        start = cut;
    }
    // once headers are in, the hint is exact
    let remaining = bytes.len() - start;
    assert_eq!(kms.bytes_needed(), remaining);
    kms.feed(&bytes[start..]).unwrap();
    assert_eq!(kms.bytes_needed(), 0);
    assert!(kms.status().is_ok());

    ctx.kms_done().unwrap();
}

#[test]
fn http_error_status_is_a_kms_error() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    kms.message();
    let body = "{\"error\":{\"message\":\"forbidden\"}}";
    let response = format!(
        "HTTP/1.1 403 Forbidden\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let err = kms.feed(response.as_bytes()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Kms);
    assert!(err.message.contains("HTTP 403"));
    assert!(err.message.contains("forbidden"));
    assert!(!kms.status().is_ok());
}

#[test]
fn non_http_garbage_is_rejected() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    kms.message();
    let err = kms
        .feed(b"SSH-2.0-OpenSSH_9.6\r\n\r\nmore\r\n\r\n")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Kms);
}

#[test]
fn missing_content_length_is_rejected() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    kms.message();
    let err = kms
        .feed(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{}")
        .unwrap_err();
    assert!(err.message.contains("Content-Length"));
}

#[test]
fn malformed_body_is_rejected() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    kms.message();
    let err = kms.feed(ok_response("not json").as_bytes()).unwrap_err();
    assert!(err.message.contains("JSON"));

    let mut ctx2 = azure_context();
    let kms2 = ctx2.next_kms_ctx().unwrap();
    kms2.message();
    let err2 = kms2
        .feed(ok_response("{\"unexpected\":true}").as_bytes())
        .unwrap_err();
    assert!(err2.message.contains("\"value\""));

    let mut ctx3 = azure_context();
    let kms3 = ctx3.next_kms_ctx().unwrap();
    kms3.message();
    let err3 = kms3
        .feed(ok_response("{\"value\":\"@@@not-base64@@@\"}").as_bytes())
        .unwrap_err();
    assert!(err3.message.contains("base64"));
}

#[test]
fn feeding_a_complete_exchange_is_rejected() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    kms.message();
    let body = format!("{{\"value\":\"{}\"}}", URL_SAFE_NO_PAD.encode([1u8; 8]));
    kms.feed(ok_response(&body).as_bytes()).unwrap();
    let err = kms.feed(b"extra").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Client);
    assert!(err.message.contains("already complete"));
}

#[test]
fn caller_surfaced_failure_has_network_kind() {
    let mut ctx = azure_context();
    let kms = ctx.next_kms_ctx().unwrap();
    kms.fail("TLS handshake timed out");
    assert_eq!(kms.bytes_needed(), 0);
    let status = kms.status();
    assert_eq!(status.error().unwrap().kind, ErrorKind::Network);
    // feeding after a failure keeps returning the original failure
    let err = kms.feed(b"HTTP/1.1 200 OK\r\n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
}
