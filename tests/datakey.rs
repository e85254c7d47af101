use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bson::{Bson, Document};
use fieldcrypt::{kms_local, Aead, Aes256Gcm, Crypt, Endpoint, ErrorKind, Kek, State};

const MASTER: [u8; 32] = [5u8; 32];

fn local_crypt() -> Crypt {
    Crypt::builder()
        .local_master_key(MASTER.to_vec())
        .build()
        .unwrap()
}

fn azure_kek() -> Kek {
    Kek::Azure {
        key_vault_endpoint: Endpoint::parse("example.vault.azure.net").unwrap(),
        key_name: "payments".into(),
        key_version: None,
    }
}

#[test]
fn local_data_key_document_is_complete() {
    let crypt = local_crypt();
    let mut ctx = crypt
        .create_data_key_context(Kek::Local, vec!["alpha".into(), "beta".into()])
        .unwrap();
    assert_eq!(ctx.state(), State::NeedKms);
    assert!(ctx.next_kms_ctx().is_none());
    ctx.kms_done().unwrap();
    let key_doc: Document = ctx.finalize().unwrap();
    assert_eq!(ctx.state(), State::Done);

    assert!(matches!(key_doc.get("_id"), Some(Bson::Binary(_))));
    assert!(matches!(key_doc.get("creationDate"), Some(Bson::DateTime(_))));
    assert!(matches!(key_doc.get("updateDate"), Some(Bson::DateTime(_))));
    assert_eq!(key_doc.get_i32("status").unwrap(), 0);
    assert_eq!(key_doc.get_i64("version").unwrap(), 0);
    assert_eq!(
        key_doc.get_document("masterKey").unwrap().get_str("provider").unwrap(),
        "local"
    );
    let names = key_doc.get_array("keyAltNames").unwrap();
    assert_eq!(names.len(), 2);

    // the wrapped material opens under the master key into a full-size DEK
    let crypto: Arc<dyn Aead> = Arc::new(Aes256Gcm::new());
    let Some(Bson::Binary(material)) = key_doc.get("keyMaterial") else {
        panic!("keyMaterial missing");
    };
    let dek = kms_local::unwrap(&crypto, &MASTER, &material.bytes).unwrap();
    assert_eq!(dek.len(), 32);
}

#[test]
fn duplicate_alt_names_are_rejected() {
    let crypt = local_crypt();
    let err = crypt
        .create_data_key_context(Kek::Local, vec!["a".into(), "a".into()])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Client);
    assert!(err.message.contains("duplicate"));
}

#[test]
fn unconfigured_provider_is_rejected() {
    let crypt = local_crypt();
    let err = crypt
        .create_data_key_context(
            Kek::Aws {
                region: "us-east-1".into(),
                cmk: "arn".into(),
                endpoint: None,
            },
            vec![],
        )
        .unwrap_err();
    assert!(err.message.contains("no credentials configured"));
    assert!(err.message.contains("aws"));
}

#[test]
fn azure_data_key_wraps_through_kms() {
    let crypt = Crypt::builder().azure_credentials("tok123").build().unwrap();
    let mut ctx = crypt.create_data_key_context(azure_kek(), vec![]).unwrap();
    assert_eq!(ctx.state(), State::NeedKms);

    let wrapped = vec![0xCD; 48];
    {
        let kms = ctx.next_kms_ctx().unwrap();
        assert_eq!(kms.endpoint(), "example.vault.azure.net:443");
        let msg = String::from_utf8(kms.message()).unwrap();
        assert!(msg.contains("/keys/payments/wrapkey?api-version=7.1"));
        assert!(msg.contains("Authorization: Bearer tok123"));

        let body = format!("{{\"value\":\"{}\"}}", URL_SAFE_NO_PAD.encode(&wrapped));
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        kms.feed(response.as_bytes()).unwrap();
    }
    assert!(ctx.next_kms_ctx().is_none());
    ctx.kms_done().unwrap();
    let key_doc = ctx.finalize().unwrap();
    let Some(Bson::Binary(material)) = key_doc.get("keyMaterial") else {
        panic!("keyMaterial missing");
    };
    assert_eq!(material.bytes, wrapped);
    assert_eq!(
        key_doc.get_document("masterKey").unwrap().get_str("provider").unwrap(),
        "azure"
    );
}

#[test]
fn transport_failure_propagates_at_kms_done() {
    let crypt = Crypt::builder().azure_credentials("tok").build().unwrap();
    let mut ctx = crypt.create_data_key_context(azure_kek(), vec![]).unwrap();
    {
        let kms = ctx.next_kms_ctx().unwrap();
        kms.message();
        kms.fail("connection refused by example.vault.azure.net");
        assert!(!kms.status().is_ok());
    }
    // a failed subcontext is not offered again
    assert!(ctx.next_kms_ctx().is_none());
    let err = ctx.kms_done().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert!(err.message.contains("connection refused"));
    assert_eq!(ctx.state(), State::Error);
}

#[test]
fn premature_kms_done_is_a_client_error() {
    let crypt = Crypt::builder().azure_credentials("tok").build().unwrap();
    let mut ctx = crypt.create_data_key_context(azure_kek(), vec![]).unwrap();
    let err = ctx.kms_done().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Client);
    assert!(err.message.contains("not complete"));
    assert_eq!(ctx.state(), State::Error);
}
