use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use fieldcrypt::{Algorithm, Crypt, Kek, KeyRef, Marking, State};
use uuid::Uuid;

fn local_crypt() -> Crypt {
    Crypt::builder()
        .local_master_key(vec![5u8; 32])
        .build()
        .unwrap()
}

fn create_local_key(crypt: &Crypt) -> Document {
    let mut ctx = crypt.create_data_key_context(Kek::Local, vec![]).unwrap();
    ctx.kms_done().unwrap();
    ctx.finalize().unwrap()
}

fn key_id(key_doc: &Document) -> Uuid {
    let Bson::Binary(bin) = key_doc.get("_id").unwrap() else {
        panic!("_id is not binary");
    };
    Uuid::from_slice(&bin.bytes).unwrap()
}

fn marking(value: Bson, key: KeyRef) -> Bson {
    Bson::Binary(
        Marking {
            algorithm: Algorithm::Random,
            value,
            key,
        }
        .to_binary()
        .unwrap(),
    )
}

fn marked_reply(result: Document) -> Document {
    doc! { "ok": 1_i32, "result": result, "hasEncryptionPlaceholders": true }
}

#[test]
fn auto_encrypt_with_remote_schema() {
    let crypt = local_crypt();
    let key_doc = create_local_key(&crypt);
    let id = key_id(&key_doc);

    let cmd = doc! { "find": "people", "filter": { "ssn": "123-45-6789" } };
    let mut ctx = crypt.encrypt_context("db.people", cmd.clone()).unwrap();
    assert_eq!(ctx.state(), State::NeedCollInfo);
    assert_eq!(ctx.db_op().unwrap(), doc! { "name": "people" });

    let schema = doc! { "bsonType": "object" };
    ctx.db_feed(&doc! {
        "name": "people",
        "options": { "validator": { "$jsonSchema": schema.clone() } },
    })
    .unwrap();
    ctx.db_done().unwrap();
    assert_eq!(ctx.state(), State::NeedMarkings);

    let to_mark = ctx.db_op().unwrap();
    assert_eq!(to_mark.get_str("find").unwrap(), "people");
    assert_eq!(to_mark.get_document("jsonSchema").unwrap(), &schema);
    assert!(to_mark.get_bool("isRemoteSchema").unwrap());

    let marked = doc! {
        "find": "people",
        "filter": { "ssn": marking(Bson::String("123-45-6789".into()), KeyRef::Id(id)) },
    };
    ctx.db_feed(&marked_reply(marked)).unwrap();
    ctx.db_done().unwrap();
    assert_eq!(ctx.state(), State::NeedKeys);

    ctx.db_op().unwrap();
    ctx.db_feed(&key_doc).unwrap();
    ctx.db_done().unwrap();
    assert_eq!(ctx.state(), State::NeedKms);
    assert!(ctx.next_kms_ctx().is_none());
    ctx.kms_done().unwrap();
    assert_eq!(ctx.state(), State::Ready);

    let out = ctx.finalize().unwrap();
    assert_eq!(ctx.state(), State::Done);
    let encrypted = out.get_document("filter").unwrap().get("ssn").unwrap();
    let Bson::Binary(bin) = encrypted else {
        panic!("field was not encrypted");
    };
    assert_eq!(bin.subtype, BinarySubtype::Encrypted);

    // round-trip through decrypt
    let mut dctx = crypt.decrypt_context(out).unwrap();
    dctx.db_op().unwrap();
    dctx.db_feed(&key_doc).unwrap();
    dctx.db_done().unwrap();
    dctx.kms_done().unwrap();
    let plain = dctx.finalize().unwrap();
    assert_eq!(
        plain.get_document("filter").unwrap().get_str("ssn").unwrap(),
        "123-45-6789"
    );
}

#[test]
fn schema_map_skips_collection_info() {
    let schema = doc! { "bsonType": "object" };
    let crypt = Crypt::builder()
        .local_master_key(vec![5u8; 32])
        .schema("db.people", schema.clone())
        .build()
        .unwrap();
    let mut ctx = crypt
        .encrypt_context("db.people", doc! { "find": "people" })
        .unwrap();
    assert_eq!(ctx.state(), State::NeedMarkings);
    let to_mark = ctx.db_op().unwrap();
    assert_eq!(to_mark.get_document("jsonSchema").unwrap(), &schema);
    assert!(!to_mark.get_bool("isRemoteSchema").unwrap());
}

#[test]
fn marking_by_alt_name_encrypts_under_resolved_id() {
    let crypt = local_crypt();
    let mut ctx = crypt
        .create_data_key_context(Kek::Local, vec!["payments-key".into()])
        .unwrap();
    ctx.kms_done().unwrap();
    let key_doc = ctx.finalize().unwrap();
    let id = key_id(&key_doc);

    let schema = doc! {};
    let crypt2 = Crypt::builder()
        .local_master_key(vec![5u8; 32])
        .schema("db.orders", schema)
        .build()
        .unwrap();
    let mut ectx = crypt2
        .encrypt_context("db.orders", doc! { "insert": "orders" })
        .unwrap();
    ectx.db_op().unwrap();
    let marked = doc! {
        "insert": "orders",
        "total": marking(Bson::Int64(100), KeyRef::AltName("payments-key".into())),
    };
    ectx.db_feed(&marked_reply(marked)).unwrap();
    ectx.db_done().unwrap();
    ectx.db_op().unwrap();
    ectx.db_feed(&key_doc).unwrap();
    ectx.db_done().unwrap();
    ectx.kms_done().unwrap();
    let out = ectx.finalize().unwrap();

    // ciphertext must carry the key id the alt name resolved to
    let Bson::Binary(bin) = out.get("total").unwrap() else {
        panic!("not encrypted");
    };
    assert_eq!(&bin.bytes[1..17], id.as_bytes());
}

#[test]
fn no_placeholders_is_nothing_to_do() {
    let crypt = local_crypt();
    let mut ctx = crypt
        .encrypt_context("db.people", doc! { "find": "people" })
        .unwrap();
    ctx.db_op().unwrap();
    ctx.db_feed(&doc! { "name": "people" }).unwrap();
    ctx.db_done().unwrap();
    ctx.db_op().unwrap();
    let unmarked = doc! { "find": "people", "filter": { "city": "Oslo" } };
    ctx.db_feed(&doc! { "ok": 1_i32, "result": unmarked.clone(), "hasEncryptionPlaceholders": false })
        .unwrap();
    ctx.db_done().unwrap();
    assert_eq!(ctx.state(), State::NothingToDo);
    let out = ctx.finalize().unwrap();
    assert_eq!(out, unmarked);
    assert_eq!(ctx.state(), State::Done);
}

#[test]
fn aws_multi_key_encrypt() {
    let crypt = Crypt::builder()
        .aws_credentials("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG")
        .schema("db.people", doc! {})
        .build()
        .unwrap();

    let id1 = Uuid::new_v4();
    let id2 = Uuid::new_v4();
    let wrapped1 = vec![1u8; 24];
    let wrapped2 = vec![2u8; 24];
    let dek1 = vec![21u8; 32];
    let dek2 = vec![22u8; 32];
    let aws_key_doc = |id: &Uuid, wrapped: &[u8], cmk: &str| -> Document {
        doc! {
            "_id": Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes: id.as_bytes().to_vec(),
            }),
            "keyMaterial": Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: wrapped.to_vec(),
            }),
            "creationDate": bson::DateTime::now(),
            "updateDate": bson::DateTime::now(),
            "status": 0_i32,
            "version": 0_i64,
            "masterKey": { "provider": "aws", "region": "us-east-1", "key": cmk },
        }
    };
    let kd1 = aws_key_doc(&id1, &wrapped1, "arn:aws:kms:us-east-1:111122223333:key/one");
    let kd2 = aws_key_doc(&id2, &wrapped2, "arn:aws:kms:us-east-1:111122223333:key/two");

    let drive_kms = |ctx: &mut fieldcrypt::Context| {
        let mut exchanges = 0;
        while let Some(kms) = ctx.next_kms_ctx() {
            let msg = String::from_utf8(kms.message()).unwrap();
            assert!(!msg.is_empty());
            // answer with the DEK belonging to the wrapped blob in the request
            let dek = if msg.contains(&STANDARD.encode(&wrapped1)) {
                &dek1
            } else {
                assert!(msg.contains(&STANDARD.encode(&wrapped2)));
                &dek2
            };
            let body = format!("{{\"Plaintext\":\"{}\"}}", STANDARD.encode(dek));
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            kms.feed(response.as_bytes()).unwrap();
            exchanges += 1;
        }
        exchanges
    };

    let mut ctx = crypt
        .encrypt_context("db.people", doc! { "insert": "people" })
        .unwrap();
    assert_eq!(ctx.state(), State::NeedMarkings);
    ctx.db_op().unwrap();
    let marked = doc! {
        "insert": "people",
        "ssn": marking(Bson::String("123".into()), KeyRef::Id(id1)),
        "card": marking(Bson::String("4111".into()), KeyRef::Id(id2)),
    };
    ctx.db_feed(&marked_reply(marked)).unwrap();
    ctx.db_done().unwrap();
    assert_eq!(ctx.state(), State::NeedKeys);

    // one filter with the $or of both ids
    let filter = ctx.db_op().unwrap();
    let ids = filter.get_array("$or").unwrap()[0]
        .as_document()
        .unwrap()
        .get_document("_id")
        .unwrap()
        .get_array("$in")
        .unwrap();
    assert_eq!(ids.len(), 2);

    ctx.db_feed(&kd1).unwrap();
    ctx.db_feed(&kd2).unwrap();
    ctx.db_done().unwrap();
    assert_eq!(ctx.state(), State::NeedKms);

    // one subcontext per key
    assert_eq!(drive_kms(&mut ctx), 2);
    ctx.kms_done().unwrap();
    assert_eq!(ctx.state(), State::Ready);
    let out = ctx.finalize().unwrap();

    // decrypt the output again through the same mocked exchanges
    let mut dctx = crypt.decrypt_context(out).unwrap();
    dctx.db_op().unwrap();
    dctx.db_feed(&kd1).unwrap();
    dctx.db_feed(&kd2).unwrap();
    dctx.db_done().unwrap();
    assert_eq!(drive_kms(&mut dctx), 2);
    dctx.kms_done().unwrap();
    let plain = dctx.finalize().unwrap();
    assert_eq!(plain.get_str("ssn").unwrap(), "123");
    assert_eq!(plain.get_str("card").unwrap(), "4111");
}
