use std::sync::{Arc, Mutex};

use bson::doc;
use fieldcrypt::logging::{ensure_logger, register_sink, remove_sink, LogSink};
use fieldcrypt::{Crypt, Kek, State};

struct CollectorSink {
    lines: Mutex<Vec<String>>,
}

impl LogSink for CollectorSink {
    fn log(&self, record: &log::Record<'_>) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("{} {}", record.level(), record.args()));
    }
}

#[test]
fn state_transitions_are_logged() {
    assert!(ensure_logger());
    let sink = Arc::new(CollectorSink {
        lines: Mutex::new(Vec::new()),
    });
    assert!(register_sink(
        "collector",
        sink.clone(),
        log::LevelFilter::Trace
    ));
    // quiet sink: must see nothing at trace verbosity
    let quiet = Arc::new(CollectorSink {
        lines: Mutex::new(Vec::new()),
    });
    assert!(register_sink("quiet", quiet.clone(), log::LevelFilter::Warn));

    let crypt = Crypt::builder()
        .local_master_key(vec![5u8; 32])
        .build()
        .unwrap();
    let mut ctx = crypt.create_data_key_context(Kek::Local, vec![]).unwrap();
    assert_eq!(ctx.state(), State::NeedKms);
    ctx.kms_done().unwrap();
    ctx.finalize().unwrap();

    let mut dctx = crypt.decrypt_context(doc! { "plain": 1 }).unwrap();
    dctx.finalize().unwrap();

    assert!(remove_sink("collector"));
    assert!(remove_sink("quiet"));
    assert!(!remove_sink("collector"));

    let lines = sink.lines.lock().unwrap();
    assert!(
        lines.iter().any(|l| l.contains("context state")),
        "expected a state transition line, got: {lines:?}"
    );
    assert!(quiet.lines.lock().unwrap().is_empty());
}
