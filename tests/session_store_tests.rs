use invoice_extract_lib::db::Db;
use invoice_extract_lib::session::{SessionContext, SessionStore, CHAT_SESSION_KEY};

#[test]
fn session_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("invoice_extract.db");

    let first = {
        let db = Db::new(&path).unwrap();
        let (ctx, created) = db.load_or_create(CHAT_SESSION_KEY).unwrap();
        assert!(created);
        ctx
    };

    let db = Db::new(&path).unwrap();
    assert!(db.is_current().unwrap());
    let (ctx, created) = db.load_or_create(CHAT_SESSION_KEY).unwrap();
    assert!(!created);
    assert_eq!(ctx.session_id, first.session_id);
    assert_eq!(ctx.created_at.timestamp(), first.created_at.timestamp());
}

#[test]
fn replaced_id_is_what_comes_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoice_extract.db");
    let db = Db::new(&path).unwrap();

    let (mut ctx, _) = db.load_or_create(CHAT_SESSION_KEY).unwrap();
    ctx.replace_id("srv-issued");
    db.save(CHAT_SESSION_KEY, &ctx).unwrap();
    drop(db);

    let db = Db::new(&path).unwrap();
    assert_eq!(db.load(CHAT_SESSION_KEY).unwrap().unwrap().session_id, "srv-issued");
}

#[test]
fn keys_are_independent_and_clearable() {
    let db = Db::in_memory().unwrap();
    db.save(CHAT_SESSION_KEY, &SessionContext::new("chat-1")).unwrap();
    db.save("other", &SessionContext::new("other-1")).unwrap();

    db.clear(CHAT_SESSION_KEY).unwrap();
    assert!(db.load(CHAT_SESSION_KEY).unwrap().is_none());
    assert_eq!(db.load("other").unwrap().unwrap().session_id, "other-1");
}
