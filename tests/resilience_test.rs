mod helpers;

use cairn::db;
use cairn::vault;
use secrecy::SecretString;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");

    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();

    assert!(db_path.exists());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn health_check_passes_on_valid_db() {
    let conn = helpers::test_db();

    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert_eq!(report.user_count, 0);
    assert_eq!(report.entry_count, 0);
    assert_eq!(report.vector_count, 0);
}

#[test]
fn busy_timeout_is_set() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");

    let conn = db::open_database(&db_path).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
}

#[test]
fn vault_survives_reopen_and_rejects_wrong_passphrase() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("vault.db");

    let entry_id = {
        let conn = db::open_database(&db_path).unwrap();
        let (_record, session) = helpers::test_vault(&conn);
        helpers::insert_entry(&conn, &session, "private note", chrono::Utc::now(), &[])
    };

    let conn = db::open_database(&db_path).unwrap();
    let stored = db::store::load_vault(&conn).unwrap().unwrap();
    let params = stored.kdf_params.unwrap();

    let wrong = SecretString::from("not the passphrase".to_string());
    assert!(matches!(
        vault::unlock(&stored.record, &wrong, &params),
        Err(cairn::CairnError::Authentication)
    ));

    let right = SecretString::from(helpers::PASSPHRASE.to_string());
    let session = vault::unlock(&stored.record, &right, &params).unwrap();
    let entry = db::store::load_entry(&conn, &entry_id).unwrap().unwrap();
    assert_eq!(entry.open(&session).unwrap().as_str(), "private note");
}

#[test]
fn passphrase_change_keeps_entries_readable() {
    let conn = helpers::test_db();
    let (record, session) = helpers::test_vault(&conn);
    let entry_id = helpers::insert_entry(&conn, &session, "still here", chrono::Utc::now(), &[]);
    session.lock();

    let params = cairn::crypto::KdfParams::insecure_fast();
    let old = SecretString::from(helpers::PASSPHRASE.to_string());
    let new = SecretString::from("a brand new passphrase".to_string());
    let rekeyed = vault::change_passphrase(&record, &old, &new, &params).unwrap();
    db::store::update_vault(&conn, &rekeyed, &params).unwrap();

    let stored = db::store::load_vault(&conn).unwrap().unwrap();
    assert!(vault::unlock(&stored.record, &old, &params).is_err());
    let session = vault::unlock(&stored.record, &new, &params).unwrap();
    let entry = db::store::load_entry(&conn, &entry_id).unwrap().unwrap();
    assert_eq!(entry.open(&session).unwrap().as_str(), "still here");
}
