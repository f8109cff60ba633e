use crossnostr_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use crossnostr_identity::{decode_nsec, sign_text_note, CredentialStore, SqliteCredentialStore};
use crossnostr_types::ChannelId;

const NSEC: &str = "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp";
const NPUB: &str = "npub1zutzeysacnf9rru6zqwmxd54mud0k44tst6l70ja5mhv8jjumytsd2x7nu";

fn pool(dir: &tempfile::TempDir) -> DbPool {
    let path = dir.path().join("identity.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();
    pool
}

#[test]
fn stored_identity_is_visible_through_another_connection() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool(&dir);
    let store = SqliteCredentialStore::new(pool.clone());
    let channel = ChannelId(-1001122334455);

    assert!(store.get(channel).unwrap().is_none());

    let identity = decode_nsec(NSEC).unwrap();
    store.set(channel, &identity).unwrap();

    let conn = pool.get().unwrap();
    let npub: String = conn
        .query_row(
            "SELECT npub FROM nostr_accounts WHERE telegram_channel_id = ?1",
            [channel.get()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(npub, NPUB);
    drop(conn);

    let fresh = SqliteCredentialStore::new(pool);
    let loaded = fresh.get(channel).unwrap().expect("identity stored");
    assert_eq!(loaded, identity);

    let event = sign_text_note(&loaded, "hello", 1_700_000_000).unwrap();
    event.verify().unwrap();
}

#[test]
fn relinking_takes_effect_on_next_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteCredentialStore::new(pool(&dir));
    let channel = ChannelId(42);

    let first = decode_nsec(NSEC).unwrap();
    let second = crossnostr_identity::SigningIdentity::from_secret_bytes(&[0x22; 32]).unwrap();

    store.set(channel, &first).unwrap();
    store.set(channel, &second).unwrap();
    assert_eq!(store.get(channel).unwrap(), Some(second));
}

#[test]
fn disabled_channel_is_treated_as_unlinked() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool(&dir);
    let store = SqliteCredentialStore::new(pool.clone());
    let channel = ChannelId(9);

    store.set(channel, &decode_nsec(NSEC).unwrap()).unwrap();
    pool.get()
        .unwrap()
        .execute(
            "UPDATE nostr_accounts SET cross_posting_enabled = 0 WHERE telegram_channel_id = 9",
            [],
        )
        .unwrap();
    assert!(store.get(channel).unwrap().is_none());
}
