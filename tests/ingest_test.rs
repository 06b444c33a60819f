mod common;

use chat_prep::ingest::ingest;
use chat_prep::source::{format_source_date, SourceStore};
use chat_prep::store::PreparedStore;

use common::{body_blob, raw_minute, FixtureMessage, SourceFixture};

fn open_pair(fixture: &SourceFixture) -> (SourceStore, PreparedStore) {
    let source = SourceStore::open(fixture.source_path()).expect("open source");
    let store = PreparedStore::open(fixture.store_path()).expect("open store");
    (source, store)
}

/// One direct chat with a short exchange: everything lands in one group
/// with the local user counted as a member.
#[test]
fn fresh_ingest_builds_one_group() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage::incoming(1, 10, 1, "hey", raw_minute(0)));
    fixture.add_message(&FixtureMessage::outgoing(2, 10, "hi yourself", raw_minute(1)));
    fixture.add_message(&FixtureMessage::incoming(3, 10, 1, "listen to this", raw_minute(2)));

    let (source, store) = open_pair(&fixture);
    let outcome = ingest(&source, &store, 100, false).expect("ingest");

    assert_eq!(outcome.messages_processed, 3);
    assert_eq!(outcome.contacts_processed, 1);
    assert!(!outcome.rebuilt);
    assert_eq!(store.message_count().expect("count"), 3);
    assert_eq!(store.checkpoint().expect("checkpoint").last_message_rowid, 3);

    let conn = store.get_connection().expect("conn");
    let (key, members, last): (String, i64, String) = conn
        .query_row(
            "SELECT group_key, member_count, last_message_date FROM chat_groups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("group row");
    assert_eq!(key, "canon:5551234567");
    assert_eq!(members, 2); // the other participant plus the local user
    assert_eq!(last, format_source_date(raw_minute(2)));
}

/// Running ingest twice must be a no-op the second time, row for row.
#[test]
fn reingest_is_idempotent() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage::incoming(1, 10, 1, "only once", raw_minute(0)));

    let (source, store) = open_pair(&fixture);
    ingest(&source, &store, 100, false).expect("first ingest");
    let again = ingest(&source, &store, 100, false).expect("second ingest");

    assert_eq!(again.messages_processed, 0);
    assert_eq!(again.contacts_processed, 0);
    assert_eq!(store.message_count().expect("count"), 1);
}

/// New source rows after a completed run are picked up from the checkpoint;
/// nothing before it is re-read.
#[test]
fn ingest_resumes_from_checkpoint() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage::incoming(1, 10, 1, "first", raw_minute(0)));
    fixture.add_message(&FixtureMessage::incoming(2, 10, 1, "second", raw_minute(1)));

    let (source, store) = open_pair(&fixture);
    ingest(&source, &store, 1, false).expect("initial ingest");
    assert_eq!(store.checkpoint().expect("checkpoint").last_message_rowid, 2);

    fixture.add_message(&FixtureMessage::incoming(5, 10, 1, "after a gap", raw_minute(2)));
    let outcome = ingest(&source, &store, 1, false).expect("resume");

    assert_eq!(outcome.messages_processed, 1);
    assert_eq!(store.checkpoint().expect("checkpoint").last_message_rowid, 5);
    assert_eq!(store.message_count().expect("count"), 3);
}

/// Two source chats with the same participant set collapse into one group
/// whose stats span both.
#[test]
fn split_chats_share_one_group() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_handle(2, "friend@example.com");
    fixture.add_chat(10, None, &[1, 2]);
    fixture.add_chat(11, None, &[2, 1]); // same people, different order
    fixture.add_message(&FixtureMessage::incoming(1, 10, 1, "in the old chat", raw_minute(0)));
    fixture.add_message(&FixtureMessage::incoming(2, 11, 2, "in the new chat", raw_minute(5)));

    let (source, store) = open_pair(&fixture);
    ingest(&source, &store, 100, false).expect("ingest");

    let conn = store.get_connection().expect("conn");
    let groups: i64 = conn
        .query_row("SELECT COUNT(*) FROM chat_groups", [], |row| row.get(0))
        .expect("group count");
    assert_eq!(groups, 1);

    let (ids_json, last): (String, String) = conn
        .query_row(
            "SELECT chat_ids, last_message_date FROM chat_groups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("group row");
    let ids: Vec<i64> = serde_json::from_str(&ids_json).expect("ids json");
    assert_eq!(ids, vec![10, 11]);
    assert_eq!(last, format_source_date(raw_minute(5)));
}

/// A message whose plain text is missing decodes its rich-text blob, and the
/// FTS index can find the decoded words.
#[test]
fn blob_only_message_is_decoded_and_indexed() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage {
        text: None,
        body: Some(body_blob("hidden in the archive")),
        ..FixtureMessage::incoming(1, 10, 1, "", raw_minute(0))
    });

    let (source, store) = open_pair(&fixture);
    ingest(&source, &store, 100, false).expect("ingest");

    let conn = store.get_connection().expect("conn");
    let text: String = conn
        .query_row("SELECT text FROM messages WHERE message_id = 1", [], |row| {
            row.get(0)
        })
        .expect("text");
    assert_eq!(text, "hidden in the archive");

    let hits: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages_fts WHERE messages_fts MATCH '\"archive\"'",
            [],
            |row| row.get(0),
        )
        .expect("fts hit");
    assert_eq!(hits, 1);
}

/// Spotify links get flagged and extracted during ingestion.
#[test]
fn spotify_link_is_flagged() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage::incoming(
        1,
        10,
        1,
        "this one! https://open.spotify.com/track/abc123?si=xyz",
        raw_minute(0),
    ));
    fixture.add_message(&FixtureMessage::incoming(
        2,
        10,
        1,
        "https://example.com/not-music",
        raw_minute(1),
    ));

    let (source, store) = open_pair(&fixture);
    ingest(&source, &store, 100, false).expect("ingest");

    let conn = store.get_connection().expect("conn");
    let (has_link, url): (bool, Option<String>) = conn
        .query_row(
            "SELECT has_link, link_url FROM messages WHERE message_id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("row 1");
    assert!(has_link);
    assert_eq!(
        url.as_deref(),
        Some("https://open.spotify.com/track/abc123?si=xyz")
    );

    let has_link_other: bool = conn
        .query_row(
            "SELECT has_link FROM messages WHERE message_id = 2",
            [],
            |row| row.get(0),
        )
        .expect("row 2");
    assert!(!has_link_other);
}

/// A message with no chat membership still lands somewhere searchable.
#[test]
fn orphan_message_goes_to_sink_group() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_message(&FixtureMessage {
        chat_id: None,
        ..FixtureMessage::incoming(1, 0, 1, "orphaned", raw_minute(0))
    });

    let (source, store) = open_pair(&fixture);
    let outcome = ingest(&source, &store, 100, false).expect("ingest");
    assert_eq!(outcome.messages_processed, 1);

    let conn = store.get_connection().expect("conn");
    let key: String = conn
        .query_row(
            "SELECT group_key FROM messages WHERE message_id = 1",
            [],
            |row| row.get(0),
        )
        .expect("key");
    assert_eq!(key, "chat:0");
}

/// A forced rebuild starts from zero and re-reads the whole source.
#[test]
fn forced_rebuild_reingests_everything() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage::incoming(1, 10, 1, "one", raw_minute(0)));
    fixture.add_message(&FixtureMessage::incoming(2, 10, 1, "two", raw_minute(1)));

    let (source, store) = open_pair(&fixture);
    ingest(&source, &store, 100, false).expect("first ingest");

    let outcome = ingest(&source, &store, 100, true).expect("rebuild ingest");
    assert!(outcome.rebuilt);
    assert_eq!(outcome.messages_processed, 2);
    assert_eq!(store.message_count().expect("count"), 2);
}

/// A stored schema version that differs from the expected one wipes the
/// prepared data and resets the checkpoints on open.
#[test]
fn schema_version_mismatch_rebuilds_on_open() {
    let fixture = SourceFixture::new();
    fixture.add_handle(1, "+15551234567");
    fixture.add_chat(10, None, &[1]);
    fixture.add_message(&FixtureMessage::incoming(1, 10, 1, "soon stale", raw_minute(0)));

    {
        let (source, store) = open_pair(&fixture);
        ingest(&source, &store, 100, false).expect("ingest");
        let conn = store.get_connection().expect("conn");
        conn.execute("UPDATE meta SET value = '1' WHERE key = 'schema_version'", [])
            .expect("age the schema");
    }

    let store = PreparedStore::open(fixture.store_path()).expect("reopen");
    assert_eq!(store.message_count().expect("count"), 0);
    assert_eq!(store.checkpoint().expect("checkpoint").last_message_rowid, 0);

    // The next ingest refills everything from the source.
    let source = SourceStore::open(fixture.source_path()).expect("open source");
    let outcome = ingest(&source, &store, 100, false).expect("reingest");
    assert_eq!(outcome.messages_processed, 1);
}

/// Opening a missing source path fails up front without touching anything.
#[test]
fn missing_source_fails_cleanly() {
    let fixture = SourceFixture::new();
    let bogus = fixture.store_path().with_file_name("nope.db");
    assert!(SourceStore::open(&bogus).is_err());
}
