use std::{fs, time::Duration};

use tempfile::tempdir;

use contactlog::{
    contact::Contact,
    persist::{
        ContactSink, PersistError,
        json_file::{JsonFileSink, read_contacts},
    },
    runtime::handle::{RuntimeConfig, spawn_contact_store},
};

#[tokio::test]
async fn stored_contacts_survive_restart() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");

    {
        let sink = JsonFileSink::open(&path).expect("open");
        let store = sink.load_store().expect("load");
        assert_eq!(store.version(), 1);
        let handle = spawn_contact_store(store, Some(Box::new(sink)), RuntimeConfig::default());
        handle
            .store_contact(Contact::new("Al", "a@x.com", "hi"))
            .await
            .expect("store");
        handle
            .store_contact(Contact::new("Bo", "b@x.com", "yo"))
            .await
            .expect("store");
        handle.shutdown().await.expect("shutdown");
    }

    let on_disk = fs::read_to_string(&path).expect("read");
    assert_eq!(
        on_disk,
        r#"[{"name":"Al","email":"a@x.com","message":"hi"},{"name":"Bo","email":"b@x.com","message":"yo"}]"#
    );

    let sink = JsonFileSink::open(&path).expect("reopen");
    let store = sink.load_store().expect("reload");
    // versions restart per process; only the list is durable
    assert_eq!(store.version(), 1);
    assert_eq!(store.current().json(), on_disk);
}

#[tokio::test]
async fn store_response_matches_file_after_write() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    let sink = JsonFileSink::open(&path).expect("open");
    let handle = spawn_contact_store(
        sink.load_store().expect("load"),
        Some(Box::new(sink)),
        RuntimeConfig::default(),
    );

    let json = tokio::time::timeout(
        Duration::from_secs(2),
        handle.store_contact(Contact::new("Al", "a@x.com", "hi")),
    )
    .await
    .expect("timely")
    .expect("store");

    assert_eq!(fs::read_to_string(&path).expect("read"), json);
}

#[test]
fn missing_file_loads_as_none_and_starts_empty() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("absent.json");

    assert!(read_contacts(&path).expect("read").is_none());
    let store = JsonFileSink::open(&path)
        .expect("open")
        .load_store()
        .expect("load");
    assert_eq!(store.current().json(), "[]");
    assert!(!path.exists());
}

#[test]
fn null_file_is_an_empty_list() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    fs::write(&path, "null").expect("write");

    assert_eq!(read_contacts(&path).expect("read"), Some(Vec::new()));
}

#[test]
fn malformed_file_is_an_error_but_store_starts_empty() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    fs::write(&path, r#"[{"name":"Al","email":"#).expect("write");

    assert!(matches!(read_contacts(&path), Err(PersistError::Serde(_))));

    let sink = JsonFileSink::open(&path).expect("open");
    let store = sink.load_store().expect("load");
    assert!(store.current().contacts().is_empty());
}

#[test]
fn empty_file_is_a_parse_error() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    fs::write(&path, "").expect("write");

    assert!(read_contacts(&path).is_err());
}

#[test]
fn wrong_shape_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    fs::write(&path, r#"{"name":"Al"}"#).expect("write");

    assert!(read_contacts(&path).is_err());
}

#[test]
fn sink_reports_its_absolute_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    let sink = JsonFileSink::open(&path).expect("open");

    assert_eq!(sink.path(), path.as_path());
    assert_eq!(sink.watch_path(), Some(path.as_path()));

    let relative = JsonFileSink::open("contacts.json").expect("open relative");
    assert!(relative.path().is_absolute());
    assert!(relative.path().ends_with("contacts.json"));
}

#[test]
fn write_all_overwrites_previous_content() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("contacts.json");
    let mut sink = JsonFileSink::open(&path).expect("open");

    sink.write_all(r#"[{"name":"Al","email":"a@x.com","message":"hi"}]"#)
        .expect("first");
    sink.write_all("[]").expect("second");

    assert_eq!(fs::read_to_string(&path).expect("read"), "[]");
    assert_eq!(sink.load().expect("load"), Some(Vec::new()));
}
