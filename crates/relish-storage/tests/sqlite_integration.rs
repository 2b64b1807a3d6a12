//! On-disk behavior of SqliteStore: durability across reopen and isolation
//! between concurrent sessions.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relish_core::Dbid;
use relish_storage::{ObjectRecord, ObjectStore, SessionId, SqliteStore, StoredElement, StoredValue};
use uuid::Uuid;

fn db_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("db1.db").to_string_lossy().into_owned()
}

#[test]
fn named_object_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let session = SessionId(1);

    let (car_dbid, owner_dbid) = {
        let store = SqliteStore::new(&path).unwrap();
        store.begin(session).unwrap();

        let owner_uuid = Uuid::new_v4();
        let owner_dbid = store.allocate(session, owner_uuid, "shop/Person").unwrap();
        let mut owner = ObjectRecord::new(owner_dbid, owner_uuid, "shop/Person");
        owner
            .primitives
            .insert("name".into(), StoredValue::Text("Ada".into()));
        store.write(session, &owner).unwrap();

        let car_uuid = Uuid::new_v4();
        let car_dbid = store.allocate(session, car_uuid, "shop/Car").unwrap();
        let mut car = ObjectRecord::new(car_dbid, car_uuid, "shop/Car");
        car.primitives
            .insert("color".into(), StoredValue::Text("red".into()));
        car.relations.insert(
            "owner".into(),
            vec![StoredElement::new(0, StoredValue::Ref(owner_dbid))],
        );
        car.relations.insert(
            "tags".into(),
            vec![
                StoredElement::new(0, StoredValue::Text("fast".into())),
                StoredElement::new(1, StoredValue::Text("new".into())),
            ],
        );
        store.write(session, &car).unwrap();
        store.bind_name(session, "K1", car_dbid).unwrap();
        store.commit(session).unwrap();
        (car_dbid, owner_dbid)
    };

    let store = SqliteStore::new(&path).unwrap();
    let dbid = store.lookup_name(SessionId(2), "K1").unwrap();
    assert_eq!(dbid, Some(car_dbid));

    let car = store.load(SessionId(2), car_dbid).unwrap();
    assert_eq!(car.primitives["color"], StoredValue::Text("red".into()));
    assert_eq!(car.relations["owner"][0].value, StoredValue::Ref(owner_dbid));
    let tags: Vec<_> = car.relations["tags"].iter().map(|e| e.value.clone()).collect();
    assert_eq!(
        tags,
        vec![
            StoredValue::Text("fast".into()),
            StoredValue::Text("new".into())
        ]
    );
    assert_eq!(car.references().collect::<Vec<_>>(), vec![owner_dbid]);

    let owner = store.load(SessionId(2), owner_dbid).unwrap();
    assert_eq!(owner.primitives["name"], StoredValue::Text("Ada".into()));
}

#[test]
fn open_transactions_do_not_block_readers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(&db_path(&dir)).unwrap());
    let writer = SessionId(1);

    let uuid = Uuid::new_v4();
    let dbid = store.allocate(writer, uuid, "shop/Car").unwrap();
    store.begin(writer).unwrap();
    store.bind_name(writer, "pending", dbid).unwrap();

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let reader = SessionId(2);
            store.begin(reader).unwrap();
            let seen = store.lookup_name(reader, "pending").unwrap();
            store.commit(reader).unwrap();
            seen
        })
    };
    // The reader finishes while the writer's transaction is still open and
    // does not see its uncommitted name.
    assert_eq!(reader.join().unwrap(), None);
    assert!(store.in_transaction(writer));
    assert_eq!(store.lookup_name(writer, "pending").unwrap(), Some(dbid));

    store.commit(writer).unwrap();
    assert_eq!(store.lookup_name(SessionId(3), "pending").unwrap(), Some(dbid));
}

#[test]
fn writes_outside_a_transaction_wait_for_the_writer() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(&db_path(&dir)).unwrap());
    let writer = SessionId(1);
    let dbid = store.allocate(writer, Uuid::new_v4(), "shop/Car").unwrap();
    store.begin(writer).unwrap();
    store.bind_name(writer, "first", dbid).unwrap();

    let other = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.bind_name(SessionId(2), "second", dbid))
    };
    thread::sleep(Duration::from_millis(50));
    store.commit(writer).unwrap();

    other.join().unwrap().unwrap();
    let names: Vec<_> = store
        .list_names(SessionId(3), "")
        .unwrap()
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn conflicting_write_rolls_back_the_later_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(&db_path(&dir)).unwrap();
    let (a, b) = (SessionId(1), SessionId(2));
    let dbid = store.allocate(a, Uuid::new_v4(), "shop/Car").unwrap();

    store.begin(a).unwrap();
    store.begin(b).unwrap();
    store.bind_name(a, "K1", dbid).unwrap();
    let err = store.bind_name(b, "K2", dbid).unwrap_err();
    assert!(err.is_database_error(), "{err}");
    assert!(!store.in_transaction(b));

    store.commit(a).unwrap();
    assert_eq!(store.lookup_name(b, "K1").unwrap(), Some(dbid));
    assert_eq!(store.lookup_name(b, "K2").unwrap(), None);
}

#[test]
fn dbids_are_monotone_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let first = {
        let store = SqliteStore::new(&path).unwrap();
        store.allocate(SessionId(1), Uuid::new_v4(), "T").unwrap()
    };
    let store = SqliteStore::new(&path).unwrap();
    let second = store.allocate(SessionId(1), Uuid::new_v4(), "T").unwrap();
    assert!(second > first);
    assert!(second > Dbid(0));
}
