//! End-to-end tests of the runtime over both stores.

use std::sync::Arc;
use std::thread;

use relish_core::{CoreError, TypeId};
use relish_runtime::{Manifest, Runtime, RuntimeConfig, RuntimeError, Value};

const SHOP: &str = r#"{
    "types": [
        { "name": "shop/Person", "attributes": [ { "name": "name", "type": "String" } ] },
        { "name": "shop/Car", "attributes": [
            { "name": "color", "type": "String" },
            { "name": "owner", "type": "shop/Person" },
            { "name": "tags", "type": "String", "collection": "SortedList" } ] }
    ]
}"#;

fn shop(config: RuntimeConfig) -> Arc<Runtime> {
    let mut b = Runtime::builder(config);
    Manifest::from_json(SHOP).unwrap().install(&mut b).unwrap();
    b.build().unwrap()
}

#[test]
fn named_object_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("shop.db");

    {
        let rt = shop(RuntimeConfig::with_db(&db));
        let mut t = rt.new_thread("shop", "writer");
        t.run_guarded(|t| {
            t.begin()?;
            let owner = t.new_object("shop/Person")?;
            t.set_attr(&owner, "name", Value::str("Ada"))?;
            let car = t.new_object("shop/Car")?;
            t.set_attr(&car, "color", Value::str("red"))?;
            t.set_attr(&car, "owner", Value::Object(owner))?;
            t.runtime().persistence().dub(t.session(), &car, "K1")?;
            Ok(())
        })
        .unwrap();
    }

    let rt = shop(RuntimeConfig::with_db(&db));
    let t = rt.new_thread("shop", "reader");
    let car = rt.persistence().summon(t.session(), "K1", 0).unwrap();
    assert_eq!(t.get_attr(&car, "color").unwrap(), Value::str("red"));
    let owner = t.get_attr(&car, "owner").unwrap();
    let owner = owner.as_object().unwrap();
    assert_eq!(t.get_attr(owner, "name").unwrap(), Value::str("Ada"));
}

#[test]
fn rollback_restores_committed_state() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut t = rt.new_thread("shop", "test");

    t.begin().unwrap();
    let car = t.new_object("shop/Car").unwrap();
    t.set_attr(&car, "color", Value::str("red")).unwrap();
    rt.persistence().dub(t.session(), &car, "K1").unwrap();
    t.commit().unwrap();

    t.begin().unwrap();
    t.set_attr(&car, "color", Value::str("blue")).unwrap();
    t.rollback().unwrap();

    assert_eq!(t.get_attr(&car, "color").unwrap(), Value::str("red"));
}

#[test]
fn failed_unit_of_work_rolls_back() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut t = rt.new_thread("shop", "test");
    let result: Result<(), RuntimeError> = t.run_guarded(|t| {
        t.begin()?;
        let car = t.new_object("shop/Car")?;
        t.runtime().persistence().dub(t.session(), &car, "doomed")?;
        t.set_attr(&car, "color", Value::Int(3))
    });
    assert!(matches!(result, Err(RuntimeError::TypeMismatch { .. })));
    assert!(!t.in_transaction());
    assert!(!rt.persistence().name_exists(t.session(), "doomed").unwrap());
}

#[test]
fn ambiguous_call_is_reported() {
    let mut b = Runtime::builder(RuntimeConfig::in_memory());
    let x = b.register_type("p/X", &[], vec![]).unwrap();
    let y = b.register_type("p/Y", &[], vec![]).unwrap();
    b.register_type("p/Z", &[x, y], vec![]).unwrap();
    b.define_native("p", "f", &[x], &[], |_, _| Ok(vec![])).unwrap();
    b.define_native("p", "f", &[y], &[], |_, _| Ok(vec![])).unwrap();
    let rt = b.build().unwrap();

    let mut t = rt.new_thread("p", "test");
    let z = t.new_object("p/Z").unwrap();
    let err = t.call_by_name("f", vec![Value::Object(z)]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(CoreError::AmbiguousDispatch { .. })
    ));
}

#[test]
fn nil_for_primitive_is_a_type_error() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut t = rt.new_thread("shop", "test");
    let err = t
        .call_by_name("slice", vec![Value::Nil, Value::Int(0), Value::Int(1)])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { ref got, .. } if got == "Nil"));
}

#[test]
fn builtins_slice_by_codepoint() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut t = rt.new_thread("shop", "test");
    let out = t
        .call_by_name("slice", vec![Value::str("añb日c"), Value::Int(1), Value::Int(4)])
        .unwrap();
    assert_eq!(out, vec![Value::str("ñb日")]);
}

#[test]
fn rendezvous_channel_between_threads() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut receiver = rt.new_thread("shop", "receiver");
    let ch = receiver.call_by_name("channel", vec![Value::Int(0)]).unwrap().remove(0);

    let sender = {
        let rt = Arc::clone(&rt);
        let ch = ch.clone();
        thread::spawn(move || {
            let mut t = rt.new_thread("shop", "sender");
            for i in 1..=3 {
                t.call_by_name("send", vec![ch.clone(), Value::Int(i)]).unwrap();
            }
            t.call_by_name("close", vec![ch]).unwrap();
        })
    };

    let mut got = Vec::new();
    loop {
        let out = receiver.call_by_name("recv", vec![ch.clone()]).unwrap();
        if out[1] == Value::Bool(false) {
            break;
        }
        got.push(out[0].clone());
    }
    sender.join().unwrap();
    assert_eq!(got, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

/// Two threads with open transactions hand values over an unbuffered
/// channel; neither may wait on the other's transaction.
fn exchange_inside_transactions(rt: Arc<Runtime>) {
    let mut receiver = rt.new_thread("shop", "receiver");
    let ch = receiver.call_by_name("channel", vec![Value::Int(0)]).unwrap().remove(0);
    receiver.begin().unwrap();

    let sender = {
        let rt = Arc::clone(&rt);
        let ch = ch.clone();
        thread::spawn(move || {
            let mut t = rt.new_thread("shop", "sender");
            t.begin().unwrap();
            let car = t.new_object("shop/Car").unwrap();
            t.set_attr(&car, "color", Value::str("red")).unwrap();
            rt.persistence().dub(t.session(), &car, "sent").unwrap();
            t.call_by_name("send", vec![ch, Value::Int(1)]).unwrap();
            t.commit().unwrap();
        })
    };

    let out = receiver.call_by_name("recv", vec![ch]).unwrap();
    assert_eq!(out, vec![Value::Int(1), Value::Bool(true)]);
    sender.join().unwrap();
    let car = rt.persistence().summon(receiver.session(), "sent", 0).unwrap();
    assert_eq!(receiver.get_attr(&car, "color").unwrap(), Value::str("red"));
    receiver.commit().unwrap();
}

#[test]
fn transactions_exchange_over_a_channel_in_memory() {
    exchange_inside_transactions(shop(RuntimeConfig::in_memory()));
}

#[test]
fn transactions_exchange_over_a_channel_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    exchange_inside_transactions(shop(RuntimeConfig::with_db(dir.path().join("shop.db"))));
}

#[test]
fn typed_channel_rejects_other_values() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut t = rt.new_thread("shop", "test");
    let ch = t
        .call_by_name("channel", vec![Value::str("Int"), Value::Int(1)])
        .unwrap()
        .remove(0);
    assert_eq!(rt.types().name(ch.type_of()), "Channel[Int]");
    assert!(matches!(
        t.call_by_name("send", vec![ch.clone(), Value::str("one")]),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    t.call_by_name("send", vec![ch.clone(), Value::Int(1)]).unwrap();
    let out = t.call_by_name("recv", vec![ch]).unwrap();
    assert_eq!(out[0], Value::Int(1));

    assert!(t
        .call_by_name("channel", vec![Value::str("shop/Nope"), Value::Int(1)])
        .is_err());
}

#[test]
fn methods_dispatch_on_channel_element_type() {
    let json = r#"{ "methods": [
        { "package": "pipes", "name": "describe",
          "params": [ { "name": "c", "type": "Channel[Int]" } ],
          "returns": ["String"], "body": { "lit": "ints" } },
        { "package": "pipes", "name": "describe",
          "params": [ { "name": "c", "type": "Channel" } ],
          "returns": ["String"], "body": { "lit": "anything" } }
    ] }"#;
    let mut b = Runtime::builder(RuntimeConfig::in_memory());
    Manifest::from_json(json).unwrap().install(&mut b).unwrap();
    let rt = b.build().unwrap();
    let mut t = rt.new_thread("pipes", "test");

    let ints = t
        .call_by_name("channel", vec![Value::str("Int"), Value::Int(1)])
        .unwrap()
        .remove(0);
    let strings = t
        .call_by_name("channel", vec![Value::str("String"), Value::Int(1)])
        .unwrap()
        .remove(0);
    let untyped = t.call_by_name("channel", vec![Value::Int(1)]).unwrap().remove(0);
    assert_eq!(t.call_by_name("describe", vec![ints]).unwrap(), vec![Value::str("ints")]);
    assert_eq!(
        t.call_by_name("describe", vec![strings]).unwrap(),
        vec![Value::str("anything")]
    );
    assert_eq!(
        t.call_by_name("describe", vec![untyped]).unwrap(),
        vec![Value::str("anything")]
    );
}

#[test]
fn recursion_is_bounded() {
    let config = RuntimeConfig {
        max_recursion_depth: 16,
        ..RuntimeConfig::in_memory()
    };
    let mut b = Runtime::builder(config);
    b.define_native("p", "loop", &[TypeId::INT], &[], |t, args| {
        t.call_by_name("loop", args)
    })
    .unwrap();
    let rt = b.build().unwrap();
    let mut t = rt.new_thread("p", "test");
    let err = t.call_by_name("loop", vec![Value::Int(0)]).unwrap_err();
    assert!(matches!(err, RuntimeError::RecursionLimit { limit: 16 }));
}

#[test]
fn native_panic_is_contained() {
    let mut b = Runtime::builder(RuntimeConfig::in_memory());
    b.define_native("p", "boom", &[], &[], |_, _| panic!("kaboom")).unwrap();
    let rt = b.build().unwrap();
    let err = rt.call("p", "boom", vec![]).unwrap_err();
    assert!(matches!(err, RuntimeError::Panicked { ref message } if message == "kaboom"));
    assert!(rt.threads().is_empty());
}

#[test]
fn gc_keeps_referenced_and_in_transit_objects() {
    let rt = shop(RuntimeConfig::in_memory());
    let t = rt.new_thread("shop", "test");
    let kept = t.new_object("shop/Person").unwrap();
    rt.persistence().ensure_persisted(t.session(), &kept).unwrap();
    let queued = t.new_object("shop/Person").unwrap();
    rt.persistence().ensure_persisted(t.session(), &queued).unwrap();
    let dropped = t.new_object("shop/Person").unwrap();
    rt.persistence().ensure_persisted(t.session(), &dropped).unwrap();
    drop(dropped);

    let ch = rt.new_channel(TypeId::ANY, 1);
    ch.send(Value::Object(queued)).unwrap();
    drop(t);

    assert_eq!(rt.collect_garbage(), Some(1));
    assert_eq!(rt.persistence().cached_len(), 2);
    assert!(kept.is_stored());
}

#[test]
fn collection_attribute_persists_sorted() {
    let rt = shop(RuntimeConfig::in_memory());
    let mut t = rt.new_thread("shop", "test");
    let car = t.new_object("shop/Car").unwrap();
    rt.persistence().dub(t.session(), &car, "K2").unwrap();
    let tags = t.get_attr(&car, "tags").unwrap();
    for tag in ["zeta", "alpha", "mid"] {
        t.call_by_name("push", vec![tags.clone(), Value::str(tag)]).unwrap();
    }
    let first = t.call_by_name("at", vec![tags.clone(), Value::Int(0)]).unwrap();
    assert_eq!(first, vec![Value::str("alpha")]);
    let len = t.call_by_name("len", vec![tags]).unwrap();
    assert_eq!(len, vec![Value::Int(3)]);
}

#[test]
fn thread_table_tracks_live_threads() {
    let rt = shop(RuntimeConfig::in_memory());
    let a = rt.new_thread("shop", "a");
    let b = rt.new_thread("shop", "b");
    let labels: Vec<String> = rt.threads().into_iter().map(|i| i.label).collect();
    assert_eq!(labels, vec!["a", "b"]);
    drop(a);
    drop(b);
    assert!(rt.threads().is_empty());
}
