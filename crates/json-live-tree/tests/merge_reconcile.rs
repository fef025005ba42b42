use std::cell::Cell;
use std::rc::Rc;

use json_live_tree::identity::array_by_field;
use json_live_tree::merge::merge;
use json_live_tree::{merge_with_identity_selector, Children, Element, PathObserver};
use serde_json::json;

fn count_batches(node: &Element) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let sink = Rc::clone(&count);
    node.on_change(move |_| sink.set(sink.get() + 1)).unwrap();
    count
}

#[test]
fn merging_equal_content_reports_nothing() {
    let doc = json!({
        "id": 7,
        "profile": {"name": "x", "age": 3},
        "tags": ["a", "b"],
        "items": [{"id": 1, "v": true}, {"id": 2, "v": false}]
    });
    let target = Element::from_json(&doc);
    let profile = target.single_child("profile").unwrap().unwrap();
    let items = target.array_child("items").unwrap().unwrap();
    let counters = [
        count_batches(&target),
        count_batches(&profile),
        count_batches(&items[0]),
        count_batches(&items[1]),
    ];

    merge_with_identity_selector(&target, &Element::from_json(&doc), array_by_field("id")).unwrap();

    assert!(counters.iter().all(|c| c.get() == 0));
    assert_eq!(target.to_json(), doc);
}

#[test]
fn arrays_reconcile_by_key_not_position() {
    let target = Element::from_json(&json!({
        "list": [{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]
    }));
    let before = target.array_child("list").unwrap().unwrap();

    let source = Element::from_json(&json!({
        "list": [{"id": 2, "name": "B2"}, {"id": 1, "name": "A2"}]
    }));
    merge_with_identity_selector(&target, &source, array_by_field("id")).unwrap();

    let after = target.array_child("list").unwrap().unwrap();
    assert_eq!(after.len(), 2);
    let one = after
        .iter()
        .find(|e| e.ptr_eq(&before[0]))
        .expect("element id=1 kept its identity");
    let two = after
        .iter()
        .find(|e| e.ptr_eq(&before[1]))
        .expect("element id=2 kept its identity");
    assert_eq!(one.to_json(), json!({"id": 1, "name": "A2"}));
    assert_eq!(two.to_json(), json!({"id": 2, "name": "B2"}));
}

#[test]
fn nested_nodes_merge_in_place_and_keep_subscribers() {
    let target = Element::from_json(&json!({"user": {"name": "a", "age": 1}}));
    let user = target.single_child("user").unwrap().unwrap();
    let observer = PathObserver::new(target.clone(), ["user", "name"]);
    let fired = Rc::new(Cell::new(0));
    let sink = Rc::clone(&fired);
    observer.on_change(move |_| sink.set(sink.get() + 1)).unwrap();

    let source = Element::from_json(&json!({"user": {"name": "b"}}));
    merge_with_identity_selector(&target, &source, array_by_field("id")).unwrap();
    assert!(target.single_child("user").unwrap().unwrap().ptr_eq(&user));
    assert_eq!(target.to_json(), json!({"user": {"name": "b", "age": 1}}));
    assert_eq!(fired.get(), 1);

    let again = Element::from_json(&json!({"user": {"name": "c"}}));
    merge_with_identity_selector(&target, &again, array_by_field("id")).unwrap();
    assert_eq!(fired.get(), 2);
    assert_eq!(
        observer.current().unwrap().first_leaf(),
        Some(&json!("c"))
    );
}

#[test]
fn one_batch_per_touched_node() {
    let target = Element::from_json(&json!({"a": 1, "b": 2, "c": {"d": 1}}));
    let root_batches = count_batches(&target);
    let nested = target.single_child("c").unwrap().unwrap();
    let nested_batches = count_batches(&nested);

    let source = Element::from_json(&json!({"a": 10, "b": 20, "e": 30, "c": {"d": 2}}));
    merge_with_identity_selector(&target, &source, array_by_field("id")).unwrap();

    assert_eq!(root_batches.get(), 1);
    assert_eq!(nested_batches.get(), 1);
}

#[test]
fn leaf_replacing_node_does_not_recurse() {
    let target = Element::from_json(&json!({"x": {"y": 1}}));
    let source = Element::from_json(&json!({"x": 5}));
    merge_with_identity_selector(&target, &source, array_by_field("id")).unwrap();
    assert_eq!(target.to_json(), json!({"x": 5}));
}

#[test]
fn custom_selector_can_keep_existing_values() {
    let target = Element::from_json(&json!({"a": 1, "list": [1, 2]}));
    let source = Element::from_json(&json!({"a": 2, "b": 3, "list": [9]}));

    merge(&target, &source, |old, new, _| match old {
        Some(existing) => Some(existing.clone()),
        None => Some(new.clone()),
    })
    .unwrap();

    assert_eq!(target.to_json(), json!({"a": 1, "list": [1, 2], "b": 3}));
}

#[test]
fn custom_selector_can_append_arrays() {
    let target = Element::from_json(&json!({"log": ["a"]}));
    let source = Element::from_json(&json!({"log": ["b", "c"]}));

    merge(&target, &source, |old, new, _| match (old, new) {
        (Some(Children::Array(old)), Children::Array(new)) => {
            Some(Children::Array(old.iter().chain(new).cloned().collect()))
        }
        _ => Some(new.clone()),
    })
    .unwrap();

    assert_eq!(target.to_json(), json!({"log": ["a", "b", "c"]}));
}

#[test]
fn objects_without_identity_are_replaced_by_incoming() {
    let doc = json!({"notes": [{"text": "a"}, {"text": "b"}]});
    let target = Element::from_json(&doc);
    let before = target.array_child("notes").unwrap().unwrap();
    let batches = count_batches(&target);

    let source = Element::from_json(&doc);
    let incoming = source.array_child("notes").unwrap().unwrap();
    merge_with_identity_selector(&target, &source, array_by_field("id")).unwrap();

    let after = target.array_child("notes").unwrap().unwrap();
    assert_eq!(target.to_json(), doc);
    assert_eq!(batches.get(), 1);
    assert!(after.iter().zip(&incoming).all(|(kept, new)| kept.ptr_eq(new)));
    assert!(after.iter().all(|kept| before.iter().all(|old| !kept.ptr_eq(old))));
}
