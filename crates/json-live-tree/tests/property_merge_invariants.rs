//! Property tests for the identity merge policy.

use std::cell::Cell;
use std::rc::Rc;

use json_live_tree::identity::array_by_field;
use json_live_tree::{merge_with_identity_selector, Element};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
    ]
}

/// Arrays of records with distinct `id` fields, so every element is matchable.
///
/// Objects without an identity are left out on purpose: they cannot be
/// matched, so merging equal content replaces them with the incoming nodes.
/// `merge_reconcile.rs` pins that behavior.
fn record_array() -> impl Strategy<Value = Value> {
    prop::collection::vec(scalar(), 0..4).prop_map(|values| {
        Value::Array(
            values
                .into_iter()
                .enumerate()
                .map(|(id, v)| json!({"id": id, "v": v}))
                .collect(),
        )
    })
}

fn object_of(values: impl Strategy<Value = Value>) -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-e]", values, 0..5)
        .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

fn document() -> impl Strategy<Value = Value> {
    let value = prop_oneof![
        scalar(),
        prop::collection::vec(scalar(), 0..4).prop_map(Value::Array),
        record_array(),
    ];
    object_of(value.prop_recursive(3, 32, 5, object_of))
}

fn nodes_of(element: &Element, out: &mut Vec<Element>) {
    if !element.is_node() {
        return;
    }
    out.push(element.clone());
    if let Ok(children) = element.children() {
        for (_, children) in children {
            for child in children.as_slice() {
                nodes_of(child, out);
            }
        }
    }
}

fn distinct_ids() -> impl Strategy<Value = Vec<i64>> {
    prop::sample::subsequence((0..8).collect::<Vec<i64>>(), 0..=8).prop_shuffle()
}

fn listed(ids: &[i64], tag: &str) -> Element {
    let list: Vec<Value> = ids.iter().map(|id| json!({"id": id, "v": tag})).collect();
    Element::from_json(&json!({ "list": list }))
}

fn id_of(element: &Element) -> i64 {
    element
        .single_child("id")
        .ok()
        .flatten()
        .and_then(|id| id.leaf_value().ok().and_then(Value::as_i64))
        .unwrap_or(-1)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Merging a document into an equal tree changes nothing and reports nothing.
    #[test]
    fn merging_equal_content_is_silent(doc in document()) {
        let target = Element::from_json(&doc);
        let mut nodes = Vec::new();
        nodes_of(&target, &mut nodes);
        let batches = Rc::new(Cell::new(0usize));
        for node in &nodes {
            let sink = Rc::clone(&batches);
            node.on_change(move |_| sink.set(sink.get() + 1)).unwrap();
        }

        merge_with_identity_selector(&target, &Element::from_json(&doc), array_by_field("id"))
            .unwrap();

        prop_assert_eq!(batches.get(), 0);
        prop_assert_eq!(target.to_json(), doc);
    }

    /// Incoming order first, then old-only entries; matched entries keep identity.
    #[test]
    fn arrays_reconcile_by_identity(old_ids in distinct_ids(), new_ids in distinct_ids()) {
        let target = listed(&old_ids, "old");
        let before = target.array_child("list").unwrap().unwrap_or_default();

        merge_with_identity_selector(&target, &listed(&new_ids, "new"), array_by_field("id"))
            .unwrap();

        let after = target.array_child("list").unwrap().unwrap_or_default();
        let expected: Vec<i64> = new_ids
            .iter()
            .copied()
            .chain(old_ids.iter().copied().filter(|id| !new_ids.contains(id)))
            .collect();
        prop_assert_eq!(after.iter().map(id_of).collect::<Vec<_>>(), expected);

        for element in &after {
            let id = id_of(element);
            let tag = if new_ids.contains(&id) { "new" } else { "old" };
            prop_assert_eq!(element.to_json(), json!({"id": id, "v": tag}));
            if let Some(previous) = before.iter().find(|old| id_of(old) == id) {
                prop_assert!(element.ptr_eq(previous));
            }
        }
    }
}
