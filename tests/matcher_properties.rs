//! Property tests for structural matching
//!
//! Generated trees never carry `/` properties, so every node compares exactly.

use parley::data::{Node, NodeList, Value};
use parley::matcher::{MatchOutcome, try_validate, validate};
use proptest::prelude::*;

fn name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{0,4}"
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Empty),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        any::<u16>().prop_map(Value::from),
        "[a-z0-9 ]{0,8}".prop_map(Value::from),
        proptest::collection::vec(any::<u8>(), 1..6).prop_map(Value::from),
    ]
}

fn node() -> impl Strategy<Value = Node> {
    let leaf = (
        name(),
        value(),
        proptest::collection::btree_map("[a-z]{1,3}", "[a-z0-9]{0,3}", 0..3),
    )
        .prop_map(|(name, value, properties)| {
            properties
                .into_iter()
                .fold(Node::with_value(name, value), |node, (k, v)| node.property(k, v))
        });

    leaf.prop_recursive(3, 24, 4, |inner| {
        (name(), proptest::collection::vec(inner, 1..4))
            .prop_map(|(name, children)| Node::new(name).children(children))
    })
}

fn nodes() -> impl Strategy<Value = Vec<Node>> {
    proptest::collection::vec(node(), 0..6)
}

proptest! {
    #[test]
    fn prop_every_tree_matches_itself(nodes in nodes()) {
        let list: NodeList = nodes.into();
        prop_assert!(validate(&list, &list).is_ok());
    }

    #[test]
    fn prop_sibling_order_is_irrelevant(nodes in nodes(), seed in any::<u64>()) {
        let expected: NodeList = nodes.clone().into();
        let mut shuffled = nodes;
        if !shuffled.is_empty() {
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            if len > 2 {
                shuffled.swap(0, len - 1);
            }
        }
        prop_assert!(validate(&expected, &shuffled.into()).is_ok());
    }

    #[test]
    fn prop_unexpected_extras_are_tolerated(nodes in nodes(), extra in nodes()) {
        let expected: NodeList = nodes.clone().into();
        let actual: NodeList = extra.into_iter().chain(nodes).collect();
        prop_assert!(validate(&expected, &actual).is_ok());
    }

    #[test]
    fn prop_empty_pattern_matches_anything(nodes in nodes()) {
        prop_assert!(try_validate(&NodeList::new(), &nodes.into()).is_match());
    }

    #[test]
    fn prop_missing_node_is_reported(nodes in proptest::collection::vec(node(), 1..6)) {
        let expected: NodeList = nodes.clone().into();
        let mut actual = nodes;
        let removed = actual.remove(0);

        match try_validate(&expected, &actual.into()) {
            MatchOutcome::Matched { .. } => prop_assert!(false, "removal of {removed:?} went unnoticed"),
            MatchOutcome::Failed(err) => prop_assert!(err.witness().is_some()),
        }
    }
}
