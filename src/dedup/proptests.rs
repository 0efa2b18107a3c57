//! Property-based tests for duplicate removal

use super::*;
use proptest::prelude::*;
use serde_json::json;

fn arb_invocation() -> impl Strategy<Value = ToolInvocation> {
    (
        "call_[a-z0-9]{4}",
        prop_oneof![Just("search"), Just("fetch"), Just("open")],
        proptest::collection::btree_map("[a-c]", 0i64..3, 0..3),
    )
        .prop_map(|(id, name, args)| {
            let map = args.into_iter().map(|(k, v)| (k, json!(v))).collect();
            ToolInvocation::new(id, name, map)
        })
}

proptest! {
    #[test]
    fn prop_dedup_is_idempotent(invocations in proptest::collection::vec(arb_invocation(), 0..12)) {
        let once = dedup_invocations(invocations);
        let twice = dedup_invocations(once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_kept_invocations_have_unique_keys(invocations in proptest::collection::vec(arb_invocation(), 0..12)) {
        let kept = dedup_invocations(invocations);
        let keys: HashSet<_> = kept.iter().map(invocation_key).collect();
        prop_assert_eq!(keys.len(), kept.len());
    }

    #[test]
    fn prop_dedup_preserves_first_occurrence_order(invocations in proptest::collection::vec(arb_invocation(), 0..12)) {
        let kept = dedup_invocations(invocations.clone());
        let mut seen = HashSet::new();
        let expected: Vec<_> = invocations
            .into_iter()
            .filter(|i| seen.insert(invocation_key(i)))
            .collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn prop_dedup_message_matches_list_dedup(invocations in proptest::collection::vec(arb_invocation(), 0..12)) {
        let message = dedup_message(ConversationMessage::assistant("", invocations.clone()));
        let kept: Vec<ToolInvocation> = message.invocations().cloned().collect();
        prop_assert_eq!(kept, dedup_invocations(invocations));
    }
}
