//! Property-based tests for the lattice laws every liftable merge relies on
//!
//!  - Commutativity: a ⊔ b = b ⊔ a
//!  - Associativity: (a ⊔ b) ⊔ c = a ⊔ (b ⊔ c)
//!  - Idempotence:  a ⊔ a = a
//!  - Bottom is identity: a ⊔ ⊥ = a

use lift_core::lattice::{join_all, Lattice};
use lift_core::max::Max;
use lift_core::operation::NodeId;
use lift_core::set_union::SetUnion;
use lift_core::vector_clock::{CausalOrder, VectorClock};
use proptest::prelude::*;

fn clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::btree_map(0u8..4, 0u64..6, 0..4).prop_map(|entries| {
        VectorClock::from_entries(
            entries
                .into_iter()
                .map(|(node, counter)| (NodeId::new(format!("n{}", node)), counter)),
        )
    })
}

fn set_strategy() -> impl Strategy<Value = SetUnion<String>> {
    prop::collection::vec("[a-z]{1,4}", 0..10).prop_map(|members| members.into_iter().collect())
}

fn max_strategy() -> impl Strategy<Value = Max<i64>> {
    prop::option::of(-1000i64..1000).prop_map(|value| match value {
        Some(v) => Max::new(v),
        None => Max::bottom(),
    })
}

// ============================================================================
// VectorClock
// ============================================================================

proptest! {
    #[test]
    fn clock_merge_is_commutative(a in clock_strategy(), b in clock_strategy()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn clock_merge_is_associative(
        a in clock_strategy(),
        b in clock_strategy(),
        c in clock_strategy()
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn clock_merge_is_idempotent(a in clock_strategy()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn clock_merge_dominates_inputs(a in clock_strategy(), b in clock_strategy()) {
        let merged = a.merged_with(&b);
        prop_assert!(merged.dominates(&a));
        prop_assert!(merged.dominates(&b));
    }

    #[test]
    fn clock_compare_is_antisymmetric(a in clock_strategy(), b in clock_strategy()) {
        let expected = match a.compare(&b) {
            CausalOrder::Before => CausalOrder::After,
            CausalOrder::After => CausalOrder::Before,
            other => other,
        };
        prop_assert_eq!(b.compare(&a), expected);
    }

    #[test]
    fn clock_tick_moves_strictly_forward(a in clock_strategy(), node in 0u8..4) {
        let mut ticked = a.clone();
        let snapshot = ticked.tick(&NodeId::new(format!("n{}", node)));
        prop_assert_eq!(a.compare(&snapshot), CausalOrder::Before);
    }
}

// ============================================================================
// SetUnion
// ============================================================================

proptest! {
    #[test]
    fn set_union_is_associative(
        a in set_strategy(),
        b in set_strategy(),
        c in set_strategy()
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn set_union_bottom_is_identity(a in set_strategy()) {
        prop_assert_eq!(a.join(&SetUnion::bottom()), a.clone());
        prop_assert_eq!(SetUnion::bottom().join(&a), a);
    }

    #[test]
    fn set_union_join_subsumes_both_sides(a in set_strategy(), b in set_strategy()) {
        let joined = a.join(&b);
        prop_assert!(joined.subsumes(&a));
        prop_assert!(joined.subsumes(&b));
    }
}

// ============================================================================
// Max
// ============================================================================

proptest! {
    #[test]
    fn max_is_commutative(a in max_strategy(), b in max_strategy()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn max_is_associative(a in max_strategy(), b in max_strategy(), c in max_strategy()) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn max_is_idempotent(a in max_strategy()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn join_all_ignores_order(mut values in prop::collection::vec(max_strategy(), 0..8)) {
        let forward: Max<i64> = join_all(values.iter());
        values.reverse();
        let backward: Max<i64> = join_all(values.iter());
        prop_assert_eq!(forward, backward);
    }
}
