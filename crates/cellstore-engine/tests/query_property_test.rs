//! Property tests: bbox queries agree with a brute-force R-tree oracle

mod common;

use cellstore_core::models::{BBox, Feature};
use common::{rect, test_settings, Harness};
use proptest::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::collections::BTreeSet;

type Indexed = GeomWithData<Rectangle<[f64; 2]>, String>;

fn arb_box(max_size: f64) -> impl Strategy<Value = [f64; 4]> {
    (-170.0..170.0f64, -80.0..80.0f64, 0.0..max_size, 0.0..max_size)
        .prop_map(|(x, y, w, h)| [x, y, x + w, y + h])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn bbox_query_matches_oracle(
        boxes in prop::collection::vec(arb_box(4.0), 1..24),
        queries in prop::collection::vec(arb_box(40.0), 1..6),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let h = Harness::new(test_settings());
            let mut entries = Vec::new();
            for (i, [w, s, e, n]) in boxes.iter().copied().enumerate() {
                let id = format!("f{:03}", i);
                h.store.put("ds", Feature::new(rect(w, s, e, n)).with_id(id.clone())).await.unwrap();
                entries.push(Indexed::new(Rectangle::from_corners([w, s], [e, n]), id));
            }
            let oracle = RTree::bulk_load(entries);

            for [w, s, e, n] in queries {
                let result = h.store.bbox_query("ds", &BBox::new(w, s, e, n).unwrap()).await.unwrap();
                let found: Vec<String> = result.features.iter().filter_map(|f| f.id.clone()).collect();
                let unique: BTreeSet<String> = found.iter().cloned().collect();
                prop_assert_eq!(found.len(), unique.len(), "duplicate features returned");

                let expected: BTreeSet<String> = oracle
                    .locate_in_envelope_intersecting(&AABB::from_corners([w, s], [e, n]))
                    .map(|entry| entry.data.clone())
                    .collect();
                prop_assert_eq!(unique, expected);
                prop_assert!(result.is_complete());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
