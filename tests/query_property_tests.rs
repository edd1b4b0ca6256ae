//! Property-based tests for query composition
//!
//! Criteria are conjunctive: the result of a query is the intersection of the results
//! of its criteria taken one at a time, in store order. An empty query returns every
//! record of the type.

use doc_workflow::{
    Actor, DocumentService, DocumentType, EngineConfig, FieldValue, FilterCriterion, FilterQuery,
    NewRecord, RecordId, Role,
};
use proptest::prelude::*;

const NAMES: [&str; 4] = ["台式电脑", "笔记本电脑", "Office Chair", "chair mat"];

fn criterion_strategy() -> impl Strategy<Value = FilterCriterion> {
    prop_oneof![
        prop::sample::select(vec!["电脑", "CHAIR", "mat", "x"])
            .prop_map(|needle| FilterCriterion::contains("assetName", needle)),
        (prop::option::of(0i64..100), prop::option::of(0i64..100)).prop_map(|(min, max)| {
            FilterCriterion::range(
                "estimatedValue",
                min.map(FieldValue::Integer),
                max.map(FieldValue::Integer),
            )
        }),
        prop::sample::subsequence(NAMES.to_vec(), 0..=NAMES.len())
            .prop_map(|names| FilterCriterion::in_set("assetName", names)),
        prop::sample::select(vec!["pending", "approved"])
            .prop_map(|status| FilterCriterion::equals("status", status)),
    ]
}

fn seed(service: &DocumentService, values: &[(usize, i64)]) -> Vec<RecordId> {
    let applicant = Actor::new("user_seed", "seed", Role::Applicant);
    values
        .iter()
        .map(|(name, value)| {
            let draft = NewRecord::new(DocumentType::BorrowRequest)
                .set("applicant", "Li Lei")
                .set("assetName", NAMES[*name % NAMES.len()])
                .set("estimatedValue", *value);
            service.create_record(draft, &applicant).unwrap().id
        })
        .collect()
}

fn ids(service: &DocumentService, query: &FilterQuery) -> Vec<RecordId> {
    service
        .query(DocumentType::BorrowRequest, query)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn conjunction_is_intersection(
        values in prop::collection::vec((0usize..4, 0i64..100), 0..12),
        criteria in prop::collection::vec(criterion_strategy(), 0..4),
    ) {
        let service = DocumentService::open(&EngineConfig::temporary()).unwrap();
        let all = seed(&service, &values);

        prop_assert_eq!(ids(&service, &FilterQuery::new()), all.clone());

        let combined = ids(&service, &FilterQuery::from(criteria.clone()));
        let expected: Vec<RecordId> = all
            .into_iter()
            .filter(|id| {
                criteria.iter().all(|c| {
                    ids(&service, &FilterQuery::new().and(c.clone())).contains(id)
                })
            })
            .collect();
        prop_assert_eq!(combined, expected);
    }

    /// Adding a criterion can only narrow a result.
    #[test]
    fn criteria_only_narrow(
        values in prop::collection::vec((0usize..4, 0i64..100), 1..10),
        first in criterion_strategy(),
        second in criterion_strategy(),
    ) {
        let service = DocumentService::open(&EngineConfig::temporary()).unwrap();
        seed(&service, &values);

        let wide = ids(&service, &FilterQuery::new().and(first.clone()));
        let narrow = ids(&service, &FilterQuery::new().and(first).and(second));
        prop_assert!(narrow.iter().all(|id| wide.contains(id)));
    }
}
