use ftmq_sql::{ModelRegistry, PropertyRegistry, PropertyType, Query, SearchQuery};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const FIELDS: [&str; 7] = [
    "name",
    "country",
    "amount",
    "schema",
    "id",
    "context.scope",
    "keywords[]",
];

fn registry() -> Arc<dyn PropertyRegistry> {
    Arc::new(
        ModelRegistry::new()
            .with_property("name", PropertyType::Name)
            .with_property("country", PropertyType::Country)
            .with_property("amount", PropertyType::Number),
    )
}

fn query() -> Query {
    Query::new("ftm", registry())
}

fn arb_field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(FIELDS.to_vec())
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9 ?%_]{0,8}".prop_map(Value::String),
        any::<i32>().prop_map(|n| json!(n)),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn arb_lookup() -> impl Strategy<Value = (String, Value)> {
    let scalar_ops = prop::sample::select(vec![
        "", "__like", "__ilike", "__gt", "__gte", "__lt", "__lte", "__not", "__in",
    ]);
    let list_ops = prop::sample::select(vec!["", "__in", "__not"]);

    prop_oneof![
        (arb_field(), scalar_ops, arb_scalar())
            .prop_map(|(field, op, value)| (format!("{}{}", field, op), value)),
        (arb_field(), list_ops, prop::collection::vec(arb_scalar(), 1..4))
            .prop_map(|(field, op, values)| (format!("{}{}", field, op), Value::Array(values))),
        (arb_field(), any::<bool>())
            .prop_map(|(field, flag)| (format!("{}__null", field), Value::Bool(flag))),
    ]
}

// distinct keys, so the merge order cannot matter
fn arb_lookups() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(arb_lookup(), 0..6).prop_map(|lookups| {
        lookups
            .into_iter()
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .collect()
    })
}

proptest! {
    #[test]
    fn placeholders_match_parameters(lookups in arb_lookups()) {
        let q = query().and_where(lookups).unwrap();
        let (sql, params) = q.to_sql();

        prop_assert_eq!(sql.matches('?').count(), params.len());
        prop_assert_eq!(q.count_sql().matches('?').count(), params.len());
        prop_assert_eq!(q.schema_groups_sql().matches('?').count(), params.len());
    }

    #[test]
    fn lookup_order_does_not_matter(
        (lookups, shuffled) in arb_lookups()
            .prop_flat_map(|l| (Just(l.clone()), Just(l).prop_shuffle()))
    ) {
        let a = query().and_where(lookups).unwrap();
        let b = shuffled
            .into_iter()
            .try_fold(query(), |q, (k, v)| q.where_field(k, v))
            .unwrap();

        prop_assert_eq!(a.to_sql(), b.to_sql());
    }

    #[test]
    fn chaining_leaves_receiver_untouched(
        lookups in arb_lookups(),
        extra in arb_lookup(),
        start in 0i64..1000,
        len in 1i64..100,
    ) {
        let base = query().and_where(lookups).unwrap();
        let before = base.to_sql();

        let derived = base
            .where_field(extra.0, extra.1)
            .unwrap()
            .order_by_asc(["amount"])
            .unwrap()
            .slice(Some(start), Some(start + len), None)
            .unwrap();

        let suffix = format!("LIMIT {} OFFSET {}", len, start);
        prop_assert_eq!(base.to_sql(), before);
        prop_assert!(derived.to_string().ends_with(&suffix));
    }

    #[test]
    fn search_term_binds_last(lookups in arb_lookups(), term in "[a-z]{1,12}") {
        let q = SearchQuery::new(query().and_where(lookups).unwrap(), Some(&term));
        let (sql, params) = q.to_sql();

        prop_assert_eq!(sql.matches('?').count(), params.len());
        let quoted = Value::String(format!("\"{}\"", term));
        prop_assert_eq!(params.last(), Some(&quoted));
    }
}
