//! Query building and relationship planning over the shared sample domain.

use harbor_query::filter::LogicalOperator;
use harbor_query::query::Query;
use harbor_query::relationships::{LoadStrategy, plan_all, plan_target};
use harbor_query::schema::Model;
use harbor_query::sql::compile_select;
use harbor_test_support::{FixedClock, Order, sample_registry};
use serde_json::json;

#[test]
fn test_plan_has_one_path_per_leaf_of_the_declaration_tree() {
    // Arrange
    let registry = sample_registry();

    // Act
    let plan = plan_all(&registry, Order::NAME).unwrap();

    // Assert
    let rendered: Vec<String> = plan.paths.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec!["order.line_items.adjustments", "order.customer.region"]
    );
    assert_eq!(plan.joins.len(), 2);
}

#[test]
fn test_plan_target_finds_parent_when_no_child_matches() {
    let registry = sample_registry();

    let plan = plan_target(&registry, Order::NAME, "customer").unwrap();

    assert_eq!(plan.paths.len(), 1);
    assert_eq!(plan.paths[0].steps()[0].strategy, LoadStrategy::Join);
}

#[test]
fn test_status_and_amount_filter_selects_matching_orders() {
    // Arrange
    let registry = sample_registry();
    let clock = FixedClock::default();
    let mut query = Query::new(registry.get(Order::NAME).unwrap());
    query
        .filter(
            LogicalOperator::And,
            [("status__eq", json!("active")), ("amount__gte", json!(100))],
        )
        .unwrap();
    let mut active_large = Order::new(&clock, 150, None);
    active_large.status = "active".to_owned();
    let mut active_small = Order::new(&clock, 99, None);
    active_small.status = "active".to_owned();
    let pending_large = Order::new(&clock, 500, None);

    // Act
    let matched: Vec<bool> = [&active_large, &active_small, &pending_large]
        .iter()
        .map(|order| query.matches(&|column: &str| order.field(column)))
        .collect();

    // Assert
    assert_eq!(matched, vec![true, false, false]);
}

#[test]
fn test_second_page_of_ten_compiles_to_offset_ten_limit_ten() {
    let registry = sample_registry();
    let mut query = Query::new(registry.get(Order::NAME).unwrap());

    query.paginate(2, 10).unwrap();
    let sql = compile_select(&query, &registry).unwrap();

    assert_eq!(query.offset(), Some(10));
    assert_eq!(query.limit(), Some(10));
    assert_eq!(
        sql.sql(),
        r#"SELECT "orders".* FROM "orders" LIMIT $1 OFFSET $2"#
    );
}
