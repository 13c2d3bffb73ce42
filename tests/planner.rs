//! Planner behaviour observed end to end: a planned AST must produce the
//! same rows as the original, whichever side the planner chose to drive.

mod util;

use test_log::test;
use util::*;
use vantage_core::ast::{Cond, Correlation, Direction, Query, Related};
use vantage_core::cost::FixedCostModel;
use vantage_core::dbs::YieldConfig;
use vantage_core::plan::{analyse, plan, NoopObserver};
use vantage_core::rep::RawValue;

fn tracks_with_titled_album() -> Query {
	Query::new("track").order_by("id", Direction::Asc).where_exists(Related::new(
		Correlation::new(["albumId"], ["id"]),
		Query::new("album").filter(Cond::eq("title", "X")),
	))
}

fn seed_music(replica: &mut vantage_core::rep::MemReplica) {
	replica.seed(
		"album",
		vec![
			raw(vec![("id", RawValue::from("a1")), ("title", RawValue::from("X"))]),
			raw(vec![("id", RawValue::from("a2")), ("title", RawValue::from("Y"))]),
		],
	);
	replica.seed(
		"track",
		vec![
			raw(vec![("id", RawValue::from("t1")), ("albumId", RawValue::from("a1"))]),
			raw(vec![("id", RawValue::from("t2")), ("albumId", RawValue::from("a2"))]),
			raw(vec![("id", RawValue::from("t3")), ("albumId", RawValue::from("a1"))]),
			raw(vec![("id", RawValue::from("t4")), ("albumId", RawValue::Null)]),
		],
	);
}

#[test]
fn planned_and_original_queries_agree() {
	let schema = music_schema();
	let cost =
		FixedCostModel::new(schema.clone()).with_rows("track", 5000.0).with_rows("album", 2.0);
	let original = tracks_with_titled_album();
	let planned = plan(&original, &cost, &schema, &mut NoopObserver).unwrap();

	// The cost model pushed the child side into the driving seat
	let (_, report) = analyse(&original, &cost, &schema).unwrap();
	assert_eq!(report.attempts.len(), 2);

	let mut driver = driver(schema, seed_music, YieldConfig::Never);
	let original_adds =
		described(&changes(driver.add_query("qo", "original", &original, &timer()).unwrap()));
	let planned_adds =
		described(&changes(driver.add_query("qp", "planned", &planned, &timer()).unwrap()));
	assert_eq!(
		original_adds,
		vec![r#"add track {"id":"t1"}"#, r#"add track {"id":"t3"}"#]
	);
	assert_eq!(original_adds, planned_adds);
}

#[test]
fn statistics_backed_planning_uses_live_sources() {
	let schema = music_schema();
	let mut driver = driver(schema, seed_music, YieldConfig::Never);
	// Sources exist once a query references the tables
	driver.add_query("q1", "warm", &tracks_with_titled_album(), &timer()).unwrap();
	let planned = driver.plan_query(&tracks_with_titled_album()).unwrap();
	// Whatever direction won, executing the plan must agree with the
	// original result
	let planned_adds =
		described(&changes(driver.add_query("q2", "planned", &planned, &timer()).unwrap()));
	assert_eq!(
		planned_adds,
		vec![r#"add track {"id":"t1"}"#, r#"add track {"id":"t3"}"#]
	);
}
