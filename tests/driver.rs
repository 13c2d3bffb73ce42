//! Behavioural coverage of the pipeline driver: hydration round-trips,
//! advance correctness, deduplication, edit detection, permissions
//! emission rules, and budget enforcement.

mod util;

use std::time::Duration;
use test_log::test;
use util::*;
use vantage_core::ast::{CompareOp, Cond, Correlation, Direction, Query, Related, System, Value};
use vantage_core::dbs::{ManualClock, YieldConfig};

fn open_issues() -> Query {
	Query::new("issues").order_by("id", Direction::Asc).filter(Cond::eq("closed", false))
}

#[test]
fn hydration_matches_the_non_incremental_result() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed(
				"issues",
				vec![
					issue(1, false),
					issue(2, true),
					issue(3, false),
					issue(4, true),
					issue(5, false),
				],
			);
		},
		YieldConfig::Never,
	);
	let stream = driver.add_query("q1", "open-issues", &open_issues(), &timer()).unwrap();
	let changes = changes(stream);
	assert_eq!(
		described(&changes),
		vec![
			r#"add issues {"id":1}"#,
			r#"add issues {"id":3}"#,
			r#"add issues {"id":5}"#,
		]
	);
}

#[test]
fn advance_nets_out_to_the_new_snapshot() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false), issue(2, true), issue(3, false)]);
		},
		YieldConfig::Never,
	);
	driver.add_query("q1", "open-issues", &open_issues(), &timer()).unwrap();

	driver.snapshotter_mut().queue_insert("issues", issue(4, false));
	driver.snapshotter_mut().queue_update("issues", issue(3, false), issue(3, true));
	driver.snapshotter_mut().queue_delete("issues", issue(1, false));
	let advancement = driver.advance(&timer()).unwrap();
	assert_eq!(advancement.num_changes, 3);
	let changes = changes(advancement.changes);
	assert_eq!(
		described(&changes),
		vec![
			r#"add issues {"id":4}"#,
			r#"remove issues {"id":3}"#,
			r#"remove issues {"id":1}"#,
		]
	);
}

#[test]
fn a_row_matching_both_or_branches_appears_once() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false), issue(2, false)]);
		},
		YieldConfig::Never,
	);
	let query = Query::new("issues").order_by("id", Direction::Asc).filter(Cond::Or(vec![
		Cond::eq("closed", false),
		Cond::cmp("id", CompareOp::MoreThan, 0),
	]));
	let stream = driver.add_query("q1", "either", &query, &timer()).unwrap();
	let changes = changes(stream);
	assert_eq!(changes.len(), 2);
}

#[test]
fn edits_stay_single_and_key_changes_split() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false), issue(2, true)]);
		},
		YieldConfig::Never,
	);
	let query = Query::new("issues").order_by("id", Direction::Asc);
	driver.add_query("q1", "issues", &query, &timer()).unwrap();

	driver.snapshotter_mut().queue_update("issues", issue(1, false), issue(1, true));
	driver.snapshotter_mut().queue_update("issues", issue(2, true), issue(5, true));
	let advancement = driver.advance(&timer()).unwrap();
	let changes = changes(advancement.changes);
	assert_eq!(
		described(&changes),
		vec![
			r#"edit issues {"id":1}"#,
			r#"remove issues {"id":2}"#,
			r#"add issues {"id":5}"#,
		]
	);
	assert_eq!(changes[0].row.as_ref().unwrap().get("closed"), Some(&Value::Bool(true)));
}

#[test]
fn permissions_subtree_rows_are_never_emitted() {
	let permissions_gate = Related::new(
		Correlation::new(["id"], ["issueID"]),
		Query::new("comments"),
	)
	.with_system(System::Permissions);
	let query = Query::new("issues")
		.order_by("id", Direction::Desc)
		.where_exists(permissions_gate);

	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false), issue(2, true), issue(3, false)]);
			replica.seed(
				"comments",
				vec![comment(10, 1), comment(20, 2), comment(21, 2), comment(22, 2)],
			);
		},
		YieldConfig::Never,
	);
	let stream = driver.add_query("q1", "visible-issues", &query, &timer()).unwrap();
	let changes_hydrated = changes(stream);
	// Issue three has no comments, so the gate hides it; no comment rows
	// ever reach the subscriber
	assert_eq!(
		described(&changes_hydrated),
		vec![r#"add issues {"id":2}"#, r#"add issues {"id":1}"#]
	);

	// Dropping issue one's only comment revokes its visibility
	driver.snapshotter_mut().queue_delete("comments", comment(10, 1));
	let advancement = driver.advance(&timer()).unwrap();
	let advanced = changes(advancement.changes);
	assert_eq!(described(&advanced), vec![r#"remove issues {"id":1}"#]);
}

#[test]
fn duplicate_transformation_hashes_are_idempotent() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false)]);
		},
		YieldConfig::Never,
	);
	let first = driver.add_query("q1", "issues", &open_issues(), &timer()).unwrap();
	assert_eq!(changes(first).len(), 1);
	let second = driver.add_query("q1", "issues", &open_issues(), &timer()).unwrap();
	assert_eq!(changes(second).len(), 0);
}

#[test]
fn get_row_passes_through_to_the_source() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false)]);
		},
		YieldConfig::Never,
	);
	driver.add_query("q1", "issues", &open_issues(), &timer()).unwrap();
	let key = [("id".to_string(), Value::from(1))].into_iter().collect();
	let row = driver.get_row("issues", &key).unwrap();
	assert_eq!(row.get("closed"), Some(&Value::Bool(false)));
	assert!(driver.get_row("comments", &key).is_none());
}

#[test]
fn over_budget_advances_reset_and_recover() {
	let clock = ManualClock::new();
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false)]);
		},
		YieldConfig::Never,
	);

	// Hydration observed as one hundred milliseconds
	let hydration_timer = manual_timer(clock.clone());
	clock.set(Duration::from_millis(100));
	driver
		.add_query(
			"q1",
			"issues",
			&Query::new("issues").order_by("id", Direction::Asc),
			&hydration_timer,
		)
		.unwrap();

	// Four entries at thirty simulated milliseconds per budget check:
	// sixty milliseconds in with one of four entries processed trips the
	// half-budget rule
	for id in 10..14 {
		driver.snapshotter_mut().queue_insert("issues", issue(id, false));
	}
	clock.auto_step(Duration::from_millis(30));
	let advance_timer = manual_timer(clock.clone());
	let error = driver.advance(&advance_timer).unwrap_err();
	assert!(error.is_reset());
	assert_eq!(driver.metrics().advance_aborts, 1);

	// The caller resets and re-adds; the aborted entries surface through
	// the fresh hydration instead
	clock.auto_step(Duration::ZERO);
	driver.reset(issues_schema()).unwrap();
	assert_eq!(driver.metrics().pipelines_reset, 1);
	let rehydrated = driver
		.add_query("q1", "issues", &Query::new("issues").order_by("id", Direction::Asc), &manual_timer(clock.clone()))
		.unwrap();
	assert_eq!(changes(rehydrated).len(), 5);

	// With hydration near zero the floor still grants enough budget for
	// a quick advance to complete
	for id in 20..22 {
		driver.snapshotter_mut().queue_insert("issues", issue(id, false));
	}
	clock.auto_step(Duration::from_millis(10));
	let advancement = driver.advance(&manual_timer(clock.clone())).unwrap();
	assert_eq!(advancement.num_changes, 2);
}
