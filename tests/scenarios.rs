//! End-to-end scenarios over toy fixtures: hydration order, related
//! subtrees, cascaded removals, unique-key eviction, and cooperative
//! yielding.

mod util;

use test_log::test;
use util::*;
use vantage_core::ast::{Correlation, Direction, Query, Related};
use vantage_core::dbs::YieldConfig;
use vantage_core::flow::{ChangeKind, StreamItem};

fn issues_desc() -> Query {
	Query::new("issues").order_by("id", Direction::Desc)
}

fn issues_with_comments() -> Query {
	issues_desc().with_related(Related::new(
		Correlation::new(["id"], ["issueID"]),
		Query::new("comments").order_by("id", Direction::Desc),
	))
}

#[test]
fn hydration_emits_in_query_order() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", vec![issue(1, false), issue(2, true), issue(3, false)]);
		},
		YieldConfig::Never,
	);
	let stream = driver.add_query("q1", "issues-desc", &issues_desc(), &timer()).unwrap();
	let changes = changes(stream);
	assert_eq!(
		described(&changes),
		vec![
			r#"add issues {"id":3}"#,
			r#"add issues {"id":2}"#,
			r#"add issues {"id":1}"#,
		]
	);
}

#[test]
fn related_children_follow_their_parent() {
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
	let stream =
		driver.add_query("q1", "issues-with-comments", &issues_with_comments(), &timer()).unwrap();
	let changes = changes(stream);
	assert_eq!(
		described(&changes),
		vec![
			r#"add issues {"id":3}"#,
			r#"add issues {"id":2}"#,
			r#"add comments {"id":22}"#,
			r#"add comments {"id":21}"#,
			r#"add comments {"id":20}"#,
			r#"add issues {"id":1}"#,
			r#"add comments {"id":10}"#,
		]
	);
}

#[test]
fn removing_a_parent_removes_its_children() {
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
	driver.add_query("q1", "issues-with-comments", &issues_with_comments(), &timer()).unwrap();

	driver.snapshotter_mut().queue_delete("issues", issue(1, false));
	driver.snapshotter_mut().queue_delete("comments", comment(21, 2));
	let advancement = driver.advance(&timer()).unwrap();
	let changes = changes(advancement.changes);
	assert_eq!(
		described(&changes),
		vec![
			r#"remove issues {"id":1}"#,
			r#"remove comments {"id":10}"#,
			r#"remove comments {"id":21}"#,
		]
	);
}

#[test]
fn unique_conflicts_evict_then_add() {
	let mut driver = driver(
		uniques_schema(),
		|replica| {
			replica.seed("uniques", vec![unique_row("foo", "bar"), unique_row("boo", "dar")]);
		},
		YieldConfig::Never,
	);
	let query = Query::new("uniques").order_by("id", Direction::Asc);
	driver.add_query("q1", "uniques", &query, &timer()).unwrap();

	driver.snapshotter_mut().queue_delete("uniques", unique_row("foo", "bar"));
	driver.snapshotter_mut().queue_insert("uniques", unique_row("baz", "bar"));
	driver.snapshotter_mut().queue_insert("uniques", unique_row("foo", "wuzzy"));
	let advancement = driver.advance(&timer()).unwrap();
	let changes = changes(advancement.changes);
	assert_eq!(
		described(&changes),
		vec![
			r#"remove uniques {"id":"foo"}"#,
			r#"add uniques {"id":"baz"}"#,
			r#"add uniques {"id":"foo"}"#,
		]
	);
	// The second add carries the re-used key with its new name
	assert_eq!(
		changes[2].row.as_ref().unwrap().canonical(),
		r#"{"id":"foo","name":"wuzzy"}"#
	);
}

#[test]
fn a_conflicting_add_in_one_entry_orders_the_eviction_first() {
	let mut driver = driver(
		uniques_schema(),
		|replica| {
			replica.seed("uniques", vec![unique_row("foo", "bar"), unique_row("boo", "dar")]);
		},
		YieldConfig::Never,
	);
	let query = Query::new("uniques").order_by("id", Direction::Asc);
	driver.add_query("q1", "uniques", &query, &timer()).unwrap();

	driver.snapshotter_mut().queue_insert("uniques", unique_row("baz", "bar"));
	let advancement = driver.advance(&timer()).unwrap();
	let changes = changes(advancement.changes);
	assert_eq!(
		described(&changes),
		vec![r#"remove uniques {"id":"foo"}"#, r#"add uniques {"id":"baz"}"#]
	);
	assert_eq!(driver.metrics().unique_evictions, 1);
}

#[test]
fn yield_sentinels_interleave_every_n_rows() {
	let mut driver = driver(
		issues_schema(),
		|replica| {
			replica.seed("issues", (1..=9).map(|id| issue(id, false)).collect());
		},
		YieldConfig::EveryRows(3),
	);
	let query = Query::new("issues").order_by("id", Direction::Asc);
	let stream = driver.add_query("q1", "issues", &query, &timer()).unwrap();
	let items: Vec<StreamItem> = stream.collect();
	let yields = items.iter().filter(|item| item.is_yield()).count();
	let adds = items
		.iter()
		.filter(|item| item.change().map(|c| c.kind == ChangeKind::Add).unwrap_or(false))
		.count();
	assert_eq!(adds, 9);
	assert_eq!(yields, 3);
	// Three adds, a yield, three adds, a yield, three adds, a yield
	let pattern: Vec<bool> = items.iter().map(StreamItem::is_yield).collect();
	assert_eq!(
		pattern,
		vec![
			false, false, false, true, false, false, false, true, false, false, false, true
		]
	);
}
