#![allow(dead_code)]

use std::rc::Rc;
use vantage_core::dbs::{
	ChangeStream, Clock, DriverOptions, PipelineDriver, Timer, YieldConfig,
};
use vantage_core::flow::{RowChange, StreamItem};
use vantage_core::rep::{MemReplica, RawRow, RawValue};
use vantage_core::sch::{ClientSchema, ColumnType, TableSchema};

/// Issue tracker fixture: issues with related comments.
pub fn issues_schema() -> ClientSchema {
	ClientSchema::new([
		TableSchema::new("issues")
			.column("id", ColumnType::Number)
			.column("closed", ColumnType::Boolean)
			.primary_key(["id"]),
		TableSchema::new("comments")
			.column("id", ColumnType::Number)
			.column("issueID", ColumnType::Number)
			.primary_key(["id"]),
	])
}

/// A table with a secondary unique index on `name`.
pub fn uniques_schema() -> ClientSchema {
	ClientSchema::new([TableSchema::new("uniques")
		.column("id", ColumnType::String)
		.column("name", ColumnType::String)
		.primary_key(["id"])
		.unique(["name"])])
}

/// Music fixture for planner scenarios.
pub fn music_schema() -> ClientSchema {
	ClientSchema::new([
		TableSchema::new("track")
			.column("id", ColumnType::String)
			.nullable_column("albumId", ColumnType::String)
			.primary_key(["id"]),
		TableSchema::new("album")
			.column("id", ColumnType::String)
			.column("title", ColumnType::String)
			.primary_key(["id"]),
	])
}

pub fn raw(pairs: Vec<(&str, RawValue)>) -> RawRow {
	pairs.into_iter().map(|(column, value)| (column.to_owned(), value)).collect()
}

pub fn issue(id: i64, closed: bool) -> RawRow {
	raw(vec![("id", RawValue::from(id)), ("closed", RawValue::from(closed))])
}

pub fn comment(id: i64, issue_id: i64) -> RawRow {
	raw(vec![("id", RawValue::from(id)), ("issueID", RawValue::from(issue_id))])
}

pub fn unique_row(id: &str, name: &str) -> RawRow {
	raw(vec![("id", RawValue::from(id)), ("name", RawValue::from(name))])
}

/// A driver over an in-memory replica, initialised and ready
pub fn driver(
	schema: ClientSchema,
	seed: impl FnOnce(&mut MemReplica),
	yield_config: YieldConfig,
) -> PipelineDriver<MemReplica> {
	let mut replica = MemReplica::new(schema.clone());
	seed(&mut replica);
	let options = DriverOptions::default().with_yield_config(yield_config);
	let mut driver = PipelineDriver::new(replica, options);
	driver.init(schema).expect("driver init");
	driver
}

pub fn timer() -> Timer {
	Timer::system()
}

pub fn manual_timer(clock: impl Clock + 'static) -> Timer {
	Timer::new(Rc::new(clock))
}

/// Drain a stream into its row changes, dropping yield sentinels
pub fn changes(stream: ChangeStream) -> Vec<RowChange> {
	stream
		.filter_map(|item| match item {
			StreamItem::Change(change) => Some(change),
			StreamItem::Yield => None,
		})
		.collect()
}

/// A compact `kind table key` rendering for assertions
pub fn describe(change: &RowChange) -> String {
	format!("{} {} {}", change.kind, change.table, change.row_key.canonical())
}

pub fn described(changes: &[RowChange]) -> Vec<String> {
	changes.iter().map(describe).collect()
}
