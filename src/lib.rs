//! The core of a reactive query engine which maintains client-side view
//! subscriptions against a local relational replica. Queries are expressed
//! as an abstract syntax tree, rewritten by a cost-based planner which
//! decides, for each correlated subquery, whether the parent or the child
//! side should drive the iteration, and then executed as an incremental
//! dataflow pipeline which hydrates against a point-in-time snapshot and
//! thereafter emits add / remove / edit records as the replica advances.

#[macro_use]
extern crate tracing;

pub mod ast;
pub mod cnf;
pub mod cost;
pub mod dbs;
pub mod err;
pub mod flow;
pub mod plan;
pub mod rep;
pub mod sch;
