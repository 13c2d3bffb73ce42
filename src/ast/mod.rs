//! The abstract syntax tree for view subscription queries.
//!
//! A [`Query`] is an immutable description of a table scan with filters,
//! orderings, related subtrees and correlated subqueries. The planner
//! consumes one query tree and produces another with the flip flag set on
//! each correlated subquery; the dataflow builder then compiles the
//! planned tree into an operator pipeline.

pub mod cond;
pub mod operator;
pub mod order;
pub mod query;
pub mod value;

pub use cond::Cond;
pub use cond::CorrelatedSubquery;
pub use cond::Operand;
pub use operator::CompareOp;
pub use order::Basis;
pub use order::Direction;
pub use order::Order;
pub use order::Orders;
pub use order::Start;
pub use query::Correlation;
pub use query::Query;
pub use query::Related;
pub use query::System;
pub use value::Json;
pub use value::Key;
pub use value::Row;
pub use value::RowKey;
pub use value::Value;
