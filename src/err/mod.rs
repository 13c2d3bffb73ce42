use thiserror::Error;

/// The error type for every fallible operation in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The client schema refers to a table which is not replicated
	#[error("Table '{table}' is not replicated")]
	TableNotReplicated {
		table: String,
	},

	/// The client schema refers to a column which is not replicated, or
	/// the replicated column type is incompatible with the client type
	#[error("Schema mismatch on '{table}.{column}': {message}")]
	SchemaMismatch {
		table: String,
		column: String,
		message: String,
	},

	/// A replica row contained a value which can not be represented
	#[error("Unsupported value in '{table}.{column}': {message}")]
	UnsupportedValue {
		table: String,
		column: String,
		message: String,
	},

	/// A replica row contained JSON which could not be parsed
	#[error("Invalid JSON in '{table}.{column}': {source}")]
	InvalidJson {
		table: String,
		column: String,
		#[source]
		source: serde_json::Error,
	},

	/// A push removed or edited a row which does not exist in the source
	#[error("Row '{key}' was not found in table '{table}'")]
	RowNotFound {
		table: String,
		key: String,
	},

	/// A push added a row whose primary key already exists in the source
	#[error("Row '{key}' already exists in table '{table}'")]
	RowConflict {
		table: String,
		key: String,
	},

	/// All pipelines must be discarded and every query re-added. This is a
	/// cooperative cancellation signal rather than a failure: it is raised
	/// when an advancement exceeds its hydration-relative time budget, or
	/// when a truncate entry appears in a diff. Callers catch it, call
	/// `reset`, and re-add their queries.
	#[error("Pipelines must be reset")]
	ResetPipelines,

	/// An AST reached the executor with unsubstituted static operands.
	/// This is a programming error in the caller.
	#[error("Static operand '{name}' was not substituted before execution")]
	StaticNotSubstituted {
		name: String,
	},

	/// A query referenced a table which is not in the client schema
	#[error("Table '{table}' does not exist")]
	TableNotFound {
		table: String,
	},

	/// A query referenced a column which is not in the table schema
	#[error("Column '{column}' does not exist on table '{table}'")]
	ColumnNotFound {
		table: String,
		column: String,
	},

	/// The driver was used before `init` was called
	#[error("The pipeline driver has not been initialised")]
	NotInitialised,

	/// The snapshotter returned a diff which does not start at the
	/// driver's current replica version
	#[error("Diff starts at version '{diff}' but the replica is at '{replica}'")]
	VersionMismatch {
		diff: String,
		replica: String,
	},
}

impl Error {
	/// Whether this error is the cooperative reset signal
	pub fn is_reset(&self) -> bool {
		matches!(self, Error::ResetPipelines)
	}
}
