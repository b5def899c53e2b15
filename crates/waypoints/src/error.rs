//! Error types for configuration, wire encoding and decoding, and transport.

use std::path::PathBuf;

use thiserror::Error;

use crate::command::RecordRef;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// An interval that must be non-zero was configured as zero.
	#[error("{0} must be greater than zero")]
	ZeroInterval(&'static str),
}

/// Errors produced while decoding one outbound mutation line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
	/// The line was empty or whitespace only.
	#[error("empty command line")]
	Empty,

	/// The leading verb is not `add`, `modify` or `remove`.
	#[error("unknown command verb: {0}")]
	UnknownVerb(String),

	/// A required positional field is missing.
	#[error("missing field: {0}")]
	MissingField(&'static str),

	/// A numeric field could not be parsed.
	#[error("invalid number for {field}: {value}")]
	InvalidNumber {
		/// Name of the offending field.
		field: &'static str,
		/// Raw text that failed to parse.
		value: String,
	},

	/// A boolean field was neither `true` nor `false`.
	#[error("invalid boolean for {field}: {value}")]
	InvalidBool {
		/// Name of the offending field.
		field: &'static str,
		/// Raw text that failed to parse.
		value: String,
	},

	/// Extra text followed a command that takes no trailing title.
	#[error("unexpected trailing input: {0}")]
	Trailing(String),
}

/// Errors produced while encoding a command into its outbound line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandEncodeError {
	/// The icon field would be an empty token.
	#[error("icon must not be empty")]
	EmptyIcon,

	/// The icon would split into several tokens and shift every later field.
	#[error("icon must not contain whitespace: {0:?}")]
	IconWhitespace(String),

	/// An id target is not present in the cached snapshot.
	#[error("target {0} is not in the cached snapshot")]
	Unresolved(RecordRef),
}

/// Errors reported by a [`crate::Transport`] when a line cannot be handed off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	/// The outbound channel to the remote peer is closed.
	#[error("transport closed")]
	Closed,

	/// The transport refused the line for a transport-specific reason.
	#[error("transport rejected line: {0}")]
	Rejected(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
