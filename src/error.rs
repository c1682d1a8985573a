use thiserror::Error;

/// Errors surfaced by the value lifecycle of a [`SourceSet`](crate::SourceSet).
///
/// All of these are synchronous and fail-fast; a failed call leaves the set
/// otherwise untouched.
#[derive(Debug, Error)]
pub enum SourceSetError {
	#[error("The value of {0} cannot be changed any further, it has already been finalized")]
	Finalized(String),

	#[error("The value of {0} cannot be changed: {1}")]
	DisallowedMutation(String, String),

	#[error("Cannot query the value of {0} because it has no explicit value")]
	UnsafeRead(String),

	#[error("{0} cannot contain itself")]
	SelfReference(String),

	/// A deferred producer or the external path resolver failed. Passed
	/// through unchanged.
	#[error(transparent)]
	Resolve(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TreeError {
	#[error("Couldn't compile glob pattern.\n{0}")]
	Pattern(#[from] glob::PatternError),

	#[error("Couldn't walk the tree root.\n{0}")]
	Walk(#[from] glob::GlobError),

	#[error("Couldn't convert path to UTF-8.\n{0}")]
	PathFormat(#[from] camino::FromPathBufError),
}
