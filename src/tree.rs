use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::TreeError;

const GLOB_OPTS: MatchOptions = MatchOptions {
	case_sensitive: true,
	require_literal_separator: true,
	require_literal_leading_dot: true,
};

/// An include/exclude filter over paths relative to a tree root.
///
/// A path is selected when it matches at least one include pattern (or there
/// are none) and matches no exclude pattern.
#[derive(Debug, Default, Clone)]
pub struct Patterns {
	include: Vec<Pattern>,
	exclude: Vec<Pattern>,
}

impl Patterns {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn include(mut self, pattern: &str) -> Result<Self, TreeError> {
		self.include.push(Pattern::new(pattern)?);
		Ok(self)
	}

	pub fn exclude(mut self, pattern: &str) -> Result<Self, TreeError> {
		self.exclude.push(Pattern::new(pattern)?);
		Ok(self)
	}

	pub fn matches(&self, path: &Utf8Path) -> bool {
		let path = path.as_std_path();

		let included = self.include.is_empty()
			|| self
				.include
				.iter()
				.any(|pattern| pattern.matches_path_with(path, GLOB_OPTS));

		included
			&& !self
				.exclude
				.iter()
				.any(|pattern| pattern.matches_path_with(path, GLOB_OPTS))
	}
}

/// A directory tree with an attached filter.
///
/// A tree stays opaque until somebody asks it for files; it is never
/// flattened into individual entries ahead of time, so every [`files`] call
/// reflects the current state of the filesystem, even after the owning source
/// set has been finalized.
///
/// [`files`]: FileTree::files
#[derive(Debug, Clone)]
pub struct FileTree {
	root: Utf8PathBuf,
	patterns: Patterns,
}

impl FileTree {
	pub fn new(root: Utf8PathBuf, patterns: Patterns) -> Self {
		Self { root, patterns }
	}

	pub fn root(&self) -> &Utf8Path {
		&self.root
	}

	pub fn patterns(&self) -> &Patterns {
		&self.patterns
	}

	/// Whether `path` would be selected by this tree, without touching the
	/// filesystem.
	pub fn contains(&self, path: &Utf8Path) -> bool {
		match path.strip_prefix(&self.root) {
			Ok(relative) => self.patterns.matches(relative),
			Err(_) => false,
		}
	}

	/// Walk the root and collect every selected file, in traversal order.
	pub fn files(&self) -> Result<Vec<Utf8PathBuf>, TreeError> {
		let pattern = self.root.join("**/*");
		let mut found = Vec::new();

		for entry in glob::glob(pattern.as_str())? {
			let path = Utf8PathBuf::try_from(entry?)?;

			if path.is_file() && self.contains(&path) {
				found.push(path);
			}
		}

		Ok(found)
	}
}
