use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};

/// Turns a raw path entry into an absolute file path.
///
/// Resolution happens at read time, once per unresolved read; failures are
/// passed through to the caller unchanged.
pub trait PathResolver: Send + Sync {
	fn resolve(&self, path: &Utf8Path) -> anyhow::Result<Utf8PathBuf>;
}

/// Resolves relative paths against a fixed base directory. Absolute paths
/// are kept as-is.
#[derive(Debug, Clone)]
pub struct BaseDir {
	base: Utf8PathBuf,
}

impl BaseDir {
	pub fn new(base: Utf8PathBuf) -> Self {
		Self { base }
	}
}

impl PathResolver for BaseDir {
	fn resolve(&self, path: &Utf8Path) -> anyhow::Result<Utf8PathBuf> {
		Ok(match path.is_absolute() {
			true => path.to_owned(),
			false => self.base.join(path),
		})
	}
}

/// Answers whether structural mutation is currently allowed.
///
/// The host is an explicitly passed capability rather than ambient state;
/// every source set created from the same host shares the same mutation
/// window.
pub trait SourceHost: Send + Sync {
	/// The reason mutation is currently disallowed, if any.
	fn mutation_blocked(&self) -> Option<String> {
		None
	}
}

/// A host that never closes the mutation window.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

impl SourceHost for Unrestricted {}

/// A shared phase flag, flipped by the build runner when the configuration
/// phase ends. While the flag is set, every gated mutation fails.
#[derive(Debug, Default, Clone)]
pub struct BuildPhase {
	executing: Arc<AtomicBool>,
}

impl BuildPhase {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn start_execution(&self) {
		self.executing.store(true, Ordering::Relaxed);
	}
}

impl SourceHost for BuildPhase {
	fn mutation_blocked(&self) -> Option<String> {
		self.executing
			.load(Ordering::Relaxed)
			.then(|| "the configuration phase has ended".to_string())
	}
}
