use std::fmt::{self, Debug};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::sources::SourceSet;
use crate::tree::FileTree;

/// A deferred source producer, invoked with no arguments at resolution time.
/// The result is unpacked recursively under the same rules as any other item.
pub type Producer = Arc<dyn Fn() -> anyhow::Result<SourceItem> + Send + Sync>;

/// One raw entry of a [`SourceSet`].
///
/// Items are compared and stored by identity, not deep equality: literal
/// paths by value, every shared handle by pointer. Structural substitution
/// and removal both rely on this.
#[derive(Clone)]
pub enum SourceItem {
	/// A literal path, handed to the external path resolver on read.
	Path(Utf8PathBuf),
	/// A nested source set, shared by reference. Later changes to the nested
	/// set stay visible through the holder until finalization.
	Collection(SourceSet),
	/// A deferred producer. Invoked on every unresolved read, never memoized.
	Producer(Producer),
	/// A directory tree with filters, kept opaque until asked for files.
	Tree(Arc<FileTree>),
	/// A batch of further items. Expanded on insertion (or when returned by
	/// a producer), never itself stored in a collector.
	Group(Vec<SourceItem>),
}

impl SourceItem {
	pub fn lazy<F>(producer: F) -> Self
	where
		F: Fn() -> anyhow::Result<SourceItem> + Send + Sync + 'static,
	{
		Self::Producer(Arc::new(producer))
	}

	pub fn group(items: impl IntoIterator<Item = impl Into<SourceItem>>) -> Self {
		Self::Group(items.into_iter().map(Into::into).collect())
	}

	/// Identity comparison. Groups are transient and never identical.
	pub(crate) fn same(&self, other: &SourceItem) -> bool {
		match (self, other) {
			(Self::Path(l), Self::Path(r)) => l == r,
			(Self::Collection(l), Self::Collection(r)) => l.same(r),
			(Self::Producer(l), Self::Producer(r)) => Arc::ptr_eq(l, r),
			(Self::Tree(l), Self::Tree(r)) => Arc::ptr_eq(l, r),
			_ => false,
		}
	}
}

impl Debug for SourceItem {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Path(path) => write!(f, "{path:?}"),
			Self::Collection(sources) => sources.fmt(f),
			Self::Producer(_) => f.write_str("<producer>"),
			Self::Tree(tree) => write!(f, "tree {:?}", tree.root()),
			Self::Group(items) => f.debug_list().entries(items).finish(),
		}
	}
}

impl From<&str> for SourceItem {
	fn from(path: &str) -> Self {
		Self::Path(path.into())
	}
}

impl From<String> for SourceItem {
	fn from(path: String) -> Self {
		Self::Path(path.into())
	}
}

impl From<Utf8PathBuf> for SourceItem {
	fn from(path: Utf8PathBuf) -> Self {
		Self::Path(path)
	}
}

impl From<&Utf8Path> for SourceItem {
	fn from(path: &Utf8Path) -> Self {
		Self::Path(path.to_owned())
	}
}

impl From<SourceSet> for SourceItem {
	fn from(sources: SourceSet) -> Self {
		Self::Collection(sources)
	}
}

impl From<&SourceSet> for SourceItem {
	fn from(sources: &SourceSet) -> Self {
		Self::Collection(sources.clone())
	}
}

impl From<FileTree> for SourceItem {
	fn from(tree: FileTree) -> Self {
		Self::Tree(Arc::new(tree))
	}
}

impl From<Arc<FileTree>> for SourceItem {
	fn from(tree: Arc<FileTree>) -> Self {
		Self::Tree(tree)
	}
}

impl From<Vec<SourceItem>> for SourceItem {
	fn from(items: Vec<SourceItem>) -> Self {
		Self::Group(items)
	}
}
