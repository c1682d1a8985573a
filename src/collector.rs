use std::mem;
use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::error::SourceSetError;
use crate::host::PathResolver;
use crate::item::SourceItem;
use crate::sources::{Replacement, SourceSet};
use crate::tree::FileTree;

/// A fully flattened file-producing unit, the terminal output of content
/// visitation.
#[derive(Debug, Clone)]
pub enum Leaf {
	/// An immutable set of already-resolved files.
	Files(Vec<Utf8PathBuf>),
	/// A live directory tree; traverses the filesystem whenever asked for
	/// files, even after finalization.
	Tree(Arc<FileTree>),
}

/// The ordered set of sources held by a [`SourceSet`] at a point in time,
/// polymorphic over whether resolution has happened.
///
/// `Resolved` is only ever constructed by finalization; no other mutation
/// path produces it, so the mutating operations never see it.
#[derive(Debug, Clone, Default)]
pub(crate) enum Collector {
	#[default]
	Empty,
	/// Raw items in first-insertion order, de-duplicated by identity.
	Unresolved(Vec<SourceItem>),
	/// The frozen leaf list produced exactly once during finalization.
	Resolved(Vec<Leaf>),
}

impl Collector {
	/// Items are expected to be group-expanded and identity-deduped already.
	pub fn from_items(items: Vec<SourceItem>) -> Self {
		match items.is_empty() {
			true => Self::Empty,
			false => Self::Unresolved(items),
		}
	}

	/// Snapshot of the raw item sequence. Never triggers resolution: a
	/// resolved collector renders its leaves back as literal items.
	pub fn collect_source(&self, dest: &mut Vec<SourceItem>) {
		match self {
			Self::Empty => {}
			Self::Unresolved(items) => dest.extend(items.iter().cloned()),
			Self::Resolved(leaves) => {
				for leaf in leaves {
					match leaf {
						Leaf::Files(files) => {
							dest.extend(files.iter().cloned().map(SourceItem::Path));
						}
						Leaf::Tree(tree) => dest.push(SourceItem::Tree(tree.clone())),
					}
				}
			}
		}
	}

	/// Produce the flattened leaf sequence, invoking `visitor` once per leaf
	/// in insertion order.
	///
	/// An unresolved collector unpacks every item anew on each call, so live
	/// nested sets and deferred producers are re-observed; a resolved
	/// collector replays its frozen list.
	pub fn visit_contents(
		&self,
		resolver: &dyn PathResolver,
		visitor: &mut dyn FnMut(Leaf),
	) -> Result<(), SourceSetError> {
		match self {
			Self::Empty => Ok(()),
			Self::Unresolved(items) => {
				for item in items {
					unpack(item, resolver, visitor)?;
				}
				Ok(())
			}
			Self::Resolved(leaves) => {
				for leaf in leaves {
					visitor(leaf.clone());
				}
				Ok(())
			}
		}
	}

	/// Remove one item by identity. Only an unresolved collector holds
	/// removable items.
	pub fn remove(&mut self, item: &SourceItem) -> bool {
		let Self::Unresolved(items) = self else {
			return false;
		};

		match items.iter().position(|existing| existing.same(item)) {
			Some(position) => {
				items.remove(position);
				if items.is_empty() {
					*self = Self::Empty;
				}
				true
			}
			None => false,
		}
	}

	/// Scan for nested sets affected by a structural substitution.
	///
	/// Returns the new item list with every unaffected item in its original
	/// position, or `None` when nothing matched (the caller keeps its current
	/// collector untouched). Only directly stored nested sets participate;
	/// scalars, producers and trees never match, and a resolved collector is
	/// frozen.
	pub fn replace(
		&self,
		original: &SourceSet,
		replacement: &mut Replacement<'_>,
	) -> Option<Vec<SourceItem>> {
		let Self::Unresolved(items) = self else {
			return None;
		};

		let mut changed = false;
		let new_items = items
			.iter()
			.map(|item| match item {
				SourceItem::Collection(nested) => {
					let swapped = nested.replace_with(original, replacement);
					changed |= !swapped.same(nested);
					SourceItem::Collection(swapped)
				}
				other => other.clone(),
			})
			.collect();

		changed.then_some(new_items)
	}

	/// Flatten into the frozen leaf list installed by finalization.
	///
	/// Adjacent resolved file runs coalesce into one `Files` leaf (deduped by
	/// value within the run, never across leaves); trees are kept as-is so
	/// they keep re-resolving against the live filesystem.
	pub fn resolve(&self, resolver: &dyn PathResolver) -> Result<Vec<Leaf>, SourceSetError> {
		let mut leaves = Vec::new();
		let mut run: Vec<Utf8PathBuf> = Vec::new();

		self.visit_contents(resolver, &mut |leaf| match leaf {
			Leaf::Files(files) => {
				for file in files {
					if !run.contains(&file) {
						run.push(file);
					}
				}
			}
			Leaf::Tree(tree) => {
				if !run.is_empty() {
					leaves.push(Leaf::Files(mem::take(&mut run)));
				}
				leaves.push(Leaf::Tree(tree));
			}
		})?;

		if !run.is_empty() {
			leaves.push(Leaf::Files(run));
		}

		Ok(leaves)
	}
}

/// Append `item` unless an identical item is already present. First
/// occurrence wins the position.
pub(crate) fn add_identity(items: &mut Vec<SourceItem>, item: SourceItem) {
	if !items.iter().any(|existing| existing.same(&item)) {
		items.push(item);
	}
}

/// Expand an incoming item into `items`: groups flatten recursively, every
/// other kind is stored as-is under identity dedup.
pub(crate) fn expand_into(items: &mut Vec<SourceItem>, item: SourceItem) {
	match item {
		SourceItem::Group(group) => {
			for item in group {
				expand_into(items, item);
			}
		}
		item => add_identity(items, item),
	}
}

/// How each raw item kind becomes zero or more leaves.
fn unpack(
	item: &SourceItem,
	resolver: &dyn PathResolver,
	visitor: &mut dyn FnMut(Leaf),
) -> Result<(), SourceSetError> {
	match item {
		SourceItem::Path(path) => {
			let file = resolver.resolve(path)?;
			visitor(Leaf::Files(vec![file]));
		}
		// Visited in place, not copied: the nested set's own current
		// contents are asked for through its public read path.
		SourceItem::Collection(nested) => nested.visit_contents(visitor)?,
		// Invoked on every unresolved read; the result is unpacked
		// recursively under the same rules.
		SourceItem::Producer(producer) => {
			let produced = producer()?;
			unpack(&produced, resolver, visitor)?;
		}
		SourceItem::Tree(tree) => visitor(Leaf::Tree(tree.clone())),
		SourceItem::Group(items) => {
			for item in items {
				unpack(item, resolver, visitor)?;
			}
		}
	}
	Ok(())
}
