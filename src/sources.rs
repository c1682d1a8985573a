use std::fmt::{self, Debug};
use std::sync::{Arc, RwLock};

use camino::Utf8PathBuf;

use crate::collector::{Collector, Leaf, expand_into};
use crate::deps::{DependencyContext, TaskDeps, TaskRef};
use crate::error::SourceSetError;
use crate::host::{PathResolver, SourceHost};
use crate::item::SourceItem;
use crate::state::ValueState;

/// A lazily evaluated, mutable-until-finalized set of file-producing
/// sources.
///
/// A `SourceSet` is a cheap shared handle: cloning it clones the handle, and
/// two clones are the same set. Nesting one set inside another shares it by
/// reference, so changes to the nested set stay visible through the holder
/// until finalization freezes the snapshot.
///
/// Mutations pass through the value lifecycle gate (finalization, the
/// narrower `disallow_changes` lock, and the host's mutation window); reads
/// trigger finalize-on-read when armed and then flatten the current sources
/// into [`Leaf`] collections.
#[derive(Clone)]
pub struct SourceSet {
	inner: Arc<Inner>,
}

struct Inner {
	name: Option<String>,
	resolver: Arc<dyn PathResolver>,
	host: Arc<dyn SourceHost>,
	cell: RwLock<Mutable>,
}

struct Mutable {
	value: Collector,
	state: ValueState,
	deps: TaskDeps,
}

/// Memoizes the replacement supplier so it runs at most once per `replace`
/// call, no matter how many positions match.
pub(crate) struct Replacement<'a> {
	supplier: &'a dyn Fn() -> SourceSet,
	produced: Option<SourceSet>,
}

impl Replacement<'_> {
	pub(crate) fn get(&mut self) -> SourceSet {
		self.produced.get_or_insert_with(|| (self.supplier)()).clone()
	}
}

impl SourceSet {
	pub fn new(resolver: Arc<dyn PathResolver>, host: Arc<dyn SourceHost>) -> Self {
		Self::create(None, resolver, host)
	}

	pub fn named(
		name: impl Into<String>,
		resolver: Arc<dyn PathResolver>,
		host: Arc<dyn SourceHost>,
	) -> Self {
		Self::create(Some(name.into()), resolver, host)
	}

	fn create(name: Option<String>, resolver: Arc<dyn PathResolver>, host: Arc<dyn SourceHost>) -> Self {
		Self {
			inner: Arc::new(Inner {
				name,
				resolver,
				host,
				cell: RwLock::new(Mutable {
					value: Collector::Empty,
					state: ValueState::new(),
					deps: TaskDeps::new(),
				}),
			}),
		}
	}

	/// An unnamed set sharing this set's resolver and host; used by
	/// substitution and copying.
	fn sibling(&self) -> Self {
		Self::create(None, self.inner.resolver.clone(), self.inner.host.clone())
	}

	/// Instance identity; the basis of dedup, removal and substitution.
	pub fn same(&self, other: &SourceSet) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn display_name(&self) -> &str {
		self.inner.name.as_deref().unwrap_or("this source set")
	}

	// ------------------------------------------------------------------
	// value mutation

	/// Replace the explicit sources with `items`. An empty assignment still
	/// makes the value explicit.
	pub fn set_from(
		&self,
		items: impl IntoIterator<Item = impl Into<SourceItem>>,
	) -> Result<(), SourceSetError> {
		let incoming: Vec<SourceItem> = items.into_iter().map(Into::into).collect();

		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		let items = self.expand_checked(incoming, Vec::new())?;

		cell.value = Collector::from_items(items);
		cell.state.set_explicit();
		Ok(())
	}

	/// Append to the explicit sources, ignoring the convention. Appending
	/// nothing is a no-op and leaves an implicit value implicit.
	pub fn append(
		&self,
		items: impl IntoIterator<Item = impl Into<SourceItem>>,
	) -> Result<(), SourceSetError> {
		let incoming: Vec<SourceItem> = items.into_iter().map(Into::into).collect();

		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		if incoming.is_empty() {
			return Ok(());
		}

		let base = match (cell.state.is_explicit(), &cell.value) {
			(true, Collector::Unresolved(items)) => items.clone(),
			_ => Vec::new(),
		};
		let items = self.expand_checked(incoming, base)?;

		cell.value = Collector::from_items(items);
		cell.state.set_explicit();
		Ok(())
	}

	/// Append to whichever value is currently active: the explicit sources
	/// once one exists, the convention otherwise. Unlike
	/// [`append`](Self::append), a convention-backed value is extended in
	/// place instead of shadowed, and the value stays implicit.
	pub fn append_actual(
		&self,
		items: impl IntoIterator<Item = impl Into<SourceItem>>,
	) -> Result<(), SourceSetError> {
		let incoming: Vec<SourceItem> = items.into_iter().map(Into::into).collect();

		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		if incoming.is_empty() {
			return Ok(());
		}

		let mut base = Vec::new();
		self.effective(&cell).collect_source(&mut base);
		let items = self.expand_checked(incoming, base)?;

		match cell.state.is_explicit() {
			true => cell.value = Collector::from_items(items),
			false => cell.state.set_convention(Collector::from_items(items)),
		}
		Ok(())
	}

	/// Set the fallback value, consulted only while no explicit value exists.
	pub fn convention(
		&self,
		items: impl IntoIterator<Item = impl Into<SourceItem>>,
	) -> Result<(), SourceSetError> {
		let incoming: Vec<SourceItem> = items.into_iter().map(Into::into).collect();

		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		let items = self.expand_checked(incoming, Vec::new())?;

		cell.state.set_convention(Collector::from_items(items));
		Ok(())
	}

	pub fn unset_convention(&self) -> Result<(), SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		cell.state.set_convention(Collector::Empty);
		Ok(())
	}

	/// Copy the convention into the explicit slot unconditionally.
	pub fn set_to_convention(&self) -> Result<(), SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		cell.value = cell.state.convention_snapshot();
		cell.state.set_explicit();
		Ok(())
	}

	/// Copy the convention into the explicit slot, only if no explicit value
	/// exists yet.
	pub fn set_to_convention_if_unset(&self) -> Result<(), SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		if !cell.state.is_explicit() {
			cell.value = cell.state.convention_snapshot();
			cell.state.set_explicit();
		}
		Ok(())
	}

	/// Clear the explicit value; subsequent reads fall back to the
	/// convention again. Declared task dependencies are unaffected.
	pub fn unset(&self) -> Result<(), SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		cell.value = Collector::Empty;
		cell.state.unset();
		Ok(())
	}

	// ------------------------------------------------------------------
	// lifecycle controls

	/// Permanently forbid structural mutation without finalizing: contents
	/// still re-resolve lazily, but the source list may not change.
	pub fn disallow_changes(&self) {
		self.inner.cell.write().unwrap().state.disallow_changes();
	}

	/// Arm finalization as a side effect of the next content read.
	pub fn finalize_on_read(&self) {
		self.inner.cell.write().unwrap().state.arm_finalize_on_read();
	}

	/// Host-driven variant of [`finalize_on_read`](Self::finalize_on_read):
	/// the next read finalizes automatically, mutations stay allowed until
	/// then.
	pub fn implicit_finalize(&self) {
		self.inner.cell.write().unwrap().state.arm_finalize_on_read();
	}

	/// Turn reads-before-configuration into [`SourceSetError::UnsafeRead`]
	/// instead of silently falling back to convention or empty.
	pub fn disallow_unsafe_read(&self) {
		self.inner.cell.write().unwrap().state.disallow_unsafe_read();
	}

	/// Flatten the current sources and freeze them. Idempotent; after this,
	/// every structural mutation fails.
	pub fn finalize(&self) -> Result<(), SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.finalize_now(&mut cell)
	}

	pub fn is_explicit(&self) -> bool {
		self.inner.cell.read().unwrap().state.is_explicit()
	}

	pub fn is_finalized(&self) -> bool {
		self.inner.cell.read().unwrap().state.is_finalized()
	}

	// ------------------------------------------------------------------
	// reads

	/// Visit the flattened leaf collections in insertion order.
	///
	/// Triggers finalize-on-read when armed. For an unfinalized set every
	/// call re-unpacks the raw items, so live nested sets and producers are
	/// observed in their current state.
	pub fn visit_contents(&self, visitor: &mut dyn FnMut(Leaf)) -> Result<(), SourceSetError> {
		let collector = self.read_collector()?;
		collector.visit_contents(&*self.inner.resolver, visitor)
	}

	/// The concrete file list: resolved files in order, with tree leaves
	/// scanned against the live filesystem.
	pub fn files(&self) -> Result<Vec<Utf8PathBuf>, SourceSetError> {
		let mut leaves = Vec::new();
		self.visit_contents(&mut |leaf| leaves.push(leaf))?;

		let mut files = Vec::new();
		for leaf in leaves {
			match leaf {
				Leaf::Files(found) => files.extend(found),
				Leaf::Tree(tree) => {
					let found = tree.files().map_err(anyhow::Error::from)?;
					files.extend(found);
				}
			}
		}
		Ok(files)
	}

	/// A live, mutable view over the current raw source set. Reading through
	/// the view never triggers resolution or finalization.
	pub fn items(&self) -> ItemView<'_> {
		ItemView { owner: self }
	}

	// ------------------------------------------------------------------
	// dependency wiring

	/// Declare tasks that produce this set's contents. Independent of the
	/// value lifecycle: not gated, never cleared by `unset`.
	pub fn built_by(&self, tasks: impl IntoIterator<Item = impl Into<TaskRef>>) -> &Self {
		let mut cell = self.inner.cell.write().unwrap();
		for task in tasks {
			cell.deps.add(task.into());
		}
		self
	}

	pub fn set_built_by(&self, tasks: impl IntoIterator<Item = impl Into<TaskRef>>) -> &Self {
		let mut cell = self.inner.cell.write().unwrap();
		cell.deps.set(tasks.into_iter().map(Into::into));
		self
	}

	/// The declared dependency set only; nested sets' declarations are
	/// discovered by [`visit_dependencies`](Self::visit_dependencies).
	pub fn built_by_tasks(&self) -> Vec<TaskRef> {
		self.inner.cell.read().unwrap().deps.to_vec()
	}

	/// Contribute declared tasks and recurse into nested sets, without
	/// resolving any content: producers are not invoked, paths stay raw.
	pub fn visit_dependencies(&self, context: &mut DependencyContext) {
		if !context.enter(self) {
			return;
		}

		let raw = {
			let cell = self.inner.cell.read().unwrap();
			for task in cell.deps.iter() {
				context.add_task(task.clone());
			}
			let mut raw = Vec::new();
			self.effective(&cell).collect_source(&mut raw);
			raw
		};

		context.walk_items(&raw);
	}

	// ------------------------------------------------------------------
	// structural substitution and copying

	/// Swap the nested set `original`, wherever it appears in the source
	/// tree, for the supplier's replacement.
	///
	/// Returns this set unchanged (same handle) when `original` is not
	/// present anywhere; the supplier is then never invoked. On a match the
	/// supplier runs exactly once and a new set is produced with every
	/// unaffected item in its original position. A finalized set is frozen
	/// and never matches.
	pub fn replace(&self, original: &SourceSet, supplier: impl Fn() -> SourceSet) -> SourceSet {
		let mut replacement = Replacement {
			supplier: &supplier,
			produced: None,
		};
		self.replace_with(original, &mut replacement)
	}

	pub(crate) fn replace_with(
		&self,
		original: &SourceSet,
		replacement: &mut Replacement<'_>,
	) -> SourceSet {
		if self.same(original) {
			return replacement.get();
		}

		let collector = {
			let cell = self.inner.cell.read().unwrap();
			self.effective(&cell).clone()
		};

		match collector.replace(original, replacement) {
			None => self.clone(),
			Some(items) => {
				tracing::trace!("substituted sources in {}", self.display_name());
				let swapped = self.sibling();
				swapped.install(items, None);
				swapped
			}
		}
	}

	/// A new set seeded with a snapshot of the current raw item sequence and
	/// a copy of the declared dependency set.
	///
	/// Nested sets are shared by reference, not deep-cloned: mutating a
	/// shared nested set is visible through both the original and the copy,
	/// while the copy's own top-level item list is independent.
	pub fn shallow_copy(&self) -> SourceSet {
		let (items, deps) = {
			let cell = self.inner.cell.read().unwrap();
			let mut items = Vec::new();
			self.effective(&cell).collect_source(&mut items);
			(items, cell.deps.clone())
		};

		let copy = self.sibling();
		copy.install(items, Some(deps));
		copy
	}

	/// Apply `transform` to a shallow-copy snapshot of the current value and
	/// assign its result; `None` clears to an explicit empty value.
	pub fn update<F>(&self, transform: F) -> Result<(), SourceSetError>
	where
		F: FnOnce(SourceSet) -> Option<SourceSet>,
	{
		match transform(self.shallow_copy()) {
			Some(value) => self.set_from([value]),
			None => self.set_from(std::iter::empty::<SourceItem>()),
		}
	}

	// ------------------------------------------------------------------
	// internals

	fn assert_mutable(&self, cell: &Mutable) -> Result<(), SourceSetError> {
		cell.state
			.before_mutate(self.display_name(), &*self.inner.host)
	}

	/// Expand incoming items onto `base` and reject any assignment that
	/// would make this set contain itself, before anything is mutated.
	fn expand_checked(
		&self,
		incoming: Vec<SourceItem>,
		base: Vec<SourceItem>,
	) -> Result<Vec<SourceItem>, SourceSetError> {
		let mut items = base;
		for item in incoming {
			expand_into(&mut items, item);
		}

		for item in &items {
			if let SourceItem::Collection(nested) = item
				&& nested.same(self)
			{
				return Err(SourceSetError::SelfReference(
					self.display_name().to_string(),
				));
			}
		}
		Ok(items)
	}

	/// The collector active for reads: the explicit value, or the convention
	/// while implicit.
	fn effective<'a>(&self, cell: &'a Mutable) -> &'a Collector {
		match cell.state.is_explicit() {
			true => &cell.value,
			false => cell.state.convention(),
		}
	}

	fn read_collector(&self) -> Result<Collector, SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		cell.state.guard_read(self.display_name())?;
		if cell.state.finalize_on_read_due() {
			self.finalize_now(&mut cell)?;
		}
		Ok(self.effective(&cell).clone())
	}

	fn finalize_now(&self, cell: &mut Mutable) -> Result<(), SourceSetError> {
		if cell.state.is_finalized() {
			return Ok(());
		}

		tracing::trace!("finalizing {}", self.display_name());
		let leaves = self.effective(cell).resolve(&*self.inner.resolver)?;
		cell.value = Collector::Resolved(leaves);
		cell.state.mark_finalized();
		Ok(())
	}

	/// Install an already-expanded item list directly, bypassing the gate.
	/// Only reachable for freshly created sets (substitution, copying).
	fn install(&self, items: Vec<SourceItem>, deps: Option<TaskDeps>) {
		let mut cell = self.inner.cell.write().unwrap();
		cell.value = Collector::from_items(items);
		cell.state.set_explicit();
		if let Some(deps) = deps {
			cell.deps = deps;
		}
	}

	pub(crate) fn raw_items(&self) -> Vec<SourceItem> {
		let cell = self.inner.cell.read().unwrap();
		let mut items = Vec::new();
		self.effective(&cell).collect_source(&mut items);
		items
	}

	fn add_item(&self, item: SourceItem) -> Result<bool, SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;

		let mut base = Vec::new();
		self.effective(&cell).collect_source(&mut base);
		if base.iter().any(|existing| existing.same(&item)) {
			return Ok(false);
		}

		let items = self.expand_checked(vec![item], base)?;
		cell.value = Collector::from_items(items);
		cell.state.set_explicit();
		Ok(true)
	}

	fn remove_item(&self, item: &SourceItem) -> Result<bool, SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;

		if cell.state.is_explicit() {
			return Ok(cell.value.remove(item));
		}

		// a removal out of the convention materializes it first; a miss
		// leaves the value implicit
		let mut snapshot = cell.state.convention_snapshot();
		match snapshot.remove(item) {
			true => {
				cell.value = snapshot;
				cell.state.set_explicit();
				Ok(true)
			}
			false => Ok(false),
		}
	}

	fn clear_items(&self) -> Result<(), SourceSetError> {
		let mut cell = self.inner.cell.write().unwrap();
		self.assert_mutable(&cell)?;
		cell.value = Collector::Empty;
		cell.state.set_explicit();
		Ok(())
	}
}

impl Debug for SourceSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SourceSet")
			.field("name", &self.inner.name)
			.field("sources", &self.raw_items())
			.finish()
	}
}

/// A live, mutable view over a set's raw items.
///
/// Reads show the effective raw sequence (the convention's while the value
/// is implicit) without triggering resolution; every mutation re-enters the
/// mutability gate and applies to the displayed sequence, so mutating a
/// convention-backed value materializes it into the explicit slot first.
pub struct ItemView<'a> {
	owner: &'a SourceSet,
}

impl ItemView<'_> {
	/// An ordered snapshot of the current raw items.
	pub fn to_vec(&self) -> Vec<SourceItem> {
		self.owner.raw_items()
	}

	pub fn len(&self) -> usize {
		self.owner.raw_items().len()
	}

	pub fn is_empty(&self) -> bool {
		self.owner.raw_items().is_empty()
	}

	/// Identity-based membership.
	pub fn contains(&self, item: &SourceItem) -> bool {
		self.owner
			.raw_items()
			.iter()
			.any(|existing| existing.same(item))
	}

	/// Append one item; `false` when an identical item was already present.
	/// The gate is consulted before the membership check, so a duplicate add
	/// on a locked set still fails.
	pub fn add(&self, item: impl Into<SourceItem>) -> Result<bool, SourceSetError> {
		self.owner.add_item(item.into())
	}

	/// Remove one item by identity from the displayed sequence.
	pub fn remove(&self, item: &SourceItem) -> Result<bool, SourceSetError> {
		self.owner.remove_item(item)
	}

	/// Reset to an explicit empty value.
	pub fn clear(&self) -> Result<(), SourceSetError> {
		self.owner.clear_items()
	}
}

#[cfg(test)]
mod test {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::host::{BaseDir, BuildPhase, Unrestricted};
	use crate::tree::{FileTree, Patterns};

	fn sources() -> SourceSet {
		SourceSet::new(Arc::new(BaseDir::new("/base".into())), Arc::new(Unrestricted))
	}

	fn files(set: &SourceSet) -> Vec<Utf8PathBuf> {
		set.files().unwrap()
	}

	fn counting_producer(item: &str) -> (SourceItem, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let counted = calls.clone();
		let item = item.to_string();
		let producer = SourceItem::lazy(move || {
			counted.fetch_add(1, Ordering::Relaxed);
			Ok(SourceItem::from(item.clone()))
		});
		(producer, calls)
	}

	#[test]
	fn iterates_in_first_insertion_order_without_duplicates() {
		let set = sources();
		set.append(["a.txt", "b.txt"]).unwrap();
		set.append(["b.txt", "c.txt"]).unwrap();

		assert_eq!(files(&set), ["/base/a.txt", "/base/b.txt", "/base/c.txt"]);

		set.items().remove(&"b.txt".into()).unwrap();
		assert_eq!(files(&set), ["/base/a.txt", "/base/c.txt"]);
	}

	#[test]
	fn convention_is_consulted_only_while_implicit() {
		let set = sources();
		set.convention(["fallback.txt"]).unwrap();
		assert!(!set.is_explicit());
		assert_eq!(files(&set), ["/base/fallback.txt"]);

		set.set_from(["explicit.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/explicit.txt"]);

		// changing the convention does not leak into an explicit value
		set.convention(["other.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/explicit.txt"]);

		set.unset().unwrap();
		assert_eq!(files(&set), ["/base/other.txt"]);

		set.unset_convention().unwrap();
		assert_eq!(files(&set), Vec::<Utf8PathBuf>::new());
	}

	#[test]
	fn set_to_convention_transitions() {
		let set = sources();
		set.convention(["conv.txt"]).unwrap();

		set.set_to_convention_if_unset().unwrap();
		assert!(set.is_explicit());
		assert_eq!(files(&set), ["/base/conv.txt"]);

		set.set_from(["own.txt"]).unwrap();
		set.set_to_convention_if_unset().unwrap();
		assert_eq!(files(&set), ["/base/own.txt"]);

		set.set_to_convention().unwrap();
		assert_eq!(files(&set), ["/base/conv.txt"]);
	}

	#[test]
	fn append_actual_extends_the_active_value() {
		let set = sources();
		set.convention(["conv.txt"]).unwrap();

		set.append_actual(["extra.txt"]).unwrap();
		assert!(!set.is_explicit());
		assert_eq!(files(&set), ["/base/conv.txt", "/base/extra.txt"]);

		set.set_from(["own.txt"]).unwrap();
		set.append_actual(["more.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/own.txt", "/base/more.txt"]);

		// the extended convention is still only a fallback
		set.unset().unwrap();
		assert_eq!(files(&set), ["/base/conv.txt", "/base/extra.txt"]);
	}

	#[test]
	fn finalization_is_idempotent_and_freezes_the_value() {
		let set = sources();
		set.set_from(["a.txt", "b.txt"]).unwrap();

		set.finalize().unwrap();
		let first = files(&set);
		set.finalize().unwrap();
		assert_eq!(files(&set), first);
		assert_eq!(first, ["/base/a.txt", "/base/b.txt"]);

		assert!(matches!(
			set.set_from(["c.txt"]),
			Err(SourceSetError::Finalized(_))
		));
		assert!(matches!(
			set.unset(),
			Err(SourceSetError::Finalized(_))
		));
		assert!(matches!(
			set.items().clear(),
			Err(SourceSetError::Finalized(_))
		));
	}

	#[test]
	fn finalization_stops_observing_live_nested_sets() {
		let inner = sources();
		inner.set_from(["before.txt"]).unwrap();

		let outer = sources();
		outer.set_from([&inner]).unwrap();
		outer.finalize().unwrap();

		inner.append(["after.txt"]).unwrap();
		assert_eq!(files(&outer), ["/base/before.txt"]);
		assert_eq!(files(&inner), ["/base/before.txt", "/base/after.txt"]);
	}

	#[test]
	fn finalizing_an_empty_set_yields_no_leaves() {
		let set = sources();
		set.finalize().unwrap();

		let mut leaves = 0;
		set.visit_contents(&mut |_| leaves += 1).unwrap();
		assert_eq!(leaves, 0);
		assert!(set.is_finalized());
	}

	#[test]
	fn producers_rerun_until_finalization_snapshots_them() {
		let set = sources();
		let (producer, calls) = counting_producer("made.txt");
		set.set_from([producer]).unwrap();

		assert_eq!(files(&set), ["/base/made.txt"]);
		assert_eq!(files(&set), ["/base/made.txt"]);
		assert_eq!(calls.load(Ordering::Relaxed), 2);

		set.finalize().unwrap();
		assert_eq!(files(&set), ["/base/made.txt"]);
		assert_eq!(calls.load(Ordering::Relaxed), 3);
	}

	#[test]
	fn finalize_on_read_fires_on_the_next_content_read() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		set.finalize_on_read();
		assert!(!set.is_finalized());

		assert_eq!(files(&set), ["/base/a.txt"]);
		assert!(set.is_finalized());
		assert!(matches!(
			set.append(["b.txt"]),
			Err(SourceSetError::Finalized(_))
		));
	}

	#[test]
	fn raw_view_never_triggers_finalization() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		set.finalize_on_read();

		assert_eq!(set.items().len(), 1);
		assert!(!set.is_finalized());
	}

	#[test]
	fn self_reference_is_rejected_and_value_preserved() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();

		assert!(matches!(
			set.set_from([&set]),
			Err(SourceSetError::SelfReference(_))
		));
		assert!(matches!(
			set.append([&set]),
			Err(SourceSetError::SelfReference(_))
		));
		// even hidden inside a group
		assert!(matches!(
			set.set_from([SourceItem::group([SourceItem::from(&set)])]),
			Err(SourceSetError::SelfReference(_))
		));

		assert_eq!(files(&set), ["/base/a.txt"]);
	}

	#[test]
	fn replace_without_a_match_returns_the_same_handle() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		let absent = sources();

		let calls = AtomicUsize::new(0);
		let result = set.replace(&absent, || {
			calls.fetch_add(1, Ordering::Relaxed);
			sources()
		});

		assert!(result.same(&set));
		assert_eq!(calls.load(Ordering::Relaxed), 0);
	}

	#[test]
	fn replace_swaps_the_matching_item_in_place() {
		let nested = sources();
		nested.set_from(["old.txt"]).unwrap();

		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		set.append([&nested]).unwrap();

		let replacement = sources();
		replacement.set_from(["new.txt"]).unwrap();

		let calls = AtomicUsize::new(0);
		let swapped = set.replace(&nested, || {
			calls.fetch_add(1, Ordering::Relaxed);
			replacement.clone()
		});

		assert!(!swapped.same(&set));
		assert_eq!(calls.load(Ordering::Relaxed), 1);
		assert_eq!(files(&swapped), ["/base/a.txt", "/base/new.txt"]);
		// the original set is untouched
		assert_eq!(files(&set), ["/base/a.txt", "/base/old.txt"]);
	}

	#[test]
	fn replace_runs_the_supplier_once_for_diamond_shapes() {
		let shared = sources();
		shared.set_from(["shared.txt"]).unwrap();

		let left = sources();
		left.set_from([&shared]).unwrap();
		let right = sources();
		right.set_from([&shared]).unwrap();

		let top = sources();
		top.set_from([&left, &right]).unwrap();

		let calls = AtomicUsize::new(0);
		let swapped = top.replace(&shared, || {
			calls.fetch_add(1, Ordering::Relaxed);
			let fresh = sources();
			fresh.set_from(["fresh.txt"]).unwrap();
			fresh
		});

		assert_eq!(calls.load(Ordering::Relaxed), 1);
		assert_eq!(files(&swapped), ["/base/fresh.txt", "/base/fresh.txt"]);
	}

	#[test]
	fn replace_matching_the_whole_set_returns_the_replacement() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		let fresh = sources();

		let result = set.replace(&set, || fresh.clone());
		assert!(result.same(&fresh));
	}

	#[test]
	fn replace_on_a_finalized_set_is_frozen() {
		let nested = sources();
		nested.set_from(["old.txt"]).unwrap();

		let set = sources();
		set.set_from([&nested]).unwrap();
		set.finalize().unwrap();

		let result = set.replace(&nested, sources);
		assert!(result.same(&set));
	}

	#[test]
	fn shallow_copy_shares_nested_sets_but_not_the_item_list() {
		let inner = sources();
		inner.set_from(["inner.txt"]).unwrap();

		let set = sources();
		set.set_from([&inner]).unwrap();
		set.built_by(["producerTask"]);

		let copy = set.shallow_copy();
		assert!(!copy.same(&set));
		assert_eq!(copy.built_by_tasks(), ["producerTask".into()]);

		// top-level changes to the original do not affect the copy
		set.append(["extra.txt"]).unwrap();
		assert_eq!(files(&copy), ["/base/inner.txt"]);

		// ... and vice versa
		copy.append(["copy-only.txt"]).unwrap();
		assert_eq!(
			files(&set),
			["/base/inner.txt", "/base/extra.txt"]
		);

		// but the shared nested set stays visible through both
		inner.append(["shared.txt"]).unwrap();
		assert_eq!(
			files(&copy),
			["/base/inner.txt", "/base/shared.txt", "/base/copy-only.txt"]
		);
		assert_eq!(
			files(&set),
			["/base/inner.txt", "/base/shared.txt", "/base/extra.txt"]
		);
	}

	#[test]
	fn update_assigns_the_transformed_snapshot() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();

		set.update(|snapshot| {
			snapshot.append(["b.txt"]).unwrap();
			Some(snapshot)
		})
		.unwrap();
		assert_eq!(files(&set), ["/base/a.txt", "/base/b.txt"]);

		set.update(|_| None).unwrap();
		assert!(set.is_explicit());
		assert_eq!(files(&set), Vec::<Utf8PathBuf>::new());
	}

	#[test]
	fn host_can_close_the_mutation_window() {
		let phase = BuildPhase::new();
		let set = SourceSet::named(
			"inputs",
			Arc::new(BaseDir::new("/base".into())),
			Arc::new(phase.clone()),
		);
		set.set_from(["a.txt"]).unwrap();

		phase.start_execution();
		let error = set.set_from(["b.txt"]).unwrap_err();
		assert!(matches!(error, SourceSetError::DisallowedMutation(..)));
		assert!(error.to_string().contains("inputs"));

		// reads keep working
		assert_eq!(files(&set), ["/base/a.txt"]);
	}

	#[test]
	fn disallow_changes_locks_the_list_but_not_resolution() {
		let inner = sources();
		inner.set_from(["inner.txt"]).unwrap();

		let set = sources();
		set.set_from([&inner]).unwrap();
		set.disallow_changes();

		assert!(matches!(
			set.append(["more.txt"]),
			Err(SourceSetError::DisallowedMutation(..))
		));

		// the nested set is still live through this one
		inner.append(["late.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/inner.txt", "/base/late.txt"]);
	}

	#[test]
	fn unsafe_read_guard_requires_an_explicit_value() {
		let set = sources();
		set.convention(["conv.txt"]).unwrap();
		set.disallow_unsafe_read();

		assert!(matches!(
			set.files(),
			Err(SourceSetError::UnsafeRead(_))
		));

		set.set_from(["a.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/a.txt"]);
	}

	#[test]
	fn tree_leaves_stay_opaque_through_finalization() {
		let tree = FileTree::new("/src".into(), Patterns::new());
		let set = sources();
		set.set_from([SourceItem::from(tree)]).unwrap();

		let mut before = Vec::new();
		set.visit_contents(&mut |leaf| before.push(leaf)).unwrap();
		assert!(matches!(before.as_slice(), [Leaf::Tree(_)]));

		set.finalize().unwrap();
		let mut after = Vec::new();
		set.visit_contents(&mut |leaf| after.push(leaf)).unwrap();
		assert!(matches!(after.as_slice(), [Leaf::Tree(_)]));
	}

	#[test]
	fn dependency_visitation_does_not_resolve_content() {
		let (producer, calls) = counting_producer("made.txt");

		let inner = sources();
		inner.set_from(["inner.txt"]).unwrap();
		inner.built_by(["innerTask"]);

		// diamond: the same nested set reachable through two paths
		let left = sources();
		left.set_from([&inner]).unwrap();
		let right = sources();
		right.set_from([&inner]).unwrap();

		let set = sources();
		set.set_from([
			SourceItem::from(&left),
			SourceItem::from(&right),
			producer,
		])
		.unwrap();
		set.built_by(["outerTask", "outerTask"]);

		let mut context = DependencyContext::new();
		set.visit_dependencies(&mut context);

		assert_eq!(context.tasks(), ["outerTask".into(), "innerTask".into()]);
		assert_eq!(calls.load(Ordering::Relaxed), 0);
	}

	#[test]
	fn dependencies_survive_unset_and_convention_changes() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		set.built_by(["taskX"]);

		set.unset().unwrap();
		set.convention(["c.txt"]).unwrap();
		set.unset_convention().unwrap();

		assert_eq!(set.built_by_tasks(), ["taskX".into()]);

		set.set_built_by(["taskY", "taskZ"]);
		assert_eq!(set.built_by_tasks(), ["taskY".into(), "taskZ".into()]);
	}

	#[test]
	fn view_mutations_reenter_the_gate() {
		let set = sources();
		let view = set.items();

		assert!(view.add("a.txt").unwrap());
		assert!(!view.add("a.txt").unwrap());
		assert!(view.add("b.txt").unwrap());
		assert_eq!(view.len(), 2);
		assert!(view.contains(&"a.txt".into()));

		assert!(view.remove(&"a.txt".into()).unwrap());
		assert!(!view.remove(&"a.txt".into()).unwrap());

		view.clear().unwrap();
		assert!(view.is_empty());
		assert!(set.is_explicit());

		set.disallow_changes();
		assert!(view.add("c.txt").is_err());
	}

	#[test]
	fn view_mutations_materialize_a_convention_backed_value() {
		let set = sources();
		set.convention(["conv.txt", "other.txt"]).unwrap();
		let view = set.items();

		assert!(view.contains(&"conv.txt".into()));
		assert!(view.remove(&"conv.txt".into()).unwrap());
		assert!(set.is_explicit());
		assert_eq!(files(&set), ["/base/other.txt"]);

		// the displayed convention items survive an add
		let fresh = sources();
		fresh.convention(["conv.txt"]).unwrap();
		assert!(fresh.items().add("x.txt").unwrap());
		assert!(fresh.is_explicit());
		assert_eq!(files(&fresh), ["/base/conv.txt", "/base/x.txt"]);
	}

	#[test]
	fn view_remove_miss_leaves_the_value_implicit() {
		let set = sources();
		set.convention(["conv.txt"]).unwrap();

		assert!(!set.items().remove(&"missing.txt".into()).unwrap());
		assert!(!set.is_explicit());
		assert_eq!(files(&set), ["/base/conv.txt"]);
	}

	#[test]
	fn view_add_of_a_duplicate_still_enters_the_gate() {
		let set = sources();
		set.set_from(["a.txt"]).unwrap();
		set.disallow_changes();

		assert!(matches!(
			set.items().add("a.txt"),
			Err(SourceSetError::DisallowedMutation(..))
		));
	}

	#[test]
	fn configuration_scenario() {
		let set = sources();
		assert!(files(&set).is_empty());

		set.append(["a.txt", "b.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/a.txt", "/base/b.txt"]);

		set.set_from(["c.txt"]).unwrap();
		assert_eq!(files(&set), ["/base/c.txt"]);

		set.built_by(["taskX"]);
		assert_eq!(set.built_by_tasks(), ["taskX".into()]);
		assert_eq!(files(&set), ["/base/c.txt"]);
	}

	#[test]
	fn producer_failures_pass_through() {
		let set = sources();
		set.set_from([SourceItem::lazy(|| anyhow::bail!("boom"))])
			.unwrap();

		let error = set.files().unwrap_err();
		assert!(matches!(error, SourceSetError::Resolve(_)));
		assert!(error.to_string().contains("boom"));
	}
}
