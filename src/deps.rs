use std::fmt::{self, Display};
use std::sync::Arc;

use crate::item::SourceItem;
use crate::sources::SourceSet;

/// A cheap, cloneable reference to a task in the surrounding build graph.
///
/// The graph itself is an external collaborator; a `TaskRef` only carries
/// enough to wire dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef(Arc<str>);

impl TaskRef {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	pub fn name(&self) -> &str {
		&self.0
	}
}

impl Display for TaskRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for TaskRef {
	fn from(name: &str) -> Self {
		Self::new(name)
	}
}

impl From<String> for TaskRef {
	fn from(name: String) -> Self {
		Self::new(name)
	}
}

/// An ordered, de-duplicated set of task references. Declarations are
/// independent of the file-content lifecycle: they survive `unset` and
/// convention changes, and are not gated by the mutability gate.
#[derive(Debug, Default, Clone)]
pub struct TaskDeps {
	tasks: Vec<TaskRef>,
}

impl TaskDeps {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends; re-adding an existing reference is a no-op for ordering.
	pub fn add(&mut self, task: TaskRef) {
		if !self.tasks.contains(&task) {
			self.tasks.push(task);
		}
	}

	pub fn set(&mut self, tasks: impl IntoIterator<Item = TaskRef>) {
		self.tasks.clear();
		for task in tasks {
			self.add(task);
		}
	}

	pub fn iter(&self) -> std::slice::Iter<'_, TaskRef> {
		self.tasks.iter()
	}

	pub fn as_slice(&self) -> &[TaskRef] {
		&self.tasks
	}

	pub fn to_vec(&self) -> Vec<TaskRef> {
		self.tasks.clone()
	}
}

/// Collects task references while walking a source tree.
///
/// The walk asks each nested set for its declared dependencies without ever
/// resolving content: producers are not invoked and paths are not resolved.
/// A set shared in several places (diamond shapes) is visited once.
#[derive(Default)]
pub struct DependencyContext {
	visited: Vec<SourceSet>,
	tasks: TaskDeps,
}

impl DependencyContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks `sources` as visited; `false` when it was already seen.
	pub(crate) fn enter(&mut self, sources: &SourceSet) -> bool {
		if self.visited.iter().any(|seen| seen.same(sources)) {
			return false;
		}
		self.visited.push(sources.clone());
		true
	}

	pub fn add_task(&mut self, task: TaskRef) {
		self.tasks.add(task);
	}

	pub fn tasks(&self) -> &[TaskRef] {
		self.tasks.as_slice()
	}

	pub fn into_tasks(self) -> Vec<TaskRef> {
		self.tasks.tasks
	}

	/// Recurse into every directly stored nested set of `items`.
	pub(crate) fn walk_items(&mut self, items: &[SourceItem]) {
		for item in items {
			if let SourceItem::Collection(nested) = item {
				nested.visit_dependencies(self);
			}
		}
	}
}
