use crate::collector::Collector;
use crate::error::SourceSetError;
use crate::host::SourceHost;

/// Where a value is in its lifecycle. The only irreversible transition is
/// into `Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
	/// No explicit value was ever set; reads fall back to the convention.
	Implicit,
	/// An explicit collector is active and may still change.
	Explicit,
	/// The explicit collector is frozen; all further mutation fails.
	Finalized,
}

/// The value lifecycle state machine of a [`SourceSet`](crate::SourceSet).
///
/// Tracks the stage, the convention collector (consulted only while
/// implicit), and the narrower locks that restrict the value without
/// finalizing it.
#[derive(Debug)]
pub(crate) struct ValueState {
	stage: Stage,
	convention: Collector,
	changes_disallowed: bool,
	finalize_on_read: bool,
	unsafe_read_disallowed: bool,
}

impl ValueState {
	pub fn new() -> Self {
		Self {
			stage: Stage::Implicit,
			convention: Collector::Empty,
			changes_disallowed: false,
			finalize_on_read: false,
			unsafe_read_disallowed: false,
		}
	}

	/// The mutability gate. Every structural mutation passes through here
	/// before touching the collector.
	pub fn before_mutate(
		&self,
		display_name: &str,
		host: &dyn SourceHost,
	) -> Result<(), SourceSetError> {
		if self.stage == Stage::Finalized {
			return Err(SourceSetError::Finalized(display_name.to_string()));
		}
		if self.changes_disallowed {
			return Err(SourceSetError::DisallowedMutation(
				display_name.to_string(),
				"changes to this value are no longer allowed".to_string(),
			));
		}
		if let Some(reason) = host.mutation_blocked() {
			return Err(SourceSetError::DisallowedMutation(
				display_name.to_string(),
				reason,
			));
		}
		Ok(())
	}

	/// Fails a read while the unsafe-read guard is armed and no explicit
	/// value exists. Checked before finalize-on-read fires, so arming both
	/// still reports the missing value.
	pub fn guard_read(&self, display_name: &str) -> Result<(), SourceSetError> {
		match self.stage == Stage::Implicit && self.unsafe_read_disallowed {
			true => Err(SourceSetError::UnsafeRead(display_name.to_string())),
			false => Ok(()),
		}
	}

	pub fn is_explicit(&self) -> bool {
		matches!(self.stage, Stage::Explicit | Stage::Finalized)
	}

	pub fn is_finalized(&self) -> bool {
		self.stage == Stage::Finalized
	}

	/// Transition into `Explicit`. Unreachable from `Finalized` because the
	/// gate rejects the mutation first.
	pub fn set_explicit(&mut self) {
		if self.stage == Stage::Implicit {
			self.stage = Stage::Explicit;
		}
	}

	/// Revert to `Implicit`; subsequent reads consult the convention again.
	pub fn unset(&mut self) {
		self.stage = Stage::Implicit;
	}

	pub fn set_convention(&mut self, convention: Collector) {
		self.convention = convention;
	}

	pub fn convention(&self) -> &Collector {
		&self.convention
	}

	pub fn convention_snapshot(&self) -> Collector {
		self.convention.clone()
	}

	pub fn disallow_changes(&mut self) {
		self.changes_disallowed = true;
	}

	pub fn arm_finalize_on_read(&mut self) {
		self.finalize_on_read = true;
	}

	pub fn disallow_unsafe_read(&mut self) {
		self.unsafe_read_disallowed = true;
	}

	pub fn finalize_on_read_due(&self) -> bool {
		self.finalize_on_read && self.stage != Stage::Finalized
	}

	pub fn mark_finalized(&mut self) {
		self.stage = Stage::Finalized;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::host::{BuildPhase, Unrestricted};

	#[test]
	fn gate_is_open_by_default() {
		let state = ValueState::new();
		assert!(state.before_mutate("the set", &Unrestricted).is_ok());
	}

	#[test]
	fn finalized_wins_over_every_other_restriction() {
		let mut state = ValueState::new();
		state.disallow_changes();
		state.mark_finalized();

		let phase = BuildPhase::new();
		phase.start_execution();

		assert!(matches!(
			state.before_mutate("the set", &phase),
			Err(SourceSetError::Finalized(_))
		));
	}

	#[test]
	fn disallow_changes_is_narrower_than_finalization() {
		let mut state = ValueState::new();
		state.disallow_changes();

		assert!(matches!(
			state.before_mutate("the set", &Unrestricted),
			Err(SourceSetError::DisallowedMutation(..))
		));
		assert!(!state.is_finalized());
	}

	#[test]
	fn host_reason_is_reported() {
		let state = ValueState::new();
		let phase = BuildPhase::new();
		phase.start_execution();

		let error = state.before_mutate("inputs", &phase).unwrap_err();
		let message = error.to_string();
		assert!(message.contains("inputs"));
		assert!(message.contains("configuration phase"));
	}

	#[test]
	fn unsafe_read_guard_only_fires_while_implicit() {
		let mut state = ValueState::new();
		state.disallow_unsafe_read();
		assert!(matches!(
			state.guard_read("the set"),
			Err(SourceSetError::UnsafeRead(_))
		));

		state.set_explicit();
		assert!(state.guard_read("the set").is_ok());
	}

	#[test]
	fn finalize_on_read_disarms_after_finalization() {
		let mut state = ValueState::new();
		assert!(!state.finalize_on_read_due());

		state.arm_finalize_on_read();
		assert!(state.finalize_on_read_due());

		state.mark_finalized();
		assert!(!state.finalize_on_read_due());
	}
}
