//! Ordered acquire/release stages with transactional rollback
//!
//! Every composite GPU resource in the engine is created and destroyed
//! through the same protocol: stages acquire in the order they were added
//! and release strictly in reverse. A failure while acquiring stage *k*
//! releases stages `[0, k-1]` before the error propagates, so a caller never
//! observes a half-initialized resource.

use thiserror::Error;

/// Failure while acquiring a stage, carrying a human-readable cause chain
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    /// Create a load error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Prefix the error with an outer context, producing "outer → inner"
    pub fn context(self, outer: impl AsRef<str>) -> Self {
        Self {
            message: format!("{} → {}", outer.as_ref(), self.message),
        }
    }
}

/// Acquire action of one stage
pub type AcquireFn<C> = fn(&mut C) -> Result<(), LoadError>;

/// Release action of one stage
pub type ReleaseFn<C> = fn(&mut C);

struct Stage<C> {
    name: &'static str,
    acquire: AcquireFn<C>,
    release: ReleaseFn<C>,
}

/// Ordered sequence of (acquire, release) actions over a shared context.
///
/// The stack owns no resources itself; it only orchestrates ownership held
/// by the context `C`. Invariant: at any time exactly the first `acquired`
/// stages hold their resources, and a stage's release runs at most once per
/// successful acquire.
pub struct StageStack<C> {
    stages: Vec<Stage<C>>,
    loaded: bool,
    acquired: usize,
}

impl<C> Default for StageStack<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> StageStack<C> {
    /// Create an empty stack
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            loaded: false,
            acquired: 0,
        }
    }

    /// Append a stage; order of addition is acquire order
    pub fn add(&mut self, name: &'static str, acquire: AcquireFn<C>, release: ReleaseFn<C>) {
        self.stages.push(Stage {
            name,
            acquire,
            release,
        });
    }

    /// Number of stages in the stack
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the stack holds no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether the stack is currently loaded
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Acquire every stage in order. A no-op if already loaded. On failure
    /// at stage *k*, stages `[0, k-1]` are released in reverse order and the
    /// error is annotated with the failing stage's name.
    pub fn load(&mut self, context: &mut C) -> Result<(), LoadError> {
        if self.loaded {
            return Ok(());
        }
        self.loaded = true;
        self.acquire_remaining(context)
    }

    /// Release every acquired stage in reverse order. A no-op if not loaded.
    pub fn unload(&mut self, context: &mut C) {
        if !self.loaded {
            return;
        }
        self.loaded = false;
        self.release_down_to(context, 0);
    }

    /// Release stages from `step` to the end, then re-acquire them. Used for
    /// partial reconfiguration without tearing down the whole stack. Returns
    /// `false` (without acting) when the stack is not loaded. A failed
    /// re-acquire unwinds the entire stack before the error propagates.
    pub fn reload(&mut self, context: &mut C, step: usize) -> Result<bool, LoadError> {
        if !self.loaded {
            return Ok(false);
        }
        self.release_down_to(context, step);
        self.acquire_remaining(context)?;
        Ok(true)
    }

    fn acquire_remaining(&mut self, context: &mut C) -> Result<(), LoadError> {
        while self.acquired < self.stages.len() {
            let stage = &self.stages[self.acquired];
            let name = stage.name;
            match (stage.acquire)(context) {
                Ok(()) => self.acquired += 1,
                Err(error) => {
                    self.loaded = false;
                    self.release_down_to(context, 0);
                    return Err(error.context(format!("failed to initialize {name}")));
                }
            }
        }
        Ok(())
    }

    fn release_down_to(&mut self, context: &mut C, step: usize) {
        while self.acquired > step {
            self.acquired -= 1;
            (self.stages[self.acquired].release)(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        events: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl Probe {
        fn step(&mut self, name: &'static str) -> Result<(), LoadError> {
            if self.fail_on == Some(name) {
                return Err(LoadError::new(format!("{name} exploded")));
            }
            self.events.push(format!("acquire {name}"));
            Ok(())
        }

        fn undo(&mut self, name: &'static str) {
            self.events.push(format!("release {name}"));
        }
    }

    fn acquire_a(p: &mut Probe) -> Result<(), LoadError> {
        p.step("a")
    }
    fn acquire_b(p: &mut Probe) -> Result<(), LoadError> {
        p.step("b")
    }
    fn acquire_c(p: &mut Probe) -> Result<(), LoadError> {
        p.step("c")
    }
    fn release_a(p: &mut Probe) {
        p.undo("a")
    }
    fn release_b(p: &mut Probe) {
        p.undo("b")
    }
    fn release_c(p: &mut Probe) {
        p.undo("c")
    }

    fn stack() -> StageStack<Probe> {
        let mut stack = StageStack::new();
        stack.add("a", acquire_a, release_a);
        stack.add("b", acquire_b, release_b);
        stack.add("c", acquire_c, release_c);
        stack
    }

    #[test]
    fn load_acquires_in_order_and_unload_releases_in_reverse() {
        let mut probe = Probe::default();
        let mut stack = stack();

        stack.load(&mut probe).unwrap();
        stack.unload(&mut probe);

        assert_eq!(
            probe.events,
            [
                "acquire a",
                "acquire b",
                "acquire c",
                "release c",
                "release b",
                "release a"
            ]
        );
    }

    #[test]
    fn failed_acquire_rolls_back_earlier_stages_only() {
        let mut probe = Probe {
            fail_on: Some("c"),
            ..Probe::default()
        };
        let mut stack = stack();

        let error = stack.load(&mut probe).unwrap_err();

        // The failing stage never observes a release; the others observe
        // exactly one, in reverse order.
        assert_eq!(
            probe.events,
            ["acquire a", "acquire b", "release b", "release a"]
        );
        assert_eq!(error.to_string(), "failed to initialize c → c exploded");
        assert!(!stack.is_loaded());
    }

    #[test]
    fn load_twice_acquires_only_once() {
        let mut probe = Probe::default();
        let mut stack = stack();

        stack.load(&mut probe).unwrap();
        stack.load(&mut probe).unwrap();

        assert_eq!(probe.events, ["acquire a", "acquire b", "acquire c"]);
    }

    #[test]
    fn unload_without_load_releases_nothing() {
        let mut probe = Probe::default();
        let mut stack = stack();

        stack.unload(&mut probe);

        assert!(probe.events.is_empty());
    }

    #[test]
    fn unload_twice_releases_only_once() {
        let mut probe = Probe::default();
        let mut stack = stack();

        stack.load(&mut probe).unwrap();
        stack.unload(&mut probe);
        stack.unload(&mut probe);

        assert_eq!(probe.events.len(), 6);
    }

    #[test]
    fn reload_releases_and_reacquires_the_tail() {
        let mut probe = Probe::default();
        let mut stack = stack();

        stack.load(&mut probe).unwrap();
        probe.events.clear();

        assert!(stack.reload(&mut probe, 1).unwrap());
        assert_eq!(
            probe.events,
            ["release c", "release b", "acquire b", "acquire c"]
        );
    }

    #[test]
    fn reload_on_unloaded_stack_is_a_no_op() {
        let mut probe = Probe::default();
        let mut stack = stack();

        assert!(!stack.reload(&mut probe, 0).unwrap());
        assert!(probe.events.is_empty());
    }

    #[test]
    fn failed_reload_unwinds_the_whole_stack() {
        let mut probe = Probe::default();
        let mut stack = stack();

        stack.load(&mut probe).unwrap();
        probe.events.clear();
        probe.fail_on = Some("c");

        assert!(stack.reload(&mut probe, 2).is_err());
        assert_eq!(probe.events, ["release c", "release b", "release a"]);
        assert!(!stack.is_loaded());

        // A fresh load starts from stage zero again.
        probe.fail_on = None;
        probe.events.clear();
        stack.load(&mut probe).unwrap();
        assert_eq!(probe.events, ["acquire a", "acquire b", "acquire c"]);
    }

    #[test]
    fn error_context_chains_outer_to_inner() {
        let error = LoadError::new("inner cause").context("outer context");
        assert_eq!(error.to_string(), "outer context → inner cause");
    }
}
