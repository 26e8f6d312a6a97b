//! In-memory platform for provisioner tests.
use crate::platform::{Platform, PlatformError};
use crate::resource::{ResourceKind, ResourceSpec};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Op {
    Exists,
    Ready,
    Create,
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    existing: RefCell<BTreeSet<ResourceKind>>,
    scripted: RefCell<BTreeMap<(Op, ResourceKind), VecDeque<PlatformError>>>,
    always: BTreeMap<(Op, ResourceKind), PlatformError>,
    race_on_create: BTreeSet<ResourceKind>,
    hidden_after_create: BTreeSet<ResourceKind>,
    starting: RefCell<BTreeMap<ResourceKind, usize>>,
    calls: RefCell<Vec<(Op, ResourceKind)>>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_existing(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        let fake = Self::new();
        fake.existing.borrow_mut().extend(kinds);
        fake
    }

    /// Every `op` on `kind` fails with `err`.
    pub(crate) fn fail_always(mut self, op: Op, kind: ResourceKind, err: PlatformError) -> Self {
        self.always.insert((op, kind), err);
        self
    }

    /// The next `times` calls of `op` on `kind` fail with `err`.
    pub(crate) fn fail_times(self, op: Op, kind: ResourceKind, times: usize, err: PlatformError) -> Self {
        self.scripted
            .borrow_mut()
            .entry((op, kind))
            .or_default()
            .extend(std::iter::repeat_n(err, times));
        self
    }

    /// Another writer creates `kind` just before our create lands.
    pub(crate) fn race_on_create(mut self, kind: ResourceKind) -> Self {
        self.race_on_create.insert(kind);
        self
    }

    /// Creates of `kind` succeed but never become visible.
    pub(crate) fn hide_after_create(mut self, kind: ResourceKind) -> Self {
        self.hidden_after_create.insert(kind);
        self
    }

    /// The first `polls` readiness checks of `kind` report it still starting.
    pub(crate) fn starting_for(self, kind: ResourceKind, polls: usize) -> Self {
        self.starting.borrow_mut().insert(kind, polls);
        self
    }

    pub(crate) fn existing(&self) -> BTreeSet<ResourceKind> {
        self.existing.borrow().clone()
    }

    pub(crate) fn calls(&self) -> Vec<(Op, ResourceKind)> {
        self.calls.borrow().clone()
    }

    pub(crate) fn count(&self, op: Op, kind: ResourceKind) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| **call == (op, kind))
            .count()
    }

    pub(crate) fn creates(&self) -> Vec<ResourceKind> {
        self.calls
            .borrow()
            .iter()
            .filter(|(op, _)| *op == Op::Create)
            .map(|(_, kind)| *kind)
            .collect()
    }

    fn record(&self, op: Op, kind: ResourceKind) -> Result<(), PlatformError> {
        self.calls.borrow_mut().push((op, kind));
        if let Some(err) = self
            .scripted
            .borrow_mut()
            .get_mut(&(op, kind))
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match self.always.get(&(op, kind)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Platform for FakePlatform {
    fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError> {
        self.record(Op::Exists, spec.kind)?;
        let found = self.existing.borrow().contains(&spec.kind);
        Ok(found.then(|| format!("id-{}", spec.name)))
    }

    fn ready(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        self.record(Op::Ready, spec.kind)?;
        if let Some(remaining) = self.starting.borrow_mut().get_mut(&spec.kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(self.existing.borrow().contains(&spec.kind))
    }

    fn create(&self, spec: &ResourceSpec) -> Result<String, PlatformError> {
        self.record(Op::Create, spec.kind)?;
        if self.race_on_create.contains(&spec.kind) {
            self.existing.borrow_mut().insert(spec.kind);
            return Err(PlatformError::Conflict(format!("{} already exists", spec.name)));
        }
        if self.existing.borrow().contains(&spec.kind) {
            return Err(PlatformError::Conflict(format!("{} already exists", spec.name)));
        }
        if !self.hidden_after_create.contains(&spec.kind) {
            self.existing.borrow_mut().insert(spec.kind);
        }
        Ok(format!("id-{}", spec.name))
    }
}
