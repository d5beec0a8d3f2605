use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::BoardError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Reorder,
    Delete,
}

impl MutationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Reorder => "reorder",
            Self::Delete => "delete",
        }
    }
}

/// Places inside a unit of work where a fault may be injected.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FaultPoint {
    /// The range query finished and the shift has been computed.
    AfterRead,
    /// `written` shifted records have been updated so far.
    AfterWrite { written: usize },
    /// Every write of the unit is done; commit comes next.
    BeforeCommit,
}

/// Hook consulted by the engine inside every unit of work. Returning an
/// error aborts the unit, so the store commits nothing.
pub trait FaultInjector: Send + Sync + Debug {
    /// # Errors
    /// Returns [`BoardError::TransactionFailure`] to abort the running unit.
    fn check(&self, kind: MutationKind, point: FaultPoint) -> Result<(), BoardError>;
}

impl<T: FaultInjector + ?Sized> FaultInjector for Arc<T> {
    fn check(&self, kind: MutationKind, point: FaultPoint) -> Result<(), BoardError> {
        (**self).check(kind, point)
    }
}

impl<T: FaultInjector + ?Sized> FaultInjector for &T {
    fn check(&self, kind: MutationKind, point: FaultPoint) -> Result<(), BoardError> {
        (**self).check(kind, point)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn check(&self, _kind: MutationKind, _point: FaultPoint) -> Result<(), BoardError> {
        Ok(())
    }
}

/// Random commit failures, one roll per unit just before commit.
#[derive(Debug)]
pub struct ChaosFaults {
    reorder_rate: f64,
    mutation_rate: f64,
    rng: Mutex<StdRng>,
}

impl ChaosFaults {
    pub const DEFAULT_REORDER_RATE: f64 = 0.15;
    pub const DEFAULT_MUTATION_RATE: f64 = 0.075;

    /// Build a chaos injector. `seed` makes the failure sequence repeatable.
    ///
    /// # Errors
    /// Returns [`BoardError::InvalidArgument`] when a rate is outside `0.0..=1.0`.
    pub fn new(
        reorder_rate: f64,
        mutation_rate: f64,
        seed: Option<u64>,
    ) -> Result<Self, BoardError> {
        let rates = [
            ("reorder_failure_rate", reorder_rate),
            ("mutation_failure_rate", mutation_rate),
        ];
        for (field, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(BoardError::InvalidArgument(format!(
                    "{field} MUST be within 0.0..=1.0, got {rate}"
                )));
            }
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            reorder_rate,
            mutation_rate,
            rng: Mutex::new(rng),
        })
    }

    fn rate_for(&self, kind: MutationKind) -> f64 {
        match kind {
            MutationKind::Reorder => self.reorder_rate,
            MutationKind::Create | MutationKind::Update | MutationKind::Delete => {
                self.mutation_rate
            }
        }
    }
}

impl FaultInjector for ChaosFaults {
    fn check(&self, kind: MutationKind, point: FaultPoint) -> Result<(), BoardError> {
        if point != FaultPoint::BeforeCommit {
            return Ok(());
        }
        let rate = self.rate_for(kind);
        if rate <= 0.0 {
            return Ok(());
        }
        let roll = {
            let mut rng = self.rng.lock().map_err(|_| {
                BoardError::TransactionFailure("fault injector lock poisoned".to_string())
            })?;
            rng.gen_bool(rate)
        };
        if roll {
            tracing::warn!(kind = kind.as_str(), rate, "injected commit failure");
            return Err(BoardError::TransactionFailure(format!(
                "injected {} failure",
                kind.as_str()
            )));
        }
        Ok(())
    }
}

/// Fails exactly once, at the n-th checkpoint it sees (zero based).
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    fail_at: Option<usize>,
    seen: AtomicUsize,
}

impl ScriptedFaults {
    #[must_use]
    pub fn fail_at(checkpoint: usize) -> Self {
        Self {
            fail_at: Some(checkpoint),
            seen: AtomicUsize::new(0),
        }
    }

    /// Count checkpoints without ever failing.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn checkpoints_seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

impl FaultInjector for ScriptedFaults {
    fn check(&self, kind: MutationKind, point: FaultPoint) -> Result<(), BoardError> {
        let index = self.seen.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(index) {
            return Err(BoardError::TransactionFailure(format!(
                "scripted {} failure at checkpoint {index} ({point:?})",
                kind.as_str()
            )));
        }
        Ok(())
    }
}
