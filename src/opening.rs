//! Lifecycle of a single case opening and how its outcome is decided.
use crate::{
    Error,
    Result,
    catalog::{
        CaseCatalog,
        CaseItem,
        CatalogError,
    },
    ledger::{
        Address,
        ClientSeed,
        Ledger,
        TxHash,
    },
    roll::{
        Reel,
        roll,
    },
};
use rand::Rng;
use std::{
    fmt,
    time::{
        Duration,
        Instant,
    },
};
use tracing::info;

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub winner: CaseItem,
    /// Set when the outcome came from the ledger.
    pub transaction: Option<TxHash>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    AwaitingOutcome,
    Animating,
    Revealed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::AwaitingOutcome => "awaiting outcome",
            Phase::Animating => "animating",
            Phase::Revealed => "revealed",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OpeningError {
    #[error("cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },
    #[error("reel does not carry the decided winner")]
    ReelMismatch,
}

#[derive(Clone, Debug, Default)]
pub enum OpeningState {
    #[default]
    Idle,
    AwaitingOutcome,
    Animating {
        outcome: Outcome,
        reel: Reel,
        started_at: Instant,
    },
    Revealed {
        outcome: Outcome,
        reel: Reel,
    },
}

impl OpeningState {
    pub fn phase(&self) -> Phase {
        match self {
            OpeningState::Idle => Phase::Idle,
            OpeningState::AwaitingOutcome => Phase::AwaitingOutcome,
            OpeningState::Animating { .. } => Phase::Animating,
            OpeningState::Revealed { .. } => Phase::Revealed,
        }
    }
}

/// `idle → awaiting-outcome → animating → revealed`, one opening at a time. Every
/// transition is checked against the current phase, so a second start while an opening
/// is in flight is rejected instead of queued.
#[derive(Clone, Debug, Default)]
pub struct OpeningMachine {
    state: OpeningState,
}

impl OpeningMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &OpeningState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    fn reject(&self, action: &'static str) -> OpeningError {
        OpeningError::InvalidTransition {
            action,
            phase: self.phase(),
        }
    }

    pub fn begin(&mut self) -> Result<(), OpeningError> {
        match self.state {
            OpeningState::Idle => {
                self.state = OpeningState::AwaitingOutcome;
                Ok(())
            }
            _ => Err(self.reject("start an opening")),
        }
    }

    /// The outcome could not be decided; return to idle so the user can retry.
    pub fn fail(&mut self) -> Result<(), OpeningError> {
        match self.state {
            OpeningState::AwaitingOutcome => {
                self.state = OpeningState::Idle;
                Ok(())
            }
            _ => Err(self.reject("abandon an opening")),
        }
    }

    pub fn start_animation(
        &mut self,
        outcome: Outcome,
        reel: Reel,
        now: Instant,
    ) -> Result<(), OpeningError> {
        if !matches!(self.state, OpeningState::AwaitingOutcome) {
            return Err(self.reject("start the reveal"));
        }
        if reel.winner() != Some(&outcome.winner) {
            return Err(OpeningError::ReelMismatch);
        }
        self.state = OpeningState::Animating {
            outcome,
            reel,
            started_at: now,
        };
        Ok(())
    }

    /// Fraction of the spin elapsed at `now`, while animating.
    pub fn progress(&self, now: Instant, spin: Duration) -> Option<f64> {
        let OpeningState::Animating { started_at, .. } = &self.state else {
            return None;
        };
        if spin.is_zero() {
            return Some(1.0);
        }
        let elapsed = now.saturating_duration_since(*started_at);
        Some((elapsed.as_secs_f64() / spin.as_secs_f64()).min(1.0))
    }

    /// Moves to `revealed` once the spin has run its full duration, handing back the
    /// outcome exactly once.
    pub fn finish(&mut self, now: Instant, spin: Duration) -> Option<Outcome> {
        let OpeningState::Animating { started_at, .. } = &self.state else {
            return None;
        };
        if now.saturating_duration_since(*started_at) < spin {
            return None;
        }
        let OpeningState::Animating { outcome, reel, .. } =
            std::mem::take(&mut self.state)
        else {
            return None;
        };
        self.state = OpeningState::Revealed {
            outcome: outcome.clone(),
            reel,
        };
        Some(outcome)
    }

    pub fn reset(&mut self) -> Result<(), OpeningError> {
        match self.state {
            OpeningState::Revealed { .. } => {
                self.state = OpeningState::Idle;
                Ok(())
            }
            _ => Err(self.reject("play again")),
        }
    }

    pub fn reel(&self) -> Option<&Reel> {
        match &self.state {
            OpeningState::Animating { reel, .. } | OpeningState::Revealed { reel, .. } => {
                Some(reel)
            }
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.state {
            OpeningState::Animating { outcome, .. }
            | OpeningState::Revealed { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

/// Local draw used in demo mode.
pub fn demo_outcome<R: Rng>(catalog: &CaseCatalog, rng: &mut R) -> Result<Outcome> {
    let draw: f64 = rng.random();
    let winner =
        roll(&catalog.items, draw).ok_or(Error::Catalog(CatalogError::Empty))?;
    Ok(Outcome {
        winner: winner.clone(),
        transaction: None,
    })
}

/// Submits `openCase`, waits `settle` for the ledger to update, then reads the most
/// recent inventory record back as the authoritative winner.
pub async fn ledger_outcome<L: Ledger>(
    ledger: &L,
    owner: &Address,
    catalog: &CaseCatalog,
    seed: ClientSeed,
    settle: Duration,
) -> Result<Outcome> {
    let tx = ledger.open_case(owner, &seed).await?;
    info!(%tx, %seed, "openCase submitted");
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    let records = ledger.user_inventory(owner).await?;
    let latest = records.last().ok_or(Error::EmptyInventory)?;
    let winner = catalog
        .item_for_ledger_id(latest.item_id)
        .ok_or(Error::UnknownItem {
            item_id: latest.item_id,
        })?;
    Ok(Outcome {
        winner: winner.clone(),
        transaction: Some(tx),
    })
}
