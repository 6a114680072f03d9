use crate::{
    Error,
    Result,
    catalog::CaseCatalog,
    history::HistoryRecorder,
    ledger::{
        Address,
        ClientSeed,
        Ledger,
        LedgerClient,
        OwnedItem,
        TxHash,
        owned_items,
    },
    opening::{
        OpeningMachine,
        Outcome,
        Phase,
        demo_outcome,
        ledger_outcome,
    },
    roll::{
        DEFAULT_REEL_LENGTH,
        build_reel,
    },
    storage::KeyValueStore,
};
use chrono::Utc;
use rand::rngs::StdRng;
use std::time::{
    Duration,
    Instant,
};
use tracing::{
    error,
    info,
};

/// Price of one case, in BNB.
pub const CASE_PRICE: f64 = 0.03;

pub const DEFAULT_SPIN_DURATION: Duration = Duration::from_secs(8);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2000);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionSettings {
    pub reel_length: usize,
    pub spin_duration: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reel_length: DEFAULT_REEL_LENGTH,
            spin_duration: DEFAULT_SPIN_DURATION,
        }
    }
}

/// Where winners come from.
#[derive(Clone, Debug)]
pub enum OutcomeSource {
    Demo,
    Ledger {
        client: LedgerClient,
        owner: Address,
        settle_delay: Duration,
    },
}

pub struct CaseSession<S> {
    catalog: CaseCatalog,
    source: OutcomeSource,
    recorder: HistoryRecorder<S>,
    machine: OpeningMachine,
    rng: StdRng,
    user: String,
    settings: SessionSettings,
}

impl<S: KeyValueStore> CaseSession<S> {
    /// Fails when the catalog does not pass validation; nothing can be opened from a
    /// misconfigured case.
    pub fn new(
        catalog: CaseCatalog,
        source: OutcomeSource,
        recorder: HistoryRecorder<S>,
        user: impl Into<String>,
        settings: SessionSettings,
        rng: StdRng,
    ) -> Result<Self> {
        catalog.validate()?;
        Ok(Self {
            catalog,
            source,
            recorder,
            machine: OpeningMachine::new(),
            rng,
            user: user.into(),
            settings,
        })
    }

    pub fn catalog(&self) -> &CaseCatalog {
        &self.catalog
    }

    pub fn machine(&self) -> &OpeningMachine {
        &self.machine
    }

    pub fn recorder(&self) -> &HistoryRecorder<S> {
        &self.recorder
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_demo(&self) -> bool {
        matches!(self.source, OutcomeSource::Demo)
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Decides the winner, builds the reel around it and starts the spin. Any failure
    /// before the spin starts puts the session back to idle.
    pub async fn open(&mut self) -> Result<()> {
        self.machine.begin()?;
        match self.prepare().await {
            Ok((outcome, reel)) => {
                self.machine.start_animation(outcome, reel, Instant::now())?;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "opening failed");
                self.machine.fail()?;
                Err(e)
            }
        }
    }

    async fn prepare(&mut self) -> Result<(Outcome, crate::roll::Reel)> {
        let outcome = match &self.source {
            OutcomeSource::Demo => demo_outcome(&self.catalog, &mut self.rng)?,
            OutcomeSource::Ledger {
                client,
                owner,
                settle_delay,
            } => {
                let seed = ClientSeed::random(&mut self.rng);
                ledger_outcome(client, owner, &self.catalog, seed, *settle_delay).await?
            }
        };
        let reel = build_reel(
            &self.catalog.items,
            &outcome.winner,
            self.settings.reel_length,
            &mut self.rng,
        )?;
        Ok((outcome, reel))
    }

    pub fn progress(&self, now: Instant) -> Option<f64> {
        self.machine.progress(now, self.settings.spin_duration)
    }

    /// Advances the spin. When it completes, the outcome is recorded and returned.
    pub fn tick(&mut self, now: Instant) -> Result<Option<Outcome>> {
        let Some(outcome) = self.machine.finish(now, self.settings.spin_duration) else {
            return Ok(None);
        };
        self.recorder.record_opening(
            &outcome.winner,
            &self.user,
            &self.catalog.case_name,
            Utc::now(),
            outcome.transaction.as_ref().map(TxHash::as_str),
        )?;
        info!(item = %outcome.winner.name, "revealed");
        Ok(Some(outcome))
    }

    pub fn play_again(&mut self) -> Result<()> {
        self.machine.reset()?;
        Ok(())
    }

    /// Unredeemed on-chain items. Demo sessions own nothing on the ledger.
    pub async fn owned_items(&self) -> Result<Vec<OwnedItem>> {
        match &self.source {
            OutcomeSource::Demo => Ok(Vec::new()),
            OutcomeSource::Ledger { client, owner, .. } => {
                let records = client.user_inventory(owner).await?;
                Ok(owned_items(&records, &self.catalog))
            }
        }
    }

    /// Submits `sellItem`. Callers re-read [`Self::owned_items`] afterwards rather than
    /// editing their copy.
    pub async fn sell(&self, inventory_index: usize) -> Result<TxHash> {
        match &self.source {
            OutcomeSource::Demo => Err(Error::DemoMode("selling")),
            OutcomeSource::Ledger { client, owner, .. } => {
                let tx = client.sell_item(owner, inventory_index).await?;
                info!(inventory_index, %tx, "sellItem submitted");
                Ok(tx)
            }
        }
    }
}
