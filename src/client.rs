use crate::ui;
use case_rush::{
    catalog::{
        CaseCatalog,
        CaseItem,
        CatalogSort,
    },
    deployment::{
        DeploymentEnv,
        DeploymentRecord,
        DeploymentStore,
        compute_catalog_hash,
    },
    history::{
        ANONYMOUS_USER,
        HistoryRecorder,
        InventoryRecord,
        LeaderboardEntry,
        LeaderboardStats,
    },
    ledger::{
        Address,
        HttpLedger,
        LedgerClient,
        OwnedItem,
        SimulatedLedger,
    },
    opening::{
        Outcome,
        Phase,
    },
    roll::Reel,
    session::{
        CASE_PRICE,
        CaseSession,
        OutcomeSource,
        SessionSettings,
    },
    storage::SledStore,
};
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use rand::{
    SeedableRng,
    rngs::StdRng,
};
use std::{
    fmt,
    path::PathBuf,
    time::{
        Duration,
        Instant,
    },
};
use tokio::time;
use tracing::{
    error,
    info,
    warn,
};

pub const LEADERBOARD_REFRESH: Duration = Duration::from_secs(10);
const ANIMATION_TICK: Duration = Duration::from_millis(50);
const MAX_ERRORS: usize = 50;
const STORE_DIR: &str = "store";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Demo,
    Local,
    Remote(DeploymentEnv),
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Demo => write!(f, "Demo"),
            Network::Local => write!(f, "Local (simulated ledger)"),
            Network::Remote(env) => write!(f, "{env}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: Network,
    pub catalog: CaseCatalog,
    pub data_dir: PathBuf,
    pub address: String,
    pub gateway_url: Option<String>,
    pub contract: Option<String>,
    pub settings: SessionSettings,
    pub settle_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub network: Network,
    pub case_name: String,
    pub case_description: Option<String>,
    pub user: String,
    pub phase: Phase,
    pub sort: CatalogSort,
    pub items: Vec<CaseItem>,
    pub reel: Option<Reel>,
    pub progress: Option<f64>,
    pub outcome: Option<Outcome>,
    pub local_inventory: Vec<InventoryRecord>,
    pub owned: Vec<OwnedItem>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub sellable: bool,
    pub status: String,
    pub errors: Vec<String>,
    pub now: DateTime<Utc>,
}

impl AppSnapshot {
    /// Combined floor value of what the player currently holds.
    pub fn inventory_value(&self) -> f64 {
        if self.sellable {
            self.owned.iter().map(|owned| owned.item.floor_price).sum()
        } else {
            self.local_inventory
                .iter()
                .map(|record| record.item.floor_price)
                .sum()
        }
    }

    pub fn leaderboard_stats(&self) -> LeaderboardStats {
        LeaderboardStats::from_entries(&self.leaderboard)
    }
}

pub struct AppController {
    session: CaseSession<SledStore>,
    network: Network,
    sort: CatalogSort,
    local_inventory: Vec<InventoryRecord>,
    owned: Vec<OwnedItem>,
    leaderboard: Vec<LeaderboardEntry>,
    status: String,
    errors: Vec<String>,
}

impl AppController {
    pub fn new(config: AppConfig) -> Result<Self> {
        let AppConfig {
            network,
            catalog,
            data_dir,
            address,
            gateway_url,
            contract,
            settings,
            settle_delay,
        } = config;
        let mut rng = StdRng::from_os_rng();
        let mut status = format!("Ready | {} | {}", network, catalog.case_name);

        let source = match network {
            Network::Demo => OutcomeSource::Demo,
            Network::Local => {
                let ledger = SimulatedLedger::with_random_seed(&catalog, &mut rng);
                let store = DeploymentStore::open(&data_dir, DeploymentEnv::Local)
                    .wrap_err("opening local deployment store")?;
                store
                    .replace_latest(DeploymentRecord::new(
                        DeploymentEnv::Local,
                        ledger.server_seed_hash(),
                        "in-process",
                        &catalog,
                    )?)
                    .wrap_err("recording simulated deployment")?;
                info!(commitment = %ledger.server_seed_hash(), "simulated ledger ready");
                OutcomeSource::Ledger {
                    client: LedgerClient::Simulated(ledger),
                    owner: Address::new(address.clone()),
                    settle_delay,
                }
            }
            Network::Remote(env) => {
                if address == ANONYMOUS_USER {
                    return Err(eyre!("--address is required on {env}"));
                }
                let (ledger, mismatch) =
                    connect_remote(env, &data_dir, &catalog, gateway_url, contract)?;
                if let Some(warning) = mismatch {
                    status = warning;
                }
                OutcomeSource::Ledger {
                    client: LedgerClient::Http(ledger),
                    owner: Address::new(address.clone()),
                    settle_delay,
                }
            }
        };

        let store = SledStore::open(data_dir.join(STORE_DIR))
            .wrap_err("opening local history store")?;
        let session = CaseSession::new(
            catalog,
            source,
            HistoryRecorder::new(store),
            address,
            settings,
            rng,
        )?;
        let mut controller = Self {
            session,
            network,
            sort: CatalogSort::default(),
            local_inventory: Vec::new(),
            owned: Vec::new(),
            leaderboard: Vec::new(),
            status,
            errors: Vec::new(),
        };
        controller.refresh_history();
        Ok(controller)
    }

    pub fn is_animating(&self) -> bool {
        self.session.phase() == Phase::Animating
    }

    pub fn is_demo(&self) -> bool {
        self.session.is_demo()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn snapshot(&self, now: Instant) -> AppSnapshot {
        let catalog = self.session.catalog();
        let machine = self.session.machine();
        AppSnapshot {
            network: self.network,
            case_name: catalog.case_name.clone(),
            case_description: catalog.case_description.clone(),
            user: self.session.user().to_string(),
            phase: self.session.phase(),
            sort: self.sort,
            items: catalog.sorted(self.sort).into_iter().cloned().collect(),
            reel: machine.reel().cloned(),
            progress: self.session.progress(now),
            outcome: machine.outcome().cloned(),
            local_inventory: self.local_inventory.clone(),
            owned: self.owned.clone(),
            leaderboard: self.leaderboard.clone(),
            sellable: !self.is_demo(),
            status: self.status.clone(),
            errors: self.errors.iter().rev().take(5).cloned().collect(),
            now: Utc::now(),
        }
    }

    pub fn cycle_sort(&mut self) {
        self.sort = self.sort.next();
    }

    pub async fn open_case(&mut self) {
        match self.session.open().await {
            Ok(()) => {
                let price = if self.is_demo() { 0.0 } else { CASE_PRICE };
                self.status = if price > 0.0 {
                    format!("Paid {price} BNB, spinning...")
                } else {
                    String::from("Spinning...")
                };
            }
            Err(e) => {
                self.status = String::from("Opening failed");
                self.push_errors(vec![format!("open case: {e}")]);
            }
        }
    }

    /// Advances the reveal. Returns true once the winner is shown.
    pub async fn tick(&mut self, now: Instant) -> bool {
        match self.session.tick(now) {
            Ok(Some(outcome)) => {
                let winner = &outcome.winner;
                self.status = format!(
                    "You won {} ({}) worth {} BNB | Enter to play again",
                    winner.name, winner.rarity, winner.floor_price
                );
                self.refresh_history();
                if !self.is_demo() {
                    self.refresh_owned().await;
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.push_errors(vec![format!("recording outcome: {e}")]);
                true
            }
        }
    }

    pub fn play_again(&mut self) {
        match self.session.play_again() {
            Ok(()) => self.status = String::from("Ready"),
            Err(e) => self.push_errors(vec![e.to_string()]),
        }
    }

    pub fn refresh_history(&mut self) {
        let recorder = self.session.recorder();
        match (recorder.inventory(), recorder.leaderboard()) {
            (Ok(inventory), Ok(leaderboard)) => {
                self.local_inventory = inventory;
                self.leaderboard = leaderboard;
            }
            (Err(e), _) | (_, Err(e)) => {
                self.push_errors(vec![format!("reading local history: {e}")]);
            }
        }
    }

    pub async fn refresh_owned(&mut self) {
        match self.session.owned_items().await {
            Ok(owned) => self.owned = owned,
            Err(e) => self.push_errors(vec![format!("reading ledger inventory: {e}")]),
        }
    }

    /// Sells, then re-reads the ledger instead of patching the local list.
    pub async fn sell(&mut self, inventory_index: usize) {
        let name = self
            .owned
            .iter()
            .find(|owned| owned.inventory_index == inventory_index)
            .map(|owned| owned.item.name.clone())
            .unwrap_or_else(|| format!("item #{inventory_index}"));
        match self.session.sell(inventory_index).await {
            Ok(tx) => {
                self.status = format!("Sold {name} | tx {tx}");
            }
            Err(e) => {
                self.status = format!("Selling {name} failed");
                self.push_errors(vec![format!("sell item: {e}")]);
            }
        }
        self.refresh_owned().await;
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}

fn connect_remote(
    env: DeploymentEnv,
    data_dir: &std::path::Path,
    catalog: &CaseCatalog,
    gateway_url: Option<String>,
    contract: Option<String>,
) -> Result<(HttpLedger, Option<String>)> {
    let store =
        DeploymentStore::open(data_dir, env).wrap_err("opening deployment store")?;
    let record = store.latest().wrap_err("loading deployment records")?;
    let gateway = gateway_url
        .or_else(|| record.as_ref().map(|r| r.network_url.clone()))
        .unwrap_or_else(|| env.default_gateway_url().to_string());

    let contract = match (contract, &record) {
        (Some(contract), Some(record)) if record.contract_address == contract => contract,
        (Some(contract), _) => {
            store
                .append(DeploymentRecord::new(env, contract.clone(), gateway.clone(), catalog)?)
                .wrap_err("recording deployment")?;
            contract
        }
        (None, Some(record)) => record.contract_address.clone(),
        (None, None) => {
            return Err(eyre!(
                "no {env} deployment recorded in {}; pass --contract",
                store.path().display()
            ));
        }
    };

    let mismatch = match &record {
        Some(record) if record.contract_address == contract => {
            let hash = compute_catalog_hash(catalog)?;
            if record.is_compatible_with_hash(&hash) {
                None
            } else {
                warn!(%contract, "catalog differs from the one recorded for this deployment");
                Some(String::from(
                    "Catalog differs from the deployed contract's; item names may not match",
                ))
            }
        }
        _ => None,
    };

    info!(%env, %gateway, %contract, "connecting to case contract");
    Ok((HttpLedger::new(gateway, contract)?, mismatch))
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let mut controller = AppController::new(config)?;
    if !controller.is_demo() {
        controller.refresh_owned().await;
    }
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    tracing::info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut controller, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

fn redraw(controller: &AppController, ui_state: &mut ui::UiState) -> Result<()> {
    let snapshot = controller.snapshot(Instant::now());
    ui::draw(ui_state, &snapshot)
}

/// Shows `status` before a call that blocks the loop.
fn show_processing_status(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    status: impl Into<String>,
    context: &'static str,
) -> Result<()> {
    controller.set_status(status);
    redraw(controller, ui_state).wrap_err(context)
}

async fn run_loop(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    let mut animation = time::interval(ANIMATION_TICK);
    let mut leaderboard = time::interval(LEADERBOARD_REFRESH);
    redraw(controller, ui_state).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = animation.tick() => {
                if controller.is_animating() {
                    controller.tick(Instant::now()).await;
                    redraw(controller, ui_state).wrap_err("draw during spin failed")?;
                }
            }
            _ = leaderboard.tick() => {
                controller.refresh_history();
                if !controller.is_demo() && !controller.is_animating() {
                    controller.refresh_owned().await;
                }
                redraw(controller, ui_state).wrap_err("draw after refresh failed")?;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::OpenCase => {
                        let waiting = if controller.is_demo() {
                            "Rolling..."
                        } else {
                            "Waiting for the ledger to confirm openCase..."
                        };
                        show_processing_status(
                            controller,
                            ui_state,
                            waiting,
                            "draw while opening case failed",
                        )?;
                        controller.open_case().await;
                    }
                    ui::UserEvent::PlayAgain => controller.play_again(),
                    ui::UserEvent::CycleSort => controller.cycle_sort(),
                    ui::UserEvent::RefreshInventory => {
                        controller.refresh_history();
                        controller.refresh_owned().await;
                    }
                    ui::UserEvent::ConfirmSell { inventory_index } => {
                        show_processing_status(
                            controller,
                            ui_state,
                            "Submitting sellItem...",
                            "draw while selling failed",
                        )?;
                        controller.sell(inventory_index).await;
                    }
                }
                redraw(controller, ui_state).wrap_err("draw after input failed")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tempdir::TempDir;

    fn config(dir: &TempDir, network: Network) -> AppConfig {
        AppConfig {
            network,
            catalog: CaseCatalog::bundled().unwrap(),
            data_dir: dir.path().to_path_buf(),
            address: String::from("0x1234567890abcdef1234"),
            gateway_url: None,
            contract: None,
            settings: SessionSettings {
                reel_length: 30,
                spin_duration: Duration::ZERO,
            },
            settle_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn open_case__demo_spin_records_history_and_reports_winner() {
        // given
        let dir = TempDir::new("case-rush").unwrap();
        let mut controller = AppController::new(config(&dir, Network::Demo)).unwrap();

        // when
        controller.open_case().await;
        let revealed = controller.tick(Instant::now()).await;

        // then
        assert!(revealed);
        let snapshot = controller.snapshot(Instant::now());
        assert_eq!(snapshot.phase, Phase::Revealed);
        assert_eq!(snapshot.local_inventory.len(), 1);
        assert_eq!(snapshot.leaderboard.len(), 1);
        assert!(snapshot.status.starts_with("You won"));
        assert!(!snapshot.sellable);
    }

    #[tokio::test]
    async fn snapshot__leaderboard_stats_follow_recorded_openings() {
        // given
        let dir = TempDir::new("case-rush").unwrap();
        let mut controller = AppController::new(config(&dir, Network::Demo)).unwrap();

        // when
        let mut won = Vec::new();
        for _ in 0..3 {
            controller.open_case().await;
            controller.tick(Instant::now()).await;
            won.push(controller.snapshot(Instant::now()).outcome.unwrap().winner.floor_price);
            controller.play_again();
        }

        // then
        let stats = controller.snapshot(Instant::now()).leaderboard_stats();
        assert_eq!(stats.total_opened, 3);
        assert!((stats.total_value - won.iter().sum::<f64>()).abs() < 1e-9);
        assert_eq!(stats.highest_win, won.iter().copied().fold(0.0, f64::max));
    }

    #[test]
    fn new__local_restarts_keep_one_deployment_record() {
        // given
        let dir = TempDir::new("case-rush").unwrap();

        // when
        let first = AppController::new(config(&dir, Network::Local)).unwrap();
        drop(first);
        let _second = AppController::new(config(&dir, Network::Local)).unwrap();

        // then
        let store = DeploymentStore::open(dir.path(), DeploymentEnv::Local).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sell__local_ledger_item_disappears_after_reread() {
        // given
        let dir = TempDir::new("case-rush").unwrap();
        let mut controller = AppController::new(config(&dir, Network::Local)).unwrap();
        controller.open_case().await;
        controller.tick(Instant::now()).await;
        let owned = controller.snapshot(Instant::now()).owned;
        assert_eq!(owned.len(), 1);

        // when
        controller.sell(owned[0].inventory_index).await;

        // then
        let snapshot = controller.snapshot(Instant::now());
        assert!(snapshot.owned.is_empty());
        assert!(snapshot.status.starts_with("Sold"));
        assert!(snapshot.errors.is_empty());
    }

    #[tokio::test]
    async fn sell__failure_is_listed_in_errors() {
        // given
        let dir = TempDir::new("case-rush").unwrap();
        let mut controller = AppController::new(config(&dir, Network::Local)).unwrap();

        // when
        controller.sell(3).await;

        // then
        let snapshot = controller.snapshot(Instant::now());
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.errors[0].contains("no inventory item at index 3"));
    }

    #[test]
    fn new__remote_network_without_deployment_or_contract_is_rejected() {
        // given
        let dir = TempDir::new("case-rush").unwrap();

        // when
        let result =
            AppController::new(config(&dir, Network::Remote(DeploymentEnv::Testnet)));

        // then
        let err = result.err().unwrap();
        assert!(err.to_string().contains("pass --contract"));
    }

    #[test]
    fn cycle_sort__reorders_snapshot_items() {
        // given
        let dir = TempDir::new("case-rush").unwrap();
        let mut controller = AppController::new(config(&dir, Network::Demo)).unwrap();

        // when
        controller.cycle_sort();
        let snapshot = controller.snapshot(Instant::now());

        // then
        assert_eq!(snapshot.sort, CatalogSort::Price);
        assert_eq!(snapshot.items[0].weapon, "Karambit");
    }
}
