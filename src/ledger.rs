//! Typed boundary to the case contract. Everything the contract returns is converted into
//! [`LedgerRecord`] here before the rest of the crate sees it.
use crate::{
    Error,
    Result,
    catalog::{
        CaseCatalog,
        CaseItem,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use rand::Rng;
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        Mutex,
    },
};
use tracing::{
    info,
    warn,
};

/// Odds on the contract are expressed in basis points.
const BASIS_POINTS: f64 = 10_000.0;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...abcd` form for tables; short or non-hex identities are returned as is.
    pub fn short(&self) -> String {
        let raw = self.0.as_str();
        let count = raw.chars().count();
        if !raw.starts_with("0x") || count <= 10 {
            return raw.to_string();
        }
        let head: String = raw.chars().take(6).collect();
        let tail: String = raw.chars().skip(count - 4).collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Player-supplied entropy mixed into the contract's draw.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientSeed([u8; 32]);

impl ClientSeed {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ClientSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of `getUserInventory`. `item_id` is 1-indexed into the catalog and
/// `timestamp` is in unix seconds.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub item_id: u64,
    pub timestamp: u64,
    pub redeemed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// An unredeemed ledger item joined with its catalog metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedItem {
    /// Position in the ledger's list; `sellItem` addresses items by this index.
    pub inventory_index: usize,
    pub item_id: u64,
    pub won_at: Option<DateTime<Utc>>,
    pub item: CaseItem,
}

pub fn owned_items(records: &[LedgerRecord], catalog: &CaseCatalog) -> Vec<OwnedItem> {
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| !record.redeemed)
        .filter_map(|(inventory_index, record)| {
            let Some(item) = catalog.item_for_ledger_id(record.item_id) else {
                warn!(item_id = record.item_id, "ledger item missing from catalog");
                return None;
            };
            Some(OwnedItem {
                inventory_index,
                item_id: record.item_id,
                won_at: DateTime::from_timestamp(record.timestamp as i64, 0),
                item: item.clone(),
            })
        })
        .collect()
}

#[allow(async_fn_in_trait)]
pub trait Ledger {
    async fn user_inventory(&self, owner: &Address) -> Result<Vec<LedgerRecord>>;

    /// Submits `openCase`; the outcome is read back from the inventory afterwards.
    async fn open_case(&self, owner: &Address, seed: &ClientSeed) -> Result<TxHash>;

    async fn sell_item(&self, owner: &Address, inventory_index: usize) -> Result<TxHash>;
}

#[derive(Debug, Default)]
struct SimulatedState {
    inventories: HashMap<Address, Vec<LedgerRecord>>,
    payouts: HashMap<Address, f64>,
    nonce: u64,
    block_number: u64,
}

/// In-process stand-in for the case contract with a committed server seed.
#[derive(Clone, Debug)]
pub struct SimulatedLedger {
    server_seed: [u8; 32],
    weights: Vec<u32>,
    floor_prices: Vec<f64>,
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedLedger {
    pub fn new(catalog: &CaseCatalog, server_seed: [u8; 32]) -> Self {
        let weights = catalog
            .items
            .iter()
            .map(|item| (item.probability * BASIS_POINTS).round() as u32)
            .collect();
        let floor_prices = catalog.items.iter().map(|item| item.floor_price).collect();
        Self {
            server_seed,
            weights,
            floor_prices,
            state: Arc::new(Mutex::new(SimulatedState::default())),
        }
    }

    pub fn with_random_seed<R: Rng>(catalog: &CaseCatalog, rng: &mut R) -> Self {
        let mut server_seed = [0u8; 32];
        rng.fill(&mut server_seed);
        Self::new(catalog, server_seed)
    }

    /// Commitment published before any case is opened.
    pub fn server_seed_hash(&self) -> String {
        format!("0x{}", hex::encode(Sha256::digest(self.server_seed)))
    }

    pub fn payouts(&self, owner: &Address) -> Result<f64> {
        let guard = self.lock()?;
        Ok(guard.payouts.get(owner).copied().unwrap_or_default())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimulatedState>> {
        self.state
            .lock()
            .map_err(|_| Error::Ledger("simulated ledger lock poisoned".into()))
    }

    /// 1-indexed item id for the draw `sha256(server_seed ‖ client_seed ‖ nonce)`.
    fn draw_item_id(&self, seed: &ClientSeed, nonce: u64) -> Result<u64> {
        let total: u64 = self.weights.iter().map(|w| u64::from(*w)).sum();
        if total == 0 {
            return Err(Error::Ledger("contract has no items configured".into()));
        }
        let mut hasher = Sha256::new();
        hasher.update(self.server_seed);
        hasher.update(seed.as_bytes());
        hasher.update(nonce.to_be_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let point = u64::from_be_bytes(head) % total;

        let mut cumulative = 0u64;
        for (index, weight) in self.weights.iter().enumerate() {
            cumulative += u64::from(*weight);
            if point < cumulative {
                return Ok(index as u64 + 1);
            }
        }
        Ok(self.weights.len() as u64)
    }

    fn tx_hash(kind: &str, owner: &Address, nonce: u64) -> TxHash {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(owner.as_str().as_bytes());
        hasher.update(nonce.to_be_bytes());
        TxHash(format!("0x{}", hex::encode(hasher.finalize())))
    }
}

impl Ledger for SimulatedLedger {
    async fn user_inventory(&self, owner: &Address) -> Result<Vec<LedgerRecord>> {
        let guard = self.lock()?;
        Ok(guard.inventories.get(owner).cloned().unwrap_or_default())
    }

    async fn open_case(&self, owner: &Address, seed: &ClientSeed) -> Result<TxHash> {
        let mut guard = self.lock()?;
        guard.nonce += 1;
        guard.block_number += 1;
        let nonce = guard.nonce;
        let block_number = guard.block_number;
        let item_id = self.draw_item_id(seed, nonce)?;
        guard
            .inventories
            .entry(owner.clone())
            .or_default()
            .push(LedgerRecord {
                item_id,
                timestamp: Utc::now().timestamp().max(0) as u64,
                redeemed: false,
                block_number: Some(block_number),
            });
        let tx = Self::tx_hash("openCase", owner, nonce);
        info!(%owner, item_id, %tx, "simulated case opened");
        Ok(tx)
    }

    async fn sell_item(&self, owner: &Address, inventory_index: usize) -> Result<TxHash> {
        let mut guard = self.lock()?;
        let record = guard
            .inventories
            .get_mut(owner)
            .and_then(|records| records.get_mut(inventory_index))
            .ok_or_else(|| {
                Error::Ledger(format!("no inventory item at index {inventory_index}"))
            })?;
        if record.redeemed {
            return Err(Error::Ledger(format!(
                "inventory item {inventory_index} was already sold"
            )));
        }
        record.redeemed = true;
        let price = usize::try_from(record.item_id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| self.floor_prices.get(index))
            .copied()
            .unwrap_or_default();
        *guard.payouts.entry(owner.clone()).or_default() += price;
        guard.nonce += 1;
        guard.block_number += 1;
        let tx = Self::tx_hash("sellItem", owner, guard.nonce);
        info!(%owner, inventory_index, price, %tx, "simulated item sold");
        Ok(tx)
    }
}

/// JSON client for a gateway that relays calls to the deployed contract.
#[derive(Clone, Debug)]
pub struct HttpLedger {
    base_url: String,
    contract: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenCaseRequest<'a> {
    owner: &'a str,
    client_seed: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SellItemRequest<'a> {
    owner: &'a str,
    inventory_index: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    tx_hash: TxHash,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>, contract: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            contract: contract.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/contracts/{}/{}", self.base_url, self.contract, path)
    }

    async fn post_for_tx<B: Serialize>(&self, path: &str, body: &B) -> Result<TxHash> {
        let res = self.http.post(self.url(path)).json(body).send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            return Err(Error::Ledger(format!(
                "{path} returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        let parsed: TxResponse = parse_gateway_body(path, &bytes)?;
        Ok(parsed.tx_hash)
    }
}

/// A body the gateway sent but that does not parse is a ledger failure, not a local one.
fn parse_gateway_body<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Ledger(format!("malformed {what} response: {e}")))
}

impl Ledger for HttpLedger {
    async fn user_inventory(&self, owner: &Address) -> Result<Vec<LedgerRecord>> {
        let url = self.url(&format!("inventory/{}", owner.as_str()));
        let res = self.http.get(url).send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Error::Ledger(format!(
                "inventory returned {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        parse_gateway_body("inventory", &bytes)
    }

    async fn open_case(&self, owner: &Address, seed: &ClientSeed) -> Result<TxHash> {
        let body = OpenCaseRequest {
            owner: owner.as_str(),
            client_seed: seed.to_string(),
        };
        self.post_for_tx("open", &body).await
    }

    async fn sell_item(&self, owner: &Address, inventory_index: usize) -> Result<TxHash> {
        let body = SellItemRequest {
            owner: owner.as_str(),
            inventory_index,
        };
        self.post_for_tx("sell", &body).await
    }
}

#[derive(Clone, Debug)]
pub enum LedgerClient {
    Simulated(SimulatedLedger),
    Http(HttpLedger),
}

impl Ledger for LedgerClient {
    async fn user_inventory(&self, owner: &Address) -> Result<Vec<LedgerRecord>> {
        match self {
            LedgerClient::Simulated(ledger) => ledger.user_inventory(owner).await,
            LedgerClient::Http(ledger) => ledger.user_inventory(owner).await,
        }
    }

    async fn open_case(&self, owner: &Address, seed: &ClientSeed) -> Result<TxHash> {
        match self {
            LedgerClient::Simulated(ledger) => ledger.open_case(owner, seed).await,
            LedgerClient::Http(ledger) => ledger.open_case(owner, seed).await,
        }
    }

    async fn sell_item(&self, owner: &Address, inventory_index: usize) -> Result<TxHash> {
        match self {
            LedgerClient::Simulated(ledger) => ledger.sell_item(owner, inventory_index).await,
            LedgerClient::Http(ledger) => ledger.sell_item(owner, inventory_index).await,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::catalog::tests::{
        catalog,
        item,
    };

    fn ledger() -> (SimulatedLedger, CaseCatalog) {
        let catalog = catalog(vec![item(1, 0.5, 2.0), item(2, 0.5, 0.5)]);
        (SimulatedLedger::new(&catalog, [7u8; 32]), catalog)
    }

    #[test]
    fn short__abbreviates_hex_addresses_only() {
        assert_eq!(
            Address::new("0x1234567890abcdef1234567890abcdef12345678").short(),
            "0x1234...5678"
        );
        assert_eq!(Address::new("Anonymous").short(), "Anonymous");
    }

    #[test]
    fn short__splits_on_char_boundaries() {
        assert_eq!(Address::new("0x123é4567890abcdef").short(), "0x123é...cdef");
        assert_eq!(Address::new("0xabcdef01234567ü").short(), "0xabcd...567ü");
        assert_eq!(Address::new("0xéééééééé").short(), "0xéééééééé");
    }

    #[test]
    fn client_seed__displays_as_prefixed_hex() {
        // given
        let seed = ClientSeed::from_bytes([0xab; 32]);

        // when
        let shown = seed.to_string();

        // then
        assert_eq!(shown.len(), 66);
        assert!(shown.starts_with("0xabab"));
    }

    #[test]
    fn ledger_record__parses_contract_shape() {
        // given
        let raw = r#"[{"itemId": 3, "timestamp": 1700000000, "redeemed": false, "blockNumber": 42}]"#;

        // when
        let records: Vec<LedgerRecord> = serde_json::from_str(raw).unwrap();

        // then
        assert_eq!(
            records,
            vec![LedgerRecord {
                item_id: 3,
                timestamp: 1_700_000_000,
                redeemed: false,
                block_number: Some(42),
            }]
        );
    }

    #[test]
    fn owned_items__skips_redeemed_and_unknown_but_keeps_ledger_index() {
        // given
        let (_, catalog) = ledger();
        let records = vec![
            LedgerRecord {
                item_id: 1,
                timestamp: 10,
                redeemed: true,
                block_number: None,
            },
            LedgerRecord {
                item_id: 9,
                timestamp: 11,
                redeemed: false,
                block_number: None,
            },
            LedgerRecord {
                item_id: 2,
                timestamp: 12,
                redeemed: false,
                block_number: None,
            },
        ];

        // when
        let owned = owned_items(&records, &catalog);

        // then
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].inventory_index, 2);
        assert_eq!(owned[0].item.id, 2);
    }

    #[tokio::test]
    async fn open_case__appends_one_indexed_record() {
        // given
        let (ledger, catalog) = ledger();
        let owner = Address::new("0xowner");
        let seed = ClientSeed::from_bytes([1u8; 32]);

        // when
        let tx = ledger.open_case(&owner, &seed).await.unwrap();

        // then
        let records = ledger.user_inventory(&owner).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(catalog.item_for_ledger_id(records[0].item_id).is_some());
        assert_eq!(records[0].block_number, Some(1));
        assert!(tx.as_str().starts_with("0x"));
    }

    #[tokio::test]
    async fn sell_item__redeems_once_and_pays_floor_price() {
        // given
        let (ledger, catalog) = ledger();
        let owner = Address::new("0xowner");
        ledger
            .open_case(&owner, &ClientSeed::from_bytes([2u8; 32]))
            .await
            .unwrap();
        let won = ledger.user_inventory(&owner).await.unwrap()[0].item_id;
        let price = catalog.item_for_ledger_id(won).unwrap().floor_price;

        // when
        ledger.sell_item(&owner, 0).await.unwrap();
        let second = ledger.sell_item(&owner, 0).await;

        // then
        assert!(matches!(second, Err(Error::Ledger(_))));
        assert!(ledger.user_inventory(&owner).await.unwrap()[0].redeemed);
        assert_eq!(ledger.payouts(&owner).unwrap(), price);
    }

    #[tokio::test]
    async fn sell_item__rejects_unknown_index() {
        // given
        let (ledger, _) = ledger();

        // when
        let result = ledger.sell_item(&Address::new("0xnobody"), 0).await;

        // then
        assert!(matches!(result, Err(Error::Ledger(_))));
    }

    #[test]
    fn server_seed_hash__commits_to_the_seed() {
        // given
        let (a, catalog) = ledger();
        let b = SimulatedLedger::new(&catalog, [8u8; 32]);

        // then
        assert_ne!(a.server_seed_hash(), b.server_seed_hash());
        assert_eq!(a.server_seed_hash().len(), 66);
    }

    #[test]
    fn http_ledger__builds_contract_scoped_urls() {
        // given
        let ledger = HttpLedger::new("https://gateway.example/", "0xcontract").unwrap();

        // then
        assert_eq!(
            ledger.url("inventory/0xabc"),
            "https://gateway.example/contracts/0xcontract/inventory/0xabc"
        );
    }

    #[test]
    fn parse_gateway_body__reports_malformed_bodies_as_ledger_errors() {
        // when
        let inventory: Result<Vec<LedgerRecord>> =
            parse_gateway_body("inventory", b"<html>bad gateway</html>");
        let tx: Result<TxResponse> = parse_gateway_body("open", b"{\"unexpected\": 1}");

        // then
        let inventory_err = inventory.unwrap_err();
        assert!(matches!(inventory_err, Error::Ledger(_)));
        assert!(inventory_err.is_external());
        assert!(matches!(tx, Err(Error::Ledger(_))));
    }
}
