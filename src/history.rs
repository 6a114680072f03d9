//! Bookkeeping for finished openings: the player's local inventory and the shared
//! leaderboard.
use crate::{
    Result,
    catalog::CaseItem,
    storage::KeyValueStore,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

pub const INVENTORY_KEY: &str = "inventory";
pub const LEADERBOARD_KEY: &str = "leaderboard";
pub const LEADERBOARD_CAPACITY: usize = 100;
pub const ANONYMOUS_USER: &str = "Anonymous";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    #[serde(flatten)]
    pub item: CaseItem,
    #[serde(rename = "wonAt", with = "chrono::serde::ts_milliseconds")]
    pub won_at: DateTime<Utc>,
    #[serde(
        rename = "transactionHash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_hash: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user: String,
    pub item: CaseItem,
    pub case_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Totals shown above the leaderboard, computed over the entries it currently holds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LeaderboardStats {
    pub total_opened: usize,
    pub total_value: f64,
    pub highest_win: f64,
}

impl LeaderboardStats {
    pub fn from_entries(entries: &[LeaderboardEntry]) -> Self {
        entries
            .iter()
            .fold(Self::default(), |stats, entry| LeaderboardStats {
                total_opened: stats.total_opened + 1,
                total_value: stats.total_value + entry.value,
                highest_win: stats.highest_win.max(entry.value),
            })
    }
}

/// Records outcomes into an injected store. The inventory list only ever grows at the
/// tail; the leaderboard is most-recent-first and keeps [`LEADERBOARD_CAPACITY`] entries.
pub struct HistoryRecorder<S> {
    store: S,
}

impl<S: KeyValueStore> HistoryRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn record_opening(
        &mut self,
        item: &CaseItem,
        user: &str,
        case_name: &str,
        at: DateTime<Utc>,
        transaction_hash: Option<&str>,
    ) -> Result<()> {
        self.store.append(
            INVENTORY_KEY,
            InventoryRecord {
                item: item.clone(),
                won_at: at,
                transaction_hash: transaction_hash.map(str::to_owned),
            },
        )?;
        self.record_leaderboard(LeaderboardEntry {
            user: user.to_string(),
            item: item.clone(),
            case_name: case_name.to_string(),
            timestamp: at,
            value: item.floor_price,
        })?;
        info!(item_id = item.id, user, "recorded opening");
        Ok(())
    }

    pub fn record_leaderboard(&mut self, entry: LeaderboardEntry) -> Result<()> {
        let mut entries: Vec<LeaderboardEntry> = self.store.load_list(LEADERBOARD_KEY)?;
        entries.insert(0, entry);
        entries.truncate(LEADERBOARD_CAPACITY);
        self.store.save_list(LEADERBOARD_KEY, &entries)
    }

    pub fn inventory(&self) -> Result<Vec<InventoryRecord>> {
        self.store.load_list(INVENTORY_KEY)
    }

    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        self.store.load_list(LEADERBOARD_KEY)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        catalog::tests::item,
        storage::InMemoryStore,
    };
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn record_opening__appends_inventory_and_prepends_leaderboard() {
        // given
        let mut recorder = HistoryRecorder::new(InMemoryStore::new());
        let first = item(1, 0.5, 1.5);
        let second = item(2, 0.5, 0.25);

        // when
        recorder
            .record_opening(&first, "0xabc", "Rush Case", at(0), None)
            .unwrap();
        recorder
            .record_opening(&second, "0xabc", "Rush Case", at(1), Some("0xfeed"))
            .unwrap();

        // then
        let inventory = recorder.inventory().unwrap();
        assert_eq!(
            inventory.iter().map(|r| r.item.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(inventory[1].transaction_hash.as_deref(), Some("0xfeed"));
        let leaderboard = recorder.leaderboard().unwrap();
        assert_eq!(
            leaderboard.iter().map(|e| e.item.id).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(leaderboard[0].value, 0.25);
        assert_eq!(leaderboard[0].case_name, "Rush Case");
    }

    #[test]
    fn record_leaderboard__keeps_only_the_most_recent_hundred() {
        // given
        let mut recorder = HistoryRecorder::new(InMemoryStore::new());

        // when
        for n in 0..=LEADERBOARD_CAPACITY as u32 {
            recorder
                .record_opening(&item(n, 0.5, 1.0), "p", "Rush Case", at(n as i64), None)
                .unwrap();
        }

        // then
        let leaderboard = recorder.leaderboard().unwrap();
        assert_eq!(leaderboard.len(), LEADERBOARD_CAPACITY);
        assert_eq!(leaderboard.first().map(|e| e.item.id), Some(100));
        assert_eq!(leaderboard.last().map(|e| e.item.id), Some(1));
        assert!(leaderboard.iter().all(|e| e.item.id != 0));
        assert_eq!(recorder.inventory().unwrap().len(), 101);
    }

    #[test]
    fn inventory_record__serializes_with_flattened_item_and_millis() {
        // given
        let record = InventoryRecord {
            item: item(3, 0.1, 2.0),
            won_at: at(0),
            transaction_hash: None,
        };

        // when
        let json = serde_json::to_value(&record).unwrap();

        // then
        assert_eq!(json["id"], 3);
        assert_eq!(json["wonAt"], 1_700_000_000_000i64);
        assert!(json.get("transactionHash").is_none());
    }

    #[test]
    fn leaderboard_stats__counts_sums_and_takes_the_highest_value() {
        // given
        let mut recorder = HistoryRecorder::new(InMemoryStore::new());
        for (n, price) in [0.05, 1.25, 0.5].into_iter().enumerate() {
            let won = item(n as u32 + 1, 0.3, price);
            recorder
                .record_opening(&won, "0xabc", "Rush Case", at(n as i64), None)
                .unwrap();
        }

        // when
        let stats = LeaderboardStats::from_entries(&recorder.leaderboard().unwrap());

        // then
        assert_eq!(stats.total_opened, 3);
        assert!((stats.total_value - 1.8).abs() < 1e-9);
        assert_eq!(stats.highest_win, 1.25);
        assert_eq!(LeaderboardStats::from_entries(&[]), LeaderboardStats::default());
    }
}
