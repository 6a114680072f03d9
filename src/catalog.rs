//! Static case definitions: the items a case can drop, their odds and their metadata.
use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::HashSet,
    fmt,
    fs,
    path::Path,
};

/// Allowed distance between the summed item probabilities and 1.0.
pub const PROBABILITY_TOLERANCE: f64 = 0.01;

const BUNDLED_CATALOG: &str = include_str!("../data/rush_case_items.json");

/// Item grade, ordered from most common to most severe.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Rarity {
    Consumer,
    Industrial,
    MilSpec,
    Restricted,
    Classified,
    Covert,
    Special,
}

impl Rarity {
    pub const ALL: [Rarity; 7] = [
        Rarity::Consumer,
        Rarity::Industrial,
        Rarity::MilSpec,
        Rarity::Restricted,
        Rarity::Classified,
        Rarity::Covert,
        Rarity::Special,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Rarity::Consumer => "Consumer Grade",
            Rarity::Industrial => "Industrial Grade",
            Rarity::MilSpec => "Mil-Spec",
            Rarity::Restricted => "Restricted",
            Rarity::Classified => "Classified",
            Rarity::Covert => "Covert",
            Rarity::Special => "Special",
        }
    }

    /// Hex display colour of the tier.
    pub fn color_hex(self) -> &'static str {
        match self {
            Rarity::Consumer => "#B0C3D9",
            Rarity::Industrial => "#5E98D9",
            Rarity::MilSpec => "#4B69FF",
            Rarity::Restricted => "#8847FF",
            Rarity::Classified => "#D32CE6",
            Rarity::Covert => "#EB4B4B",
            Rarity::Special => "#FFD700",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseItem {
    pub id: u32,
    pub name: String,
    pub weapon: String,
    pub skin: String,
    pub rarity: Rarity,
    pub image_url: String,
    pub probability: f64,
    pub floor_price: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseCatalog {
    pub case_name: String,
    #[serde(default)]
    pub case_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_description: Option<String>,
    pub items: Vec<CaseItem>,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("no items found in case data")]
    Empty,
    #[error("total probability is {total:.3}, but should be 1.0")]
    ProbabilitySum { total: f64 },
    #[error("item id {id} appears more than once")]
    DuplicateId { id: u32 },
    #[error("item {id} has probability {probability}, expected a value in [0, 1]")]
    ProbabilityOutOfRange { id: u32, probability: f64 },
    #[error("item {id} has negative floor price {floor_price}")]
    NegativePrice { id: u32, floor_price: f64 },
    #[error("failed to read catalog document: {0}")]
    Unreadable(String),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CatalogSort {
    #[default]
    Rarity,
    Price,
    Name,
}

impl CatalogSort {
    pub fn next(self) -> Self {
        match self {
            CatalogSort::Rarity => CatalogSort::Price,
            CatalogSort::Price => CatalogSort::Name,
            CatalogSort::Name => CatalogSort::Rarity,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CatalogSort::Rarity => "Rarity",
            CatalogSort::Price => "Price",
            CatalogSort::Name => "Name",
        }
    }
}

impl CaseCatalog {
    /// The "Rush Case" document shipped with the crate.
    pub fn bundled() -> Result<Self, CatalogError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            CatalogError::Unreadable(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parses a catalog document and checks per-item structure. Odds are checked
    /// separately by [`CaseCatalog::validate`].
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let catalog: CaseCatalog = serde_json::from_str(raw)
            .map_err(|e| CatalogError::Unreadable(e.to_string()))?;
        catalog.check_structure()?;
        Ok(catalog)
    }

    fn check_structure(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(item.id) {
                return Err(CatalogError::DuplicateId { id: item.id });
            }
            if !(0.0..=1.0).contains(&item.probability) {
                return Err(CatalogError::ProbabilityOutOfRange {
                    id: item.id,
                    probability: item.probability,
                });
            }
            if item.floor_price < 0.0 {
                return Err(CatalogError::NegativePrice {
                    id: item.id,
                    floor_price: item.floor_price,
                });
            }
        }
        Ok(())
    }

    pub fn total_probability(&self) -> f64 {
        self.items.iter().map(|item| item.probability).sum()
    }

    /// Must pass before any roll is attempted against this catalog.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.items.is_empty() {
            return Err(CatalogError::Empty);
        }
        let total = self.total_probability();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(CatalogError::ProbabilitySum { total });
        }
        Ok(())
    }

    /// Ledger item ids are 1-indexed positions in the catalog.
    pub fn item_for_ledger_id(&self, item_id: u64) -> Option<&CaseItem> {
        let index = usize::try_from(item_id).ok()?.checked_sub(1)?;
        self.items.get(index)
    }

    pub fn ledger_id_of(&self, item: &CaseItem) -> Option<u64> {
        self.items
            .iter()
            .position(|candidate| candidate.id == item.id)
            .map(|index| index as u64 + 1)
    }

    pub fn sorted(&self, sort: CatalogSort) -> Vec<&CaseItem> {
        match sort {
            CatalogSort::Rarity => self
                .items
                .iter()
                .sorted_by(|a, b| b.rarity.cmp(&a.rarity))
                .collect(),
            CatalogSort::Price => self
                .items
                .iter()
                .sorted_by(|a, b| b.floor_price.total_cmp(&a.floor_price))
                .collect(),
            CatalogSort::Name => self
                .items
                .iter()
                .sorted_by(|a, b| a.name.cmp(&b.name))
                .collect(),
        }
    }
}
