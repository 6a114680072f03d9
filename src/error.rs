use crate::{
    catalog::CatalogError,
    opening::OpeningError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The catalog document is misconfigured. Not retryable.
    #[error("invalid case catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("ledger call failed: {0}")]
    Ledger(String),

    #[error("ledger returned item id {item_id}, which is not in the local catalog")]
    UnknownItem { item_id: u64 },

    #[error("ledger inventory is empty after opening a case")]
    EmptyInventory,

    #[error(transparent)]
    Opening(#[from] OpeningError),

    #[error("{0} needs a connected ledger")]
    DemoMode(&'static str),

    #[error("a reel needs at least one position")]
    EmptyReel,

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure came from an external collaborator, in which case the caller
    /// re-reads the source of truth and may retry.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Error::Ledger(_)
                | Error::UnknownItem { .. }
                | Error::EmptyInventory
                | Error::Http(_)
        )
    }
}
