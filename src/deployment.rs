use crate::{
    Result,
    catalog::CaseCatalog,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use tracing::debug;

pub const DEPLOYMENTS_DIR: &str = "deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

pub const DEFAULT_TESTNET_GATEWAY_URL: &str = "https://data-seed-prebsc-1-s1.bnbchain.org:8545";
pub const DEFAULT_MAINNET_GATEWAY_URL: &str = "https://bsc-dataseed.bnbchain.org";
pub const DEFAULT_LOCAL_GATEWAY_URL: &str = "http://127.0.0.1:8545";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Testnet,
    Mainnet,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Testnet => "testnet",
            DeploymentEnv::Mainnet => "mainnet",
            DeploymentEnv::Local => "local",
        }
    }

    pub fn chain_id(self) -> Option<u64> {
        match self {
            DeploymentEnv::Testnet => Some(97),
            DeploymentEnv::Mainnet => Some(56),
            DeploymentEnv::Local => None,
        }
    }

    pub fn default_gateway_url(self) -> &'static str {
        match self {
            DeploymentEnv::Testnet => DEFAULT_TESTNET_GATEWAY_URL,
            DeploymentEnv::Mainnet => DEFAULT_MAINNET_GATEWAY_URL,
            DeploymentEnv::Local => DEFAULT_LOCAL_GATEWAY_URL,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Testnet => "BSC Testnet",
            DeploymentEnv::Mainnet => "BSC Mainnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_address: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    pub network_url: String,
    /// Fingerprint of the catalog the contract was configured with.
    pub catalog_hash: String,
}

impl DeploymentRecord {
    pub fn new(
        env: DeploymentEnv,
        contract_address: impl Into<String>,
        network_url: impl Into<String>,
        catalog: &CaseCatalog,
    ) -> Result<Self> {
        Ok(Self {
            deployed_at: Utc::now().to_rfc3339(),
            contract_address: contract_address.into(),
            chain_id: env.chain_id(),
            network_url: network_url.into(),
            catalog_hash: compute_catalog_hash(catalog)?,
        })
    }

    pub fn is_compatible_with_hash(&self, hash: &str) -> bool {
        self.catalog_hash == hash
    }
}

/// Deployment history for one network under `<root>/deployments/<env>/deployments.json`.
#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn open(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        let data = fs::read(&self.path)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        self.save(&records)
    }

    /// Overwrites the most recent record, or appends when the store is empty.
    pub fn replace_latest(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.pop();
        records.push(record);
        self.save(&records)
    }

    fn save(&self, records: &[DeploymentRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Hex sha256 of the catalog's canonical JSON encoding.
pub fn compute_catalog_hash(catalog: &CaseCatalog) -> Result<String> {
    let bytes = serde_json::to_vec(catalog)?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(DEPLOYMENTS_DIR).join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir)?;
        debug!(path = %env_dir.display(), "created deployments directory");
    }
    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"[]")?;
    }
    Ok(file_path)
}
