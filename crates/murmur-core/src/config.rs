use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PEER_CAP: usize = 50;
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_VALIDATION_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings. Every field has a default; the environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub rpc_url: String,
    /// Bound on a single ledger lookup, enforced by the RPC client.
    pub rpc_timeout: Duration,
    pub reconcile_interval: Duration,
    pub peer_cap: usize,
    pub validation_debounce: Duration,
    /// Watch-only identity address.
    pub identity: Option<String>,
    /// Hex Ed25519 seed for a local development keypair.
    pub identity_seed: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("murmur.db"),
            blob_dir: PathBuf::from("./blobs"),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            peer_cap: DEFAULT_PEER_CAP,
            validation_debounce: DEFAULT_VALIDATION_DEBOUNCE,
            identity: None,
            identity_seed: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unparseable values fall
    /// back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            db_path: lookup("MURMUR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            blob_dir: lookup("MURMUR_BLOB_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.blob_dir),
            rpc_url: lookup("MURMUR_RPC_URL").unwrap_or(defaults.rpc_url),
            rpc_timeout: parsed("MURMUR_RPC_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rpc_timeout),
            reconcile_interval: parsed("MURMUR_RECONCILE_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            peer_cap: parsed("MURMUR_PEER_CAP")
                .filter(|cap| *cap > 0)
                .map(|cap| cap as usize)
                .unwrap_or(defaults.peer_cap),
            validation_debounce: parsed("MURMUR_VALIDATION_DEBOUNCE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.validation_debounce),
            identity: lookup("MURMUR_IDENTITY").filter(|v| !v.trim().is_empty()),
            identity_seed: lookup("MURMUR_IDENTITY_SEED").filter(|v| !v.trim().is_empty()),
        }
    }
}
