use alloy::primitives::Address;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SnapshotError;

/// Canonical Multicall3 deployment, same address on every EVM chain it is deployed to.
pub const MULTICALL3_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub token: TokenConfig,
    pub range: RangeConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub balances: BalancesConfig,
    #[serde(default)]
    pub participants: ParticipantsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub address: String,
    #[serde(default = "default_multicall_address")]
    pub multicall_address: String,
}

fn default_multicall_address() -> String {
    MULTICALL3_ADDRESS.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RangeConfig {
    pub start_block: u64,
    pub end_block: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_block_step")]
    pub block_step: u64,
}

fn default_batch_size() -> u64 {
    1000
}

fn default_block_step() -> u64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_window_size() -> u64 {
    100
}

fn default_concurrency() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct BalancesConfig {
    /// Minimum balance in wei for a row to be emitted.
    #[serde(default = "default_wei_threshold")]
    pub wei_threshold: u128,
    #[serde(default = "default_multicall_chunk_size")]
    pub multicall_chunk_size: usize,
    #[serde(default = "default_fallback_concurrency")]
    pub fallback_concurrency: usize,
    #[serde(default = "default_job_concurrency")]
    pub job_concurrency: usize,
}

impl Default for BalancesConfig {
    fn default() -> Self {
        Self {
            wei_threshold: default_wei_threshold(),
            multicall_chunk_size: default_multicall_chunk_size(),
            fallback_concurrency: default_fallback_concurrency(),
            job_concurrency: default_job_concurrency(),
        }
    }
}

fn default_wei_threshold() -> u128 {
    1
}

fn default_multicall_chunk_size() -> usize {
    500
}

fn default_fallback_concurrency() -> usize {
    8
}

fn default_job_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParticipantsConfig {
    #[serde(default)]
    pub use_precomputed: bool,
    #[serde(default = "default_precomputed_path")]
    pub precomputed_path: PathBuf,
    /// Where to write the discovered participant set, if anywhere.
    pub export_path: Option<PathBuf>,
}

impl Default for ParticipantsConfig {
    fn default() -> Self {
        Self {
            use_precomputed: false,
            precomputed_path: default_precomputed_path(),
            export_path: None,
        }
    }
}

fn default_precomputed_path() -> PathBuf {
    PathBuf::from("uniq_addrs.csv")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("token_balances.csv")
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Pre-flight checks. Never touches the network.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.rpc.url.trim().is_empty() {
            return Err(SnapshotError::Configuration("rpc.url must not be empty".into()));
        }
        if self.range.start_block > self.range.end_block {
            return Err(SnapshotError::Configuration(format!(
                "start_block {} is after end_block {}",
                self.range.start_block, self.range.end_block
            )));
        }

        let u64_fields = [
            ("rpc.timeout_ms", self.rpc.timeout_ms),
            ("range.batch_size", self.range.batch_size),
            ("range.block_step", self.range.block_step),
            ("scan.window_size", self.scan.window_size),
        ];
        let usize_fields = [
            ("scan.concurrency", self.scan.concurrency),
            ("balances.multicall_chunk_size", self.balances.multicall_chunk_size),
            ("balances.fallback_concurrency", self.balances.fallback_concurrency),
            ("balances.job_concurrency", self.balances.job_concurrency),
        ];
        let zero_field = u64_fields
            .iter()
            .filter(|(_, value)| *value == 0)
            .map(|(name, _)| *name)
            .chain(
                usize_fields
                    .iter()
                    .filter(|(_, value)| *value == 0)
                    .map(|(name, _)| *name),
            )
            .next();
        if let Some(name) = zero_field {
            return Err(SnapshotError::Configuration(format!("{} must be positive", name)));
        }

        self.token_address()?;
        self.multicall_address()?;
        Ok(())
    }

    pub fn token_address(&self) -> Result<Address, SnapshotError> {
        parse_address("token.address", &self.token.address)
    }

    pub fn multicall_address(&self) -> Result<Address, SnapshotError> {
        parse_address("token.multicall_address", &self.token.multicall_address)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, SnapshotError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SnapshotError::Configuration(format!("{} must not be empty", field)));
    }
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(SnapshotError::Configuration(format!(
            "invalid {} '{}'",
            field, value
        )));
    }
    Address::from_str(trimmed)
        .map_err(|e| SnapshotError::Configuration(format!("invalid {} '{}': {}", field, value, e)))
}

#[cfg(test)]
pub(crate) fn test_config(start_block: u64, end_block: u64) -> Config {
    Config {
        rpc: RpcConfig {
            url: "http://127.0.0.1:8545".to_string(),
            timeout_ms: 1000,
            max_retries: 0,
            retry_base_delay_ms: 1,
        },
        token: TokenConfig {
            address: "0xae7ab96520DE3A18E5e111B5EaAb095312D7fE84".to_string(),
            multicall_address: default_multicall_address(),
        },
        range: RangeConfig {
            start_block,
            end_block,
            batch_size: 10,
            block_step: 1,
        },
        scan: ScanConfig::default(),
        balances: BalancesConfig::default(),
        participants: ParticipantsConfig::default(),
        output: OutputConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[rpc]
url = "http://127.0.0.1:8547"

[token]
address = "0xae7ab96520DE3A18E5e111B5EaAb095312D7fE84"

[range]
start_block = 12000000
end_block = 12000100
block_step = 100
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.range.start_block, 12_000_000);
        assert_eq!(config.range.block_step, 100);
        assert_eq!(config.range.batch_size, 1000); // default
        assert_eq!(config.balances.wei_threshold, 1); // default
        assert_eq!(config.scan.window_size, 100); // default
        assert!(!config.participants.use_precomputed);
        assert_eq!(config.token.multicall_address, MULTICALL3_ADDRESS);
        assert_eq!(config.output.path, PathBuf::from("token_balances.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_inverted_range() {
        let config = test_config(200, 100);
        assert!(matches!(
            config.validate(),
            Err(SnapshotError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_zero_step() {
        let mut config = test_config(100, 200);
        config.range.block_step = 0;
        assert!(config.validate().is_err());

        let mut config = test_config(100, 200);
        config.range.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = test_config(100, 200);
        config.rpc.timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rpc.timeout_ms"));
    }

    #[test]
    fn test_validate_checks_full_width_of_block_counts() {
        let mut config = test_config(100, 200);
        config.range.batch_size = 1 << 32;
        config.range.block_step = 1 << 32;
        config.scan.window_size = 1 << 32;
        assert!(config.validate().is_ok());

        config.scan.window_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scan.window_size"));
    }

    #[test]
    fn test_validate_bad_address() {
        let mut config = test_config(100, 200);
        config.token.address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config(100, 200);
        config.token.address = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_address_case_insensitive() {
        let mut config = test_config(100, 100);
        let checksummed = config.token_address().unwrap();
        config.token.address = config.token.address.to_lowercase();
        assert_eq!(config.token_address().unwrap(), checksummed);
    }
}
