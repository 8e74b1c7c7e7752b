use crate::scanner::{ScanOptions, DEFAULT_INITIAL_STEP, DEFAULT_MIN_STEP};
use crate::watchlist::DEFAULT_LIST_FIELD;
use clap::Parser;
use ethers::types::{Address, U256, U512};
use ethers::utils::parse_units;
use std::path::PathBuf;
use thiserror::Error;

/// Mainnet WETH.
pub const DEFAULT_TOKEN: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

/// Environment variables checked for the node endpoint, first match wins.
pub const RPC_ENV_VARS: &[&str] = &[
    "MAINNET_RPC",
    "ETH_RPC_URL",
    "MAINNET_HTTP_URL",
    "ALCHEMY_MAINNET_RPC",
];

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect ERC20 whale addresses into the watchlist")]
pub struct Cli {
    /// ERC20 token to analyse
    #[arg(short, long, default_value = DEFAULT_TOKEN)]
    pub token: String,

    /// How many blocks back from the latest block to scan
    #[arg(short, long, default_value_t = 200_000)]
    pub blocks: u64,

    /// Number of top addresses to keep
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Minimum cumulative volume in token units (e.g. 50 = 50 WETH). 0 disables the filter
    #[arg(long, alias = "min-volume-eth", default_value_t = 0.0)]
    pub min_volume: f64,

    /// Token decimals used to convert --min-volume
    #[arg(short, long, default_value_t = 18)]
    pub decimals: u32,

    /// Node HTTP endpoint. If not provided, read from MAINNET_RPC / ETH_RPC_URL /
    /// MAINNET_HTTP_URL / ALCHEMY_MAINNET_RPC
    #[arg(short, long)]
    pub rpc: Option<String>,

    /// Watchlist JSON file to merge into
    #[arg(short, long, default_value = "markets.json")]
    pub watchlist: PathBuf,

    /// Field holding the entry list when the watchlist is a JSON object
    #[arg(long, default_value = DEFAULT_LIST_FIELD)]
    pub list_field: String,

    /// Network label written on each entry
    #[arg(short, long, default_value = "mainnet")]
    pub network: String,

    /// Initial getLogs block span
    #[arg(long, default_value_t = DEFAULT_INITIAL_STEP)]
    pub initial_step: u64,

    /// Smallest block span before a capped sub-range is given up
    #[arg(long, default_value_t = DEFAULT_MIN_STEP)]
    pub min_step: u64,

    /// Abort the scan on malformed-request errors instead of skipping the sub-range
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no RPC endpoint: pass --rpc or set one of {}", RPC_ENV_VARS.join(" / "))]
    MissingRpc,
    #[error("invalid token address `{0}`")]
    InvalidToken(String),
    #[error("invalid minimum volume {value}: {reason}")]
    InvalidMinVolume { value: f64, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub token: Address,
    pub lookback_blocks: u64,
    pub top: usize,
    /// Already in base units.
    pub min_volume: Option<U512>,
    pub watchlist: PathBuf,
    pub list_field: String,
    pub network: String,
    pub scan: ScanOptions,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        Self::from_cli_with(cli, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_cli`] with an injectable environment lookup.
    pub fn from_cli_with(cli: Cli, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let rpc_url = resolve_rpc_url(cli.rpc, env).ok_or(ConfigError::MissingRpc)?;
        let token: Address = cli
            .token
            .parse()
            .map_err(|_| ConfigError::InvalidToken(cli.token.clone()))?;
        let min_volume = min_volume_units(cli.min_volume, cli.decimals)?;

        Ok(Self {
            rpc_url,
            token,
            lookback_blocks: cli.blocks,
            top: cli.top,
            min_volume,
            watchlist: cli.watchlist,
            list_field: cli.list_field,
            network: cli.network,
            scan: ScanOptions {
                initial_step: cli.initial_step,
                min_step: cli.min_step,
                strict: cli.strict,
            },
        })
    }
}

/// `--rpc` beats the environment; among env vars, earlier names win.
/// Blank values count as unset.
pub fn resolve_rpc_url(cli: Option<String>, env: impl Fn(&str) -> Option<String>) -> Option<String> {
    cli.into_iter()
        .chain(RPC_ENV_VARS.iter().filter_map(|name| env(name)))
        .map(|url| url.trim().to_string())
        .find(|url| !url.is_empty())
}

/// Convert a human-readable amount into base units. Zero means no filter.
pub fn min_volume_units(amount: f64, decimals: u32) -> Result<Option<U512>, ConfigError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ConfigError::InvalidMinVolume {
            value: amount,
            reason: "must be a non-negative number".to_string(),
        });
    }
    if amount == 0.0 {
        return Ok(None);
    }
    let units = parse_units(amount, decimals).map_err(|e| ConfigError::InvalidMinVolume {
        value: amount,
        reason: e.to_string(),
    })?;
    Ok(Some(U512::from(U256::from(units))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_cli_flag_wins_over_env() {
        let env = env_of(&[("MAINNET_RPC", "http://env")]);
        assert_eq!(
            resolve_rpc_url(Some("http://flag".into()), env),
            Some("http://flag".to_string())
        );
    }

    #[test]
    fn test_env_precedence_order() {
        let env = env_of(&[
            ("ALCHEMY_MAINNET_RPC", "http://alchemy"),
            ("ETH_RPC_URL", "http://eth"),
            ("MAINNET_RPC", "  "),
        ]);
        assert_eq!(resolve_rpc_url(None, env), Some("http://eth".to_string()));
        assert_eq!(resolve_rpc_url(None, env_of(&[])), None);
    }

    #[test]
    fn test_defaults_parse() {
        let cli = Cli::parse_from(["whale-collector"]);
        let config =
            Config::from_cli_with(cli, env_of(&[("MAINNET_HTTP_URL", "http://node:8545")])).unwrap();

        assert_eq!(config.rpc_url, "http://node:8545");
        assert_eq!(config.token, DEFAULT_TOKEN.parse::<Address>().unwrap());
        assert_eq!(config.lookback_blocks, 200_000);
        assert_eq!(config.top, 10);
        assert_eq!(config.min_volume, None);
        assert_eq!(config.list_field, "markets");
        assert_eq!(config.scan.initial_step, 5_000);
        assert_eq!(config.scan.min_step, 128);
        assert!(!config.scan.strict);
    }

    #[test]
    fn test_missing_rpc_is_error() {
        let cli = Cli::parse_from(["whale-collector", "--top", "5"]);
        assert!(matches!(
            Config::from_cli_with(cli, env_of(&[])),
            Err(ConfigError::MissingRpc)
        ));
    }

    #[test]
    fn test_bad_token_is_error() {
        let cli = Cli::parse_from(["whale-collector", "--token", "0x1234", "--rpc", "http://x"]);
        assert!(matches!(
            Config::from_cli_with(cli, env_of(&[])),
            Err(ConfigError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_min_volume_conversion() {
        assert_eq!(min_volume_units(0.0, 18).unwrap(), None);
        assert_eq!(
            min_volume_units(50.0, 18).unwrap(),
            Some(U512::from(50u64) * U512::exp10(18))
        );
        assert_eq!(min_volume_units(1.5, 6).unwrap(), Some(U512::from(1_500_000u64)));
        assert!(min_volume_units(-1.0, 18).is_err());
        assert!(min_volume_units(f64::NAN, 18).is_err());
    }
}
