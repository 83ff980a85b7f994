//! Sim configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vperp_common::{AssetPair, Dec};
use vperp_perp::PerpParams;
use vperp_stable::StableParams;
use vperp_vpool::VpoolConfig;

/// Decimal fields are strings in the TOML file and parsed on use, so a typo
/// fails with the field name instead of a bare parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    pub pool: PoolConfig,
    pub perp: PerpConfig,
    pub stable: StableConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Block cadence in milliseconds.
    pub block_ms: u64,
    /// Number of blocks to simulate.
    pub blocks: u64,
    /// Snapshot retention window in milliseconds.
    pub snapshot_retention_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub base_denom: String,
    pub quote_denom: String,
    pub quote_reserve: String,
    pub base_reserve: String,
    pub trade_limit_ratio: String,
    pub fluctuation_limit_ratio: String,
    pub max_oracle_spread_ratio: String,
    pub maintenance_margin_ratio: String,
    pub max_leverage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerpConfig {
    pub liquidation_fee_ratio: String,
    pub partial_liquidation_ratio: String,
    pub funding_epoch_ms: u64,
    pub twap_lookback_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableConfig {
    pub stable_denom: String,
    pub coll_denom: String,
    pub gov_denom: String,
    pub fee_ratio: String,
    pub ef_fee_fraction: String,
    pub recoll_bonus: String,
    pub adjustment_step: String,
    pub price_band: String,
    pub adjustment_interval_ms: u64,
    pub twap_lookback_ms: u64,
    pub initial_coll_ratio: String,
}

fn parse_dec(name: &str, value: &str) -> Result<Dec> {
    value
        .parse()
        .with_context(|| format!("invalid decimal for {}: {:?}", name, value))
}

impl Config {
    /// Load configuration from TOML file
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("VPERP_SIM_CONFIG").unwrap_or_else(|_| "sim-config.toml".to_string());

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config file: {}", config_path))?;

        let config: Config =
            toml::from_str(&config_str).context("failed to parse config TOML")?;

        Ok(config)
    }

    /// Write default config to file
    pub fn write_default(path: &str) -> Result<()> {
        let config = Self::default();
        let toml_str = toml::to_string_pretty(&config).context("failed to serialize config")?;

        std::fs::write(path, toml_str)
            .with_context(|| format!("failed to write config to {}", path))?;

        log::info!("created default config at {}", path);
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig {
                block_ms: 5_000,
                blocks: 120,
                snapshot_retention_ms: 30 * 60 * 1_000,
            },
            pool: PoolConfig {
                base_denom: "ubtc".to_string(),
                quote_denom: "unusd".to_string(),
                quote_reserve: "10000000".to_string(),
                base_reserve: "200".to_string(),
                trade_limit_ratio: "0.1".to_string(),
                // 0 disables the per-block fluctuation guard so the crash
                // script can move the mark in one block
                fluctuation_limit_ratio: "0".to_string(),
                max_oracle_spread_ratio: "0.3".to_string(),
                maintenance_margin_ratio: "0.0625".to_string(),
                max_leverage: "10".to_string(),
            },
            perp: PerpConfig {
                liquidation_fee_ratio: "0.05".to_string(),
                partial_liquidation_ratio: "0.25".to_string(),
                funding_epoch_ms: 2 * 60 * 1_000,
                twap_lookback_ms: 15 * 60 * 1_000,
            },
            stable: StableConfig {
                stable_denom: "unusd".to_string(),
                coll_denom: "uusdc".to_string(),
                gov_denom: "ugov".to_string(),
                fee_ratio: "0.002".to_string(),
                ef_fee_fraction: "0.5".to_string(),
                recoll_bonus: "0.002".to_string(),
                adjustment_step: "0.0025".to_string(),
                price_band: "0.001".to_string(),
                adjustment_interval_ms: 60 * 1_000,
                twap_lookback_ms: 15 * 60 * 1_000,
                initial_coll_ratio: "0.9".to_string(),
            },
        }
    }
}

impl PoolConfig {
    pub fn pair(&self) -> Result<AssetPair> {
        Ok(AssetPair::new(&self.base_denom, &self.quote_denom)?)
    }

    pub fn quote_reserve(&self) -> Result<Dec> {
        parse_dec("quote_reserve", &self.quote_reserve)
    }

    pub fn base_reserve(&self) -> Result<Dec> {
        parse_dec("base_reserve", &self.base_reserve)
    }

    pub fn vpool_config(&self) -> Result<VpoolConfig> {
        Ok(VpoolConfig {
            trade_limit_ratio: parse_dec("trade_limit_ratio", &self.trade_limit_ratio)?,
            fluctuation_limit_ratio: parse_dec(
                "fluctuation_limit_ratio",
                &self.fluctuation_limit_ratio,
            )?,
            max_oracle_spread_ratio: parse_dec(
                "max_oracle_spread_ratio",
                &self.max_oracle_spread_ratio,
            )?,
            maintenance_margin_ratio: parse_dec(
                "maintenance_margin_ratio",
                &self.maintenance_margin_ratio,
            )?,
            max_leverage: parse_dec("max_leverage", &self.max_leverage)?,
        })
    }
}

impl PerpConfig {
    pub fn perp_params(&self) -> Result<PerpParams> {
        Ok(PerpParams {
            liquidation_fee_ratio: parse_dec(
                "liquidation_fee_ratio",
                &self.liquidation_fee_ratio,
            )?,
            partial_liquidation_ratio: parse_dec(
                "partial_liquidation_ratio",
                &self.partial_liquidation_ratio,
            )?,
            funding_epoch_ms: self.funding_epoch_ms,
            twap_lookback_ms: self.twap_lookback_ms,
        })
    }
}

impl StableConfig {
    pub fn stable_params(&self) -> Result<StableParams> {
        Ok(StableParams {
            stable_denom: self.stable_denom.clone(),
            coll_denom: self.coll_denom.clone(),
            gov_denom: self.gov_denom.clone(),
            fee_ratio: parse_dec("fee_ratio", &self.fee_ratio)?,
            ef_fee_fraction: parse_dec("ef_fee_fraction", &self.ef_fee_fraction)?,
            recoll_bonus: parse_dec("recoll_bonus", &self.recoll_bonus)?,
            adjustment_step: parse_dec("adjustment_step", &self.adjustment_step)?,
            price_band: parse_dec("price_band", &self.price_band)?,
            adjustment_interval_ms: self.adjustment_interval_ms,
            twap_lookback_ms: self.twap_lookback_ms,
            initial_coll_ratio: parse_dec("initial_coll_ratio", &self.initial_coll_ratio)?,
        })
    }
}
