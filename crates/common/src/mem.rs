//! In-memory collaborator adapters
//!
//! Deterministic in-process stand-ins for the bank, oracle and spot-AMM
//! collaborators, used by the sim binary and every test harness. Balances,
//! reports and pools live in sorted maps so iteration order never depends on
//! hashing.

use crate::coin::Coin;
use crate::dec::{Amount, Dec};
use crate::error::EngineError;
use crate::pair::AssetPair;
use crate::ports::{AccountPort, BankPort, OraclePort, SpotPort};
use std::collections::{BTreeMap, BTreeSet};

const MODULE_PREFIX: &str = "module/";

/// In-memory bank with module accounts addressed as `module/<name>`.
#[derive(Debug, Clone, Default)]
pub struct MemBank {
    balances: BTreeMap<String, BTreeMap<String, Amount>>,
    supply: BTreeMap<String, Amount>,
}

impl MemBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air (test/genesis funding only).
    pub fn fund(&mut self, addr: &str, coin: &Coin) {
        *self
            .balances
            .entry(addr.to_string())
            .or_default()
            .entry(coin.denom.clone())
            .or_default() += coin.amount;
        *self.supply.entry(coin.denom.clone()).or_default() += coin.amount;
    }

    fn module_addr(module: &str) -> String {
        format!("{}{}", MODULE_PREFIX, module)
    }

    fn transfer(&mut self, from: &str, to: &str, coin: &Coin) -> Result<(), EngineError> {
        if coin.amount == 0 {
            return Ok(());
        }
        if coin.amount < 0 {
            return Err(EngineError::InvalidParams(format!(
                "negative transfer of {}",
                coin
            )));
        }
        let available = self.balance(from, &coin.denom);
        if available < coin.amount {
            return Err(EngineError::NotEnoughBalance {
                denom: coin.denom.clone(),
                needed: coin.amount,
                available,
            });
        }
        *self
            .balances
            .get_mut(from)
            .and_then(|b| b.get_mut(&coin.denom))
            .expect("balance checked above") -= coin.amount;
        *self
            .balances
            .entry(to.to_string())
            .or_default()
            .entry(coin.denom.clone())
            .or_default() += coin.amount;
        Ok(())
    }
}

impl BankPort for MemBank {
    fn send_account_to_module(
        &mut self,
        from: &str,
        module: &str,
        coin: &Coin,
    ) -> Result<(), EngineError> {
        self.transfer(from, &Self::module_addr(module), coin)
    }

    fn send_module_to_account(
        &mut self,
        module: &str,
        to: &str,
        coin: &Coin,
    ) -> Result<(), EngineError> {
        self.transfer(&Self::module_addr(module), to, coin)
    }

    fn send_module_to_module(
        &mut self,
        from: &str,
        to: &str,
        coin: &Coin,
    ) -> Result<(), EngineError> {
        self.transfer(&Self::module_addr(from), &Self::module_addr(to), coin)
    }

    fn mint(&mut self, module: &str, coin: &Coin) -> Result<(), EngineError> {
        if coin.amount < 0 {
            return Err(EngineError::InvalidParams(format!("negative mint of {}", coin)));
        }
        self.fund(&Self::module_addr(module), coin);
        Ok(())
    }

    fn burn(&mut self, module: &str, coin: &Coin) -> Result<(), EngineError> {
        if coin.amount < 0 {
            return Err(EngineError::InvalidParams(format!("negative burn of {}", coin)));
        }
        let addr = Self::module_addr(module);
        let available = self.balance(&addr, &coin.denom);
        if available < coin.amount {
            return Err(EngineError::NotEnoughBalance {
                denom: coin.denom.clone(),
                needed: coin.amount,
                available,
            });
        }
        *self
            .balances
            .get_mut(&addr)
            .and_then(|b| b.get_mut(&coin.denom))
            .expect("balance checked above") -= coin.amount;
        *self.supply.entry(coin.denom.clone()).or_default() -= coin.amount;
        Ok(())
    }

    fn balance(&self, addr: &str, denom: &str) -> Amount {
        self.balances
            .get(addr)
            .and_then(|b| b.get(denom))
            .copied()
            .unwrap_or(0)
    }

    fn supply(&self, denom: &str) -> Amount {
        self.supply.get(denom).copied().unwrap_or(0)
    }
}

impl AccountPort for MemBank {
    fn module_address(&self, module: &str) -> Result<String, EngineError> {
        if module.is_empty() {
            return Err(EngineError::UnknownModule(module.to_string()));
        }
        Ok(Self::module_addr(module))
    }
}

/// Convenience: module balance without resolving the address by hand.
pub fn module_balance(bank: &MemBank, module: &str, denom: &str) -> Amount {
    bank.balance(&MemBank::module_addr(module), denom)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PricePost {
    posted_ms: u64,
    expiry_ms: u64,
    price: Dec,
}

/// In-memory oracle accepting whitelisted signer reports with expiries.
#[derive(Debug, Clone, Default)]
pub struct MemOracle {
    whitelist: BTreeMap<String, BTreeSet<String>>,
    posts: BTreeMap<String, Vec<PricePost>>,
}

impl MemOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn whitelist(&mut self, pair: &AssetPair, oracle: &str) {
        self.whitelist
            .entry(pair.key())
            .or_default()
            .insert(oracle.to_string());
    }

    pub fn is_whitelisted(&self, pair: &AssetPair, oracle: &str) -> bool {
        self.whitelist
            .get(&pair.key())
            .map(|set| set.contains(oracle))
            .unwrap_or(false)
    }

    /// Signer report entry point. Posts must arrive in time order.
    pub fn post_price(
        &mut self,
        oracle: &str,
        pair: &AssetPair,
        price: Dec,
        posted_ms: u64,
        expiry_ms: u64,
    ) -> Result<(), EngineError> {
        if !self.is_whitelisted(pair, oracle) {
            return Err(EngineError::NotWhitelistedOracle {
                oracle: oracle.to_string(),
                pair: pair.key(),
            });
        }
        self.posts.entry(pair.key()).or_default().push(PricePost {
            posted_ms,
            expiry_ms,
            price,
        });
        Ok(())
    }

    /// Test/genesis shortcut: report without a whitelist check, never expiring.
    pub fn set_price(&mut self, pair: &AssetPair, price: Dec, posted_ms: u64) {
        self.posts.entry(pair.key()).or_default().push(PricePost {
            posted_ms,
            expiry_ms: u64::MAX,
            price,
        });
    }

    fn latest_valid(&self, pair: &AssetPair, now_ms: u64) -> Option<&PricePost> {
        self.posts
            .get(&pair.key())?
            .iter()
            .rev()
            .find(|p| p.posted_ms <= now_ms && p.expiry_ms > now_ms)
    }
}

impl OraclePort for MemOracle {
    fn price(&self, pair: &AssetPair, now_ms: u64) -> Result<Dec, EngineError> {
        self.latest_valid(pair, now_ms)
            .map(|p| p.price)
            .ok_or(EngineError::PricesExpired)
    }

    fn twap(&self, pair: &AssetPair, now_ms: u64, lookback_ms: u64) -> Result<Dec, EngineError> {
        let posts = self
            .posts
            .get(&pair.key())
            .ok_or(EngineError::PricesExpired)?;
        let window_start = now_ms.saturating_sub(lookback_ms);

        // Walk newest-to-oldest, weighting each report by the time it was the
        // freshest one inside the window.
        let mut cursor = now_ms;
        let mut weighted = Dec::ZERO;
        let mut total_ms: u64 = 0;
        for post in posts.iter().rev() {
            if post.posted_ms > now_ms {
                continue;
            }
            let from = post.posted_ms.max(window_start);
            let span = cursor.saturating_sub(from);
            weighted = weighted.checked_add(post.price.mul_int(span as i128)?)?;
            total_ms += span;
            cursor = from;
            if post.posted_ms <= window_start {
                break;
            }
        }
        if total_ms == 0 {
            // Single report at the window edge: use it directly.
            return self.price(pair, now_ms);
        }
        Ok(weighted.quo(Dec::from_int(total_ms as i128)?)?)
    }

    fn is_active(&self, pair: &AssetPair, now_ms: u64) -> bool {
        self.latest_valid(pair, now_ms).is_some()
    }
}

#[derive(Debug, Clone)]
struct SpotPool {
    denom_a: String,
    reserve_a: Dec,
    denom_b: String,
    reserve_b: Dec,
}

/// In-memory spot AMM with constant-product pools.
#[derive(Debug, Clone, Default)]
pub struct MemSpot {
    pools: BTreeMap<u64, SpotPool>,
    next_id: u64,
}

impl MemSpot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pool(
        &mut self,
        denom_a: &str,
        reserve_a: Dec,
        denom_b: &str,
        reserve_b: Dec,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pools.insert(
            id,
            SpotPool {
                denom_a: denom_a.to_string(),
                reserve_a,
                denom_b: denom_b.to_string(),
                reserve_b,
            },
        );
        id
    }
}

impl SpotPort for MemSpot {
    fn pool_id(&self, denom_a: &str, denom_b: &str) -> Result<u64, EngineError> {
        self.pools
            .iter()
            .find(|(_, p)| {
                (p.denom_a == denom_a && p.denom_b == denom_b)
                    || (p.denom_a == denom_b && p.denom_b == denom_a)
            })
            .map(|(id, _)| *id)
            .ok_or_else(|| EngineError::NoSpotPool(denom_a.to_string(), denom_b.to_string()))
    }

    fn spot_price(
        &self,
        pool_id: u64,
        denom_in: &str,
        denom_out: &str,
    ) -> Result<Dec, EngineError> {
        let pool = self.pools.get(&pool_id).ok_or_else(|| {
            EngineError::NoSpotPool(denom_in.to_string(), denom_out.to_string())
        })?;
        let (res_in, res_out) = if pool.denom_a == denom_in && pool.denom_b == denom_out {
            (pool.reserve_a, pool.reserve_b)
        } else if pool.denom_b == denom_in && pool.denom_a == denom_out {
            (pool.reserve_b, pool.reserve_a)
        } else {
            return Err(EngineError::NoSpotPool(
                denom_in.to_string(),
                denom_out.to_string(),
            ));
        };
        if res_in.is_zero() {
            return Ok(Dec::ZERO);
        }
        Ok(res_out.quo(res_in)?)
    }
}
