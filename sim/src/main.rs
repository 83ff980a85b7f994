//! vperp scripted simulation
//!
//! Drives the engine through a deterministic block sequence: pool creation,
//! oracle posts, leveraged opens, margin management, a price crash with a
//! liquidation batch, a stablecoin mint/burn round trip, and the end-of-block
//! hooks every block. Messages run through the transactional wrapper, so
//! rejected ones are logged and rolled back rather than aborting the run.

mod app;
mod config;

use anyhow::{Context, Result};
use app::App;
use config::Config;
use vperp_common::{mem::module_balance, modules, AssetPair, BankPort, Coin, Ctx, Dec};
use vperp_perp::{PerpKeeper, Side};
use vperp_stable::StableKeeper;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::args().any(|arg| arg == "--write-config") {
        return Config::write_default("sim-config.toml");
    }

    log::info!("starting vperp sim");

    let config = Config::load().unwrap_or_else(|err| {
        log::warn!("failed to load config ({:#}); using defaults", err);
        Config::default()
    });

    run(&config)
}

fn run(config: &Config) -> Result<()> {
    let pair = config.pool.pair()?;
    let perp = PerpKeeper::new(config.perp.perp_params()?)?;
    let stable = StableKeeper::new(config.stable.stable_params()?)?;
    let mut app = App::new(perp, stable);

    // Genesis: pool, balances, first oracle posts.
    let mut ctx = Ctx::new(0, 0);
    app.vpool.create_pool(
        &mut ctx,
        pair.clone(),
        config.pool.quote_reserve()?,
        config.pool.base_reserve()?,
        config.pool.vpool_config()?,
    )?;
    let quote = &config.pool.quote_denom;
    app.bank.fund("alice", &Coin::new(quote, 100_000));
    app.bank.fund("bob", &Coin::new(quote, 100_000));
    app.bank.fund("whale", &Coin::new(quote, 1_000_000));
    app.bank
        .fund("carol", &Coin::new(&config.stable.coll_denom, 2_000_000));
    app.bank
        .fund("carol", &Coin::new(&config.stable.gov_denom, 2_000_000));
    post_prices(&mut app, config, &pair, 0, 0)?;
    log::info!(
        "pool {} created at mark {}",
        pair,
        app.vpool.spot_price(&pair)?
    );

    let crash_block = config.chain.blocks * 6 / 10;
    for block in 1..=config.chain.blocks {
        let now = block * config.chain.block_ms;
        let mut ctx = Ctx::new(block, now);
        post_prices(&mut app, config, &pair, block, crash_block)?;

        script(&mut app, &mut ctx, config, &pair, block, crash_block);

        app.end_block(&mut ctx, config.chain.snapshot_retention_ms);
        for event in ctx.take_events() {
            log::debug!("event: {:?}", event);
        }
    }

    report(&app, config, &pair)?;
    Ok(())
}

/// Index posts for the perp pair and the three stablecoin pairs, every block.
fn post_prices(
    app: &mut App,
    config: &Config,
    pair: &AssetPair,
    block: u64,
    crash_block: u64,
) -> Result<()> {
    let now = block * config.chain.block_ms;
    let index = if crash_block > 0 && block >= crash_block {
        Dec::from_int(40_000)?
    } else {
        Dec::from_int(50_000)?
    };
    app.oracle.set_price(pair, index, now);

    let coll = AssetPair::new(&config.stable.coll_denom, &config.stable.stable_denom)?;
    let gov = AssetPair::new(&config.stable.gov_denom, &config.stable.stable_denom)?;
    app.oracle.set_price(&coll, Dec::ONE, now);
    app.oracle.set_price(&gov, Dec::from_int(10)?, now);
    // Peg reading used by the collateral-ratio controller: stable priced in
    // collateral, slightly soft after the crash.
    let peg = app.stable.peg_pair().context("peg pair")?;
    let peg_price = if crash_block > 0 && block >= crash_block {
        "0.998".parse()?
    } else {
        Dec::ONE
    };
    app.oracle.set_price(&peg, peg_price, now);
    Ok(())
}

fn script(
    app: &mut App,
    ctx: &mut Ctx,
    config: &Config,
    pair: &AssetPair,
    block: u64,
    crash_block: u64,
) {
    let quote = config.pool.quote_denom.clone();
    let stable_denom = config.stable.stable_denom.clone();
    match block {
        1 => {
            app.execute(ctx, "alice opens 6x long", |app, ctx| {
                app.perp
                    .open_position(
                        ctx,
                        &mut app.vpool,
                        &app.oracle,
                        &mut app.bank,
                        pair,
                        Side::Buy,
                        "alice",
                        Dec::from_int(50_000)?,
                        Dec::from_int(6)?,
                        Dec::ZERO,
                    )
                    .map(|_| ())
            });
        }
        2 => {
            app.execute(ctx, "bob opens 5x short", |app, ctx| {
                app.perp
                    .open_position(
                        ctx,
                        &mut app.vpool,
                        &app.oracle,
                        &mut app.bank,
                        pair,
                        Side::Sell,
                        "bob",
                        Dec::from_int(50_000)?,
                        Dec::from_int(5)?,
                        Dec::ZERO,
                    )
                    .map(|_| ())
            });
        }
        10 => {
            app.execute(ctx, "alice adds margin", |app, ctx| {
                app.perp
                    .add_margin(
                        ctx,
                        &app.vpool,
                        &mut app.bank,
                        pair,
                        "alice",
                        Coin::new(&quote, 10_000),
                    )
                    .map(|_| ())
            });
        }
        // Intentionally over-withdraws: demonstrates rejection + rollback.
        15 => {
            app.execute(ctx, "bob removes too much margin", |app, ctx| {
                app.perp
                    .remove_margin(
                        ctx,
                        &app.vpool,
                        &app.oracle,
                        &mut app.bank,
                        pair,
                        "bob",
                        Coin::new(&quote, 45_000),
                    )
                    .map(|_| ())
            });
        }
        20 => {
            app.execute(ctx, "carol mints 1m stable", |app, ctx| {
                app.stable
                    .mint_stable(
                        ctx,
                        &app.oracle,
                        &mut app.bank,
                        "carol",
                        Coin::new(&stable_denom, 1_000_000),
                    )
                    .map(|_| ())
            });
        }
        b if b == crash_block => {
            app.execute(ctx, "whale opens 3x short into the crash", |app, ctx| {
                app.perp
                    .open_position(
                        ctx,
                        &mut app.vpool,
                        &app.oracle,
                        &mut app.bank,
                        pair,
                        Side::Sell,
                        "whale",
                        Dec::from_int(300_000)?,
                        Dec::from_int(3)?,
                        Dec::ZERO,
                    )
                    .map(|_| ())
            });
        }
        b if crash_block > 0 && b == crash_block + 2 => {
            // Mixed batch: alice is under water, bob profits from the crash.
            let entries = vec![
                (pair.clone(), "alice".to_string()),
                (pair.clone(), "bob".to_string()),
            ];
            let results = app.perp.multi_liquidate(
                ctx,
                &mut app.vpool,
                &app.oracle,
                &mut app.bank,
                "keeper-bot",
                &entries,
            );
            for ((_, trader), result) in entries.iter().zip(results) {
                match result {
                    Ok(resp) => log::info!(
                        "liquidated {}: fee to liquidator {}, bad debt {}",
                        trader,
                        resp.fee_to_liquidator,
                        resp.bad_debt
                    ),
                    Err(err) => log::warn!("liquidation of {} skipped: {}", trader, err),
                }
            }
        }
        100 => {
            app.execute(ctx, "carol burns 1m stable", |app, ctx| {
                app.stable
                    .burn_stable(
                        ctx,
                        &app.oracle,
                        &mut app.bank,
                        "carol",
                        Coin::new(&stable_denom, 1_000_000),
                    )
                    .map(|_| ())
            });
        }
        110 => {
            app.execute(ctx, "bob closes", |app, ctx| {
                app.perp
                    .close_position(ctx, &mut app.vpool, &mut app.bank, pair, "bob")
                    .map(|_| ())
            });
            app.execute(ctx, "whale closes", |app, ctx| {
                app.perp
                    .close_position(ctx, &mut app.vpool, &mut app.bank, pair, "whale")
                    .map(|_| ())
            });
        }
        _ => {}
    }
}

fn report(app: &App, config: &Config, pair: &AssetPair) -> Result<()> {
    let quote = &config.pool.quote_denom;
    log::info!("---- final state ----");
    log::info!("mark price: {}", app.vpool.spot_price(pair)?);
    log::info!("open positions: {}", app.perp.positions().count());
    log::info!(
        "vault: {} {}, insurance fund: {} {}",
        module_balance(&app.bank, modules::VAULT, quote),
        quote,
        module_balance(&app.bank, modules::PERP_EF, quote),
        quote,
    );
    log::info!(
        "treasury: {} {} / {} {}",
        module_balance(&app.bank, modules::FEE_POOL, &config.stable.coll_denom),
        config.stable.coll_denom,
        module_balance(&app.bank, modules::FEE_POOL, &config.stable.gov_denom),
        config.stable.gov_denom,
    );
    log::info!(
        "collateral ratio: {} (valid: {})",
        app.stable.coll_ratio(),
        app.stable.is_coll_ratio_valid()
    );
    for balance in ["alice", "bob", "whale", "carol"] {
        log::info!("{}: {} {}", balance, app.bank.balance(balance, quote), quote);
    }
    Ok(())
}
