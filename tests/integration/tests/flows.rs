//! Multi-block flows through the in-process harness: funding accrual over
//! epochs, a crash followed by liquidations, the stablecoin round trip, and
//! the transactional rollback of rejected messages.

use vperp_common::{mem::module_balance, modules, BankPort, Coin, Dec, EngineError, Event};
use vperp_integration_tests::{dec, App, COLL, GOV, QUOTE};
use vperp_perp::Side;

fn assert_close(actual: Dec, expected: Dec, eps: &str, what: &str) {
    let diff = actual
        .checked_sub(expected)
        .and_then(|d| d.abs())
        .expect("difference in range");
    assert!(
        diff < dec(eps),
        "{}: {} not within {} of {}",
        what,
        actual,
        eps,
        expected
    );
}

#[test]
fn test_funding_accrues_over_epoch_and_settles_on_close() {
    let (mut app, pair) = App::bootstrap();

    // Block 1: alice longs 300k notional, pushing the mark to ~53_045
    // against a 50_000 index.
    let mut ctx = app.begin_block();
    app.execute(&mut ctx, |app, ctx| {
        app.perp.open_position(
            ctx,
            &mut app.vpool,
            &app.oracle,
            &mut app.bank,
            &pair,
            Side::Buy,
            "alice",
            dec("50000"),
            dec("6"),
            Dec::ZERO,
        )
    })
    .expect("open accepted");
    app.end_block(ctx);

    let before_epoch = app
        .perp
        .pair_metadata(&pair)
        .expect("pair initialized")
        .latest_cumulative_premium_fraction;
    assert!(before_epoch.is_zero(), "no funding before the first epoch");

    // One funding epoch later: premium = (markTWAP - indexTWAP) / 24.
    let ctx = app.begin_block_at(60 * 60 * 1_000 + 5_000);
    app.end_block(ctx);

    let cpf = app
        .perp
        .pair_metadata(&pair)
        .expect("pair initialized")
        .latest_cumulative_premium_fraction;
    assert_close(cpf, dec("126.875"), "0.001", "cumulative premium after one epoch");

    // A second end-block inside the same epoch must not accrue again.
    let ctx = app.begin_block();
    app.end_block(ctx);
    assert_eq!(
        app.perp
            .pair_metadata(&pair)
            .expect("pair initialized")
            .latest_cumulative_premium_fraction,
        cpf,
        "funding accrued twice inside one epoch"
    );

    // Close: the long pays funding out of margin.
    let mut ctx = app.begin_block();
    let resp = app
        .execute(&mut ctx, |app, ctx| {
            app.perp
                .close_position(ctx, &mut app.vpool, &mut app.bank, &pair, "alice")
        })
        .expect("close accepted");
    app.end_block(ctx);

    assert!(
        resp.funding_payment.is_positive(),
        "long pays when mark leads index, got {}",
        resp.funding_payment
    );
    assert!(app.perp.maybe_position(&pair, "alice").is_none());

    // Nothing minted or lost: trader balances plus module accounts add up.
    assert_eq!(
        app.total_held(&["alice", "bob", "whale"], QUOTE),
        3_000_000,
        "quote conservation across open/funding/close"
    );
}

#[test]
fn test_crash_liquidation_cascade() {
    let (mut app, pair) = App::bootstrap();

    let mut ctx = app.begin_block();
    app.execute(&mut ctx, |app, ctx| {
        app.perp.open_position(
            ctx,
            &mut app.vpool,
            &app.oracle,
            &mut app.bank,
            &pair,
            Side::Buy,
            "alice",
            dec("50000"),
            dec("6"),
            Dec::ZERO,
        )
    })
    .expect("alice opens");
    app.execute(&mut ctx, |app, ctx| {
        app.perp.open_position(
            ctx,
            &mut app.vpool,
            &app.oracle,
            &mut app.bank,
            &pair,
            Side::Sell,
            "bob",
            dec("50000"),
            dec("5"),
            Dec::ZERO,
        )
    })
    .expect("bob opens");
    app.end_block(ctx);

    // Crash: the whale dumps 900k notional and the index follows down.
    let mut ctx = app.begin_block();
    app.post_index(&pair, dec("40000"));
    app.execute(&mut ctx, |app, ctx| {
        app.perp.open_position(
            ctx,
            &mut app.vpool,
            &app.oracle,
            &mut app.bank,
            &pair,
            Side::Sell,
            "whale",
            dec("300000"),
            dec("3"),
            Dec::ZERO,
        )
    })
    .expect("whale opens");
    app.end_block(ctx);

    // 20 minutes on, the TWAP window holds only post-crash reserves, so
    // both margin-ratio readings agree alice is under water.
    let crash_ms = app.time_ms;
    let mut ctx = app.begin_block_at(crash_ms + 20 * 60 * 1_000);
    app.post_index(&pair, dec("40000"));
    let resp = app
        .execute(&mut ctx, |app, ctx| {
            app.perp.liquidate(
                ctx,
                &mut app.vpool,
                &app.oracle,
                &mut app.bank,
                "keeper-bot",
                &pair,
                "alice",
            )
        })
        .expect("alice is liquidatable");

    assert!(
        resp.fee_to_liquidator.amount > 0,
        "liquidator fee must be paid, got {}",
        resp.fee_to_liquidator
    );
    assert!(app.perp.maybe_position(&pair, "alice").is_none());
    assert!(
        ctx.events()
            .iter()
            .any(|e| matches!(e, Event::PositionLiquidated { trader, .. } if trader == "alice")),
        "liquidation event emitted"
    );
    assert_eq!(
        app.bank.balance("keeper-bot", QUOTE),
        resp.fee_to_liquidator.amount
    );
    app.end_block(ctx);

    // Bob's short profited from the crash; closing pays out above par.
    let mut ctx = app.begin_block();
    app.execute(&mut ctx, |app, ctx| {
        app.perp
            .close_position(ctx, &mut app.vpool, &mut app.bank, &pair, "bob")
    })
    .expect("bob closes");
    app.end_block(ctx);
    assert!(
        app.bank.balance("bob", QUOTE) > 1_000_000,
        "short should profit from the crash, got {}",
        app.bank.balance("bob", QUOTE)
    );

    assert_eq!(
        app.total_held(&["alice", "bob", "whale", "keeper-bot"], QUOTE),
        3_000_000,
        "quote conservation across the cascade"
    );
}

#[test]
fn test_multi_liquidate_mixed_batch_commits_only_successes() {
    let (mut app, pair) = App::bootstrap();

    let mut ctx = app.begin_block();
    for (trader, side, leverage) in [
        ("alice", Side::Buy, "6"),
        ("bob", Side::Sell, "5"),
    ] {
        app.execute(&mut ctx, |app, ctx| {
            app.perp.open_position(
                ctx,
                &mut app.vpool,
                &app.oracle,
                &mut app.bank,
                &pair,
                side,
                trader,
                dec("50000"),
                dec(leverage),
                Dec::ZERO,
            )
        })
        .expect("open accepted");
    }
    app.execute(&mut ctx, |app, ctx| {
        app.perp.open_position(
            ctx,
            &mut app.vpool,
            &app.oracle,
            &mut app.bank,
            &pair,
            Side::Sell,
            "whale",
            dec("300000"),
            dec("3"),
            Dec::ZERO,
        )
    })
    .expect("whale opens");
    app.end_block(ctx);

    let crash_ms = app.time_ms;
    let mut ctx = app.begin_block_at(crash_ms + 20 * 60 * 1_000);
    app.post_index(&pair, dec("40000"));

    let bob_before = app.perp.position(&pair, "bob").expect("bob open").clone();
    let entries = vec![
        (pair.clone(), "alice".to_string()),
        (pair.clone(), "bob".to_string()),
        (pair.clone(), "nobody".to_string()),
    ];
    let results = app.perp.multi_liquidate(
        &mut ctx,
        &mut app.vpool,
        &app.oracle,
        &mut app.bank,
        "keeper-bot",
        &entries,
    );
    app.end_block(ctx);

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok(), "alice entry: {:?}", results[0]);
    assert_eq!(
        results[1].as_ref().unwrap_err(),
        &EngineError::MarginHighEnough,
        "bob is healthy"
    );
    assert!(
        matches!(
            results[2].as_ref().unwrap_err(),
            EngineError::PositionNotFound { .. }
        ),
        "unknown trader entry"
    );

    // Failed entries leave no trace: bob's position is untouched.
    assert_eq!(app.perp.position(&pair, "bob").expect("still open"), &bob_before);
    assert!(app.perp.maybe_position(&pair, "alice").is_none());
}

#[test]
fn test_stable_mint_burn_round_trip() {
    let (mut app, _) = App::bootstrap();

    let mut ctx = app.begin_block();
    let mint = app
        .execute(&mut ctx, |app, ctx| {
            app.stable.mint_stable(
                ctx,
                &app.oracle,
                &mut app.bank,
                "carol",
                Coin::new(QUOTE, 1_000_000),
            )
        })
        .expect("mint accepted");
    app.end_block(ctx);

    // 90% collateral ratio at unit/10 prices, 0.2% fee on each leg.
    assert_eq!(mint.coll_in, Coin::new(COLL, 901_800));
    assert_eq!(mint.gov_in, Coin::new(GOV, 10_020));
    assert_eq!(app.bank.balance("carol", QUOTE), 1_000_000);
    assert_eq!(app.bank.supply(QUOTE), 1_000_000);
    assert_eq!(module_balance(&app.bank, modules::STABLE, COLL), 900_000);

    let mut ctx = app.begin_block();
    let burn = app
        .execute(&mut ctx, |app, ctx| {
            app.stable.burn_stable(
                ctx,
                &app.oracle,
                &mut app.bank,
                "carol",
                Coin::new(QUOTE, 1_000_000),
            )
        })
        .expect("burn accepted");
    app.end_block(ctx);

    assert_eq!(burn.coll_out, Coin::new(COLL, 898_200));
    assert_eq!(app.bank.supply(QUOTE), 0, "all stable burned");
    // The round trip costs exactly two rounds of fees.
    assert_eq!(app.bank.balance("carol", COLL), 10_000_000 - 2 * 1_800);
    assert_eq!(app.bank.balance("carol", GOV), 10_000_000 - 2 * 20);
    assert_eq!(
        module_balance(&app.bank, modules::STABLE, COLL),
        0,
        "no collateral residue after full redemption"
    );
}

#[test]
fn test_rejected_message_rolls_back_pool_and_balances() {
    let (mut app, pair) = App::bootstrap();
    let reserves_before = {
        let pool = app.vpool.pool(&pair).expect("pool exists");
        (pool.quote_reserve, pool.base_reserve)
    };

    // Dave holds no quote; the deposit fails after the swap already moved
    // reserves, so only the wrapper's rollback saves us.
    let mut ctx = app.begin_block();
    let err = app
        .execute(&mut ctx, |app, ctx| {
            app.perp.open_position(
                ctx,
                &mut app.vpool,
                &app.oracle,
                &mut app.bank,
                &pair,
                Side::Buy,
                "dave",
                dec("50000"),
                dec("2"),
                Dec::ZERO,
            )
        })
        .expect_err("margin exceeds balance");
    app.end_block(ctx);

    assert!(
        matches!(err, EngineError::NotEnoughBalance { .. }),
        "unexpected error: {:?}",
        err
    );
    let pool = app.vpool.pool(&pair).expect("pool exists");
    assert_eq!(
        (pool.quote_reserve, pool.base_reserve),
        reserves_before,
        "reserves must roll back with the failed message"
    );
    assert_eq!(app.bank.balance("dave", QUOTE), 0);
    assert!(app.perp.maybe_position(&pair, "dave").is_none());
    assert_eq!(module_balance(&app.bank, modules::VAULT, QUOTE), 0);
}
