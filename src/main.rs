//! Market game simulation.
//!
//! Walks the engine through a binary market, a perpetual market, settlement,
//! points conversion and a burst of concurrent traders.

use markets_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::error::Error;
use std::sync::Arc;
use std::thread;

type SimResult = Result<(), Box<dyn Error + Send + Sync>>;

fn main() -> SimResult {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::sandbox(),
    };
    config.logging.init()?;

    println!("Market Game Engine Simulation");
    println!("Binary AMM, Holdings Curve, Settlement and Points\n");

    scenario_1_binary_market(&config)?;
    scenario_2_perpetual_long_short(&config)?;
    scenario_3_settlement(&config)?;
    scenario_4_points(&config)?;
    scenario_5_concurrent_traders(&config)?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

/// Two traders take opposite sides of a YES/NO question.
fn scenario_1_binary_market(config: &AppConfig) -> SimResult {
    println!("Scenario 1: Binary Market\n");

    let engine = Engine::new(config.engine_config());
    let market = engine.create_binary_market(
        "Will the launch ship this quarter?",
        config.markets.binary_seed_liquidity,
    )?;

    let alice = engine.register_user(&config.capital.allocator())?;
    let bob = engine.register_user(&config.capital.allocator())?;

    print_binary_prices(&engine, market)?;

    let yes = engine.buy(alice, market, Side::Yes, dec!(100))?;
    println!("  Alice buys YES for $100: {} shares @ {}", yes.shares.round_dp(4), yes.executed_price);
    print_binary_prices(&engine, market)?;

    let no = engine.buy(bob, market, Side::No, dec!(50))?;
    println!("  Bob buys NO for $50: {} shares @ {}", no.shares.round_dp(4), no.executed_price.value().round_dp(4));
    print_binary_prices(&engine, market)?;

    let half = yes.shares / dec!(2);
    let sold = engine.sell(alice, market, Side::Yes, half)?;
    println!(
        "  Alice sells {} YES for ${}, realized {}\n",
        half.round_dp(4),
        sold.amount.value().round_dp(2),
        sold.realized_pnl.unwrap_or(Quote::zero()).value().round_dp(2)
    );
    Ok(())
}

fn print_binary_prices(engine: &Engine, market: MarketId) -> SimResult {
    if let MarketPrice::Binary(prices) = engine.get_price(market)? {
        println!("  YES {} / NO {}", prices.yes.round_dp(4), prices.no.round_dp(4));
    }
    Ok(())
}

/// Longs push the price up, shorts pull it down, equal capital cancels out.
fn scenario_2_perpetual_long_short(config: &AppConfig) -> SimResult {
    println!("Scenario 2: Perpetual Holdings Curve\n");

    let engine = Engine::new(config.engine_config());
    let market = engine.create_perpetual_market("ACME", dec!(100), config.markets.synthetic_supply)?;

    let bull = engine.register_user(&config.capital.allocator())?;
    let bear = engine.register_user(&config.capital.allocator())?;

    print_spot(&engine, market, "initial")?;

    let long = engine.buy(bull, market, Side::Long, dec!(500))?;
    println!("  Bull goes long $500: {} shares @ {}", long.shares.round_dp(4), long.executed_price);
    print_spot(&engine, market, "after long")?;

    let short = engine.buy(bear, market, Side::Short, dec!(500))?;
    println!("  Bear shorts $500: {} shares @ {}", short.shares.round_dp(4), short.executed_price);
    print_spot(&engine, market, "after short")?;

    let covered = engine.close_position(short.position_id)?;
    println!(
        "  Bear covers, realized {}",
        covered.realized_pnl.unwrap_or(Quote::zero()).value().round_dp(4)
    );
    print_spot(&engine, market, "after cover")?;

    let portfolio = engine.get_portfolio(bull)?;
    println!(
        "  Bull portfolio: balance {}, market value {}, unrealized {}\n",
        portfolio.balance,
        portfolio.total_market_value.value().round_dp(2),
        portfolio.total_unrealized_pnl.value().round_dp(2)
    );
    Ok(())
}

fn print_spot(engine: &Engine, market: MarketId, label: &str) -> SimResult {
    if let MarketPrice::Spot(price) = engine.get_price(market)? {
        println!("  Spot {label}: {}", price.value().round_dp(4));
    }
    Ok(())
}

/// Resolve a binary market and pay out every position.
fn scenario_3_settlement(config: &AppConfig) -> SimResult {
    println!("Scenario 3: Resolution and Claims\n");

    let engine = Engine::new(config.engine_config());
    let market = engine.create_binary_market("Will it rain on Friday?", config.markets.binary_seed_liquidity)?;

    let mut traders = Vec::new();
    for i in 0..4 {
        let user = engine.register_user(&config.capital.allocator())?;
        let side = if i % 2 == 0 { Side::Yes } else { Side::No };
        engine.buy(user, market, side, dec!(25) + Decimal::from(i) * dec!(10))?;
        traders.push(user);
    }

    let summary = engine.resolve(market, Resolution::Yes)?;
    println!("  Resolved YES with {} open positions", summary.open_positions);

    for claim in engine.claim_all(market)? {
        println!(
            "  {} paid {}, realized {}, points {:+}",
            claim.user_id,
            claim.payout.value().round_dp(2),
            claim.realized_pnl.value().round_dp(2),
            claim.points_delta
        );
    }

    if let Err(err) = engine.resolve(market, Resolution::No) {
        println!("  Second resolution rejected: {err}\n");
    }
    Ok(())
}

/// Lifetime P&L maps to points bracket by bracket.
fn scenario_4_points(config: &AppConfig) -> SimResult {
    println!("Scenario 4: Points Conversion\n");

    for pnl in [dec!(100), dec!(5), dec!(-50), dec!(-1000), dec!(-2000)] {
        println!("  P&L {pnl} -> {} points", config.points.to_points(pnl));
    }

    let engine = Engine::new(config.engine_config());
    let user = engine.register_user(&config.capital.allocator())?;
    engine.convert_pnl_delta(user, Decimal::ZERO, dec!(-50))?;
    let delta = engine.convert_pnl_delta(user, dec!(-50), dec!(75))?;
    engine.award_invite_points(user, 50)?;
    let points = engine.points(user)?;

    println!("  P&L -50 -> 75 adds {delta} points");
    println!(
        "  Reputation {} = 100 base + {} invite + {} earned + {} bonus\n",
        points.reputation_points, points.invite_points, points.earned_points, points.bonus_points
    );
    Ok(())
}

/// Many threads trading the same markets at once.
fn scenario_5_concurrent_traders(config: &AppConfig) -> SimResult {
    println!("Scenario 5: Concurrent Traders\n");

    let engine = Arc::new(Engine::new(config.engine_config()));
    let binary = engine.create_binary_market("Will the index close higher?", config.markets.binary_seed_liquidity)?;
    let perp = engine.create_perpetual_market("INDX", dec!(50), config.markets.synthetic_supply)?;

    let num_traders = 16;
    let mut handles = Vec::new();
    for i in 0..num_traders {
        let engine = Arc::clone(&engine);
        let user = engine.register_user(&config.capital.allocator())?;
        handles.push(thread::spawn(move || {
            let mut filled = 0usize;
            for round in 0..10u32 {
                let binary_side = if (i + round) % 2 == 0 { Side::Yes } else { Side::No };
                let perp_side = if i % 3 == 0 { Side::Short } else { Side::Long };
                if engine.buy(user, binary, binary_side, dec!(5)).is_ok() {
                    filled += 1;
                }
                if engine.buy(user, perp, perp_side, dec!(10)).is_ok() {
                    filled += 1;
                }
            }
            filled
        }));
    }

    let mut fills = 0;
    for handle in handles {
        fills += handle.join().map_err(|_| "trader thread panicked")?;
    }

    let market = engine.get_market(binary)?;
    if let Some(pool) = market.pool() {
        println!(
            "  {} fills; pool YES {} + NO {} = volume {} (balanced: {})",
            fills,
            pool.yes_shares().round_dp(2),
            pool.no_shares().round_dp(2),
            pool.total_volume().round_dp(2),
            pool.is_balanced()
        );
    }
    print_spot(&engine, perp, "after the burst")?;
    println!("  Trades recorded: {}", engine.trade_events().len());
    println!("  Events generated: {}\n", engine.events().len());
    Ok(())
}
