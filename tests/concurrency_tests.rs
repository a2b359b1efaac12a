//! Concurrency tests
//!
//! Many threads hammer the same markets and positions through a shared
//! `Arc<Engine>`. Totals must reconcile and terminal transitions must happen
//! exactly once.

use markets_core::*;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn shared_engine(config: EngineConfig, traders: usize, capital: Decimal) -> (Arc<Engine>, Vec<UserId>) {
    let engine = Arc::new(Engine::new(config));
    let users = (0..traders)
        .map(|_| {
            engine
                .register_user(&FixedAllocation(Quote::new(capital)))
                .unwrap()
        })
        .collect();
    (engine, users)
}

/// Claims racing each other on one position.
mod claim_race_tests {
    use super::*;

    #[test]
    fn double_claim_pays_once() {
        for _ in 0..20 {
            let (engine, users) = shared_engine(EngineConfig::default(), 1, dec!(1000));
            let market = engine.create_binary_market("Race?", dec!(100)).unwrap();
            let bought = engine.buy(users[0], market, Side::Yes, dec!(50)).unwrap();
            engine.resolve(market, Resolution::Yes).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        engine.claim(bought.position_id)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let paid = results.iter().filter(|r| r.is_ok()).count();
            let rejected = results
                .iter()
                .filter(|r| matches!(r, Err(EngineError::AlreadyClaimed(_))))
                .count();
            assert_eq!(paid, 1);
            assert_eq!(rejected, 1);

            // 950 left after the buy, plus one payout
            let balance = engine.get_balance(users[0]).unwrap().balance;
            assert_eq!(balance.value(), dec!(950) + bought.shares);
        }
    }

    #[test]
    fn claim_all_races_single_claims() {
        let (engine, users) = shared_engine(EngineConfig::default(), 8, dec!(1000));
        let market = engine.create_binary_market("Sweep?", dec!(500)).unwrap();

        let mut positions = Vec::new();
        for user in &users {
            positions.push(engine.buy(*user, market, Side::No, dec!(10)).unwrap().position_id);
        }
        engine.resolve(market, Resolution::No).unwrap();

        let sweeper = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.claim_all(market).unwrap().len())
        };
        let singles: Vec<_> = positions
            .iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                let id = *id;
                thread::spawn(move || engine.claim(id).is_ok())
            })
            .collect();

        let swept = sweeper.join().unwrap();
        let single_paid = singles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|paid| *paid)
            .count();

        // every position claimed exactly once, however the race went
        assert_eq!(swept + single_paid, positions.len());
        let claimed_events = engine
            .events()
            .iter()
            .filter(|event| matches!(event.payload, EventPayload::PositionClaimed(_)))
            .count();
        assert_eq!(claimed_events, positions.len());
    }
}

/// Buys from many threads against shared markets.
mod trading_race_tests {
    use super::*;

    #[test]
    fn concurrent_buys_reconcile() {
        let traders = 12;
        let rounds = 25;
        let (engine, users) = shared_engine(EngineConfig::default(), traders, dec!(10000));
        let market = engine.create_binary_market("Busy?", dec!(1000)).unwrap();

        let handles: Vec<_> = users
            .iter()
            .enumerate()
            .map(|(i, user)| {
                let engine = Arc::clone(&engine);
                let user = *user;
                thread::spawn(move || {
                    let side = if i % 2 == 0 { Side::Yes } else { Side::No };
                    let mut shares = Decimal::ZERO;
                    for _ in 0..rounds {
                        shares += engine.buy(user, market, side, dec!(10)).unwrap().shares;
                    }
                    (side, shares)
                })
            })
            .collect();

        let mut yes_bought = Decimal::ZERO;
        let mut no_bought = Decimal::ZERO;
        for handle in handles {
            match handle.join().unwrap() {
                (Side::Yes, shares) => yes_bought += shares,
                (_, shares) => no_bought += shares,
            }
        }

        let state = engine.get_market(market).unwrap();
        let pool = state.pool().unwrap();
        let tolerance = dec!(0.000000000001);
        assert!((pool.yes_shares() - dec!(1000) - yes_bought).abs() < tolerance);
        assert!((pool.no_shares() - dec!(1000) - no_bought).abs() < tolerance);
        assert!(pool.is_balanced());
        assert_eq!(state.version, (traders * rounds) as u64);
        assert_eq!(state.traded_notional, dec!(10) * Decimal::from(traders * rounds));

        let total_balance: Decimal = users
            .iter()
            .map(|user| engine.get_balance(*user).unwrap().balance.value())
            .sum();
        assert_eq!(total_balance, dec!(10000) * Decimal::from(traders) - state.traded_notional);
        assert_eq!(engine.trade_events().len(), traders * rounds);
    }

    #[test]
    fn balances_never_go_negative() {
        let (engine, users) = shared_engine(EngineConfig::default(), 1, dec!(100));
        let market = engine
            .create_perpetual_market("DRAIN", dec!(10), dec!(1000))
            .unwrap();
        let user = users[0];

        // 16 threads each try to spend 10 from a balance of 100
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let side = if i % 2 == 0 { Side::Long } else { Side::Short };
                thread::spawn(move || engine.buy(user, market, side, dec!(10)))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let filled = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(filled, 10);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, EngineError::InsufficientFunds { .. })));
        assert!(engine.get_balance(user).unwrap().balance.is_zero());
    }

    #[test]
    fn independent_markets_trade_in_parallel() {
        let (engine, users) = shared_engine(EngineConfig::default(), 4, dec!(1000));
        let markets: Vec<MarketId> = (0..4)
            .map(|i| {
                engine
                    .create_perpetual_market(format!("IDX{i}"), dec!(100), dec!(1000))
                    .unwrap()
            })
            .collect();

        let handles: Vec<_> = users
            .iter()
            .zip(markets.iter())
            .map(|(user, market)| {
                let engine = Arc::clone(&engine);
                let (user, market) = (*user, *market);
                thread::spawn(move || {
                    for _ in 0..10 {
                        engine.buy(user, market, Side::Long, dec!(10)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for market in markets {
            assert_eq!(
                engine.get_price(market).unwrap(),
                MarketPrice::Spot(Price::new_unchecked(dec!(100.1)))
            );
        }
    }
}

/// Lock timeouts surface as retryable conflicts.
mod contention_tests {
    use super::*;

    // Holds the market lock for a while on the first trade it sees.
    struct SlowSink {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        hold: Duration,
    }

    impl AuditSink for SlowSink {
        fn record(&self, event: Event) {
            if matches!(event.payload, EventPayload::Trade(_)) {
                if let Some(tx) = self.entered.lock().take() {
                    let _ = tx.send(());
                    thread::sleep(self.hold);
                }
            }
        }
    }

    fn contended_engine(config: EngineConfig) -> (Arc<Engine>, mpsc::Receiver<()>, UserId, UserId, MarketId) {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(SlowSink {
            entered: Mutex::new(Some(tx)),
            hold: Duration::from_millis(300),
        });
        let engine = Arc::new(Engine::with_sink(config, sink));
        let slow = engine
            .register_user(&FixedAllocation(Quote::new(dec!(100))))
            .unwrap();
        let fast = engine
            .register_user(&FixedAllocation(Quote::new(dec!(100))))
            .unwrap();
        let market = engine.create_binary_market("Busy lock?", dec!(100)).unwrap();
        (engine, rx, slow, fast, market)
    }

    #[test]
    fn lock_timeout_is_a_conflict() {
        let config = EngineConfig {
            lock_timeout_ms: 1,
            max_retries: 0,
            ..EngineConfig::default()
        };
        let (engine, entered, slow, fast, market) = contended_engine(config);

        let holder = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.buy(slow, market, Side::Yes, dec!(10)))
        };
        entered.recv().unwrap();

        let result = engine.buy(fast, market, Side::No, dec!(10));
        assert_eq!(
            result,
            Err(EngineError::ConcurrencyConflict {
                market_id: market,
                reason: ConflictReason::LockTimeout,
            })
        );
        assert!(result.unwrap_err().is_retryable());

        holder.join().unwrap().unwrap();
        assert_eq!(engine.trade_events().len(), 1);
        assert_eq!(engine.get_balance(fast).unwrap().balance.value(), dec!(100));
    }

    #[test]
    fn patient_caller_waits_for_lock() {
        let config = EngineConfig {
            lock_timeout_ms: 2000,
            ..EngineConfig::default()
        };
        let (engine, entered, slow, fast, market) = contended_engine(config);

        let holder = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.buy(slow, market, Side::Yes, dec!(10)))
        };
        entered.recv().unwrap();

        let result = engine.buy(fast, market, Side::No, dec!(10)).unwrap();
        assert_eq!(result.market_version, 2);
        holder.join().unwrap().unwrap();
    }
}
