// 8.0 engine/core.rs: main engine. holds markets, accounts, the event journal and id counters.
// every market sits behind its own mutex; accounts are only touched while a market lock is held
// (lock order: market, then account).

use super::config::EngineConfig;
use super::results::{ConflictReason, EngineError};
use crate::account::{Account, CapitalAllocator};
use crate::events::{
    AuditSink, BalanceEvent, Event, EventId, EventJournal, EventPayload, MarketCreatedEvent,
    PointsAwardedEvent, PointsSource, UserRegisteredEvent,
};
use crate::market::{Market, MarketSpec};
use crate::points::PointsAccount;
use crate::position::PositionBook;
use crate::types::{MarketId, PositionId, Quote, Timestamp, TradeId, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A market and the positions opened against it. Guarded as one unit.
#[derive(Debug)]
pub(super) struct MarketSlot {
    pub(super) market: Market,
    pub(super) positions: PositionBook,
}

/** 8.1: main engine struct. shareable across threads; every operation takes &self */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) markets: DashMap<MarketId, Arc<Mutex<MarketSlot>>>,
    pub(super) accounts: DashMap<UserId, Account>,
    pub(super) position_markets: DashMap<PositionId, MarketId>,
    journal: Arc<EventJournal>,
    sink: Option<Arc<dyn AuditSink>>,
    next_market_id: AtomicU32,
    next_user_id: AtomicU64,
    next_position_id: AtomicU64,
    next_trade_id: AtomicU64,
    next_event_id: AtomicU64,
    current_time: AtomicI64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("markets", &self.markets.len())
            .field("accounts", &self.accounts.len())
            .field("events", &self.journal.len())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let journal = Arc::new(EventJournal::new(config.max_events));
        Self {
            config,
            markets: DashMap::new(),
            accounts: DashMap::new(),
            position_markets: DashMap::new(),
            journal,
            sink: None,
            next_market_id: AtomicU32::new(1),
            next_user_id: AtomicU64::new(1),
            next_position_id: AtomicU64::new(1),
            next_trade_id: AtomicU64::new(1),
            next_event_id: AtomicU64::new(1),
            current_time: AtomicI64::new(Timestamp::now().as_millis()),
        }
    }

    /// Engine that also forwards every event to an external audit sink.
    pub fn with_sink(config: EngineConfig, sink: Arc<dyn AuditSink>) -> Self {
        let mut engine = Self::new(config);
        engine.sink = Some(sink);
        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_time(&self, timestamp: Timestamp) {
        self.current_time.store(timestamp.as_millis(), Ordering::SeqCst);
    }

    pub fn time(&self) -> Timestamp {
        Timestamp::from_millis(self.current_time.load(Ordering::SeqCst))
    }

    pub fn advance_time(&self, millis: i64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn create_market(&self, spec: MarketSpec) -> Result<MarketId, EngineError> {
        let market_id = MarketId(self.next_market_id.fetch_add(1, Ordering::SeqCst));
        let market = Market::new(market_id, spec, self.time())?;
        let kind = market.kind();
        let title = market.title.clone();

        self.markets.insert(
            market_id,
            Arc::new(Mutex::new(MarketSlot {
                market,
                positions: PositionBook::new(),
            })),
        );

        info!(market = %market_id, ?kind, %title, "market created");
        self.emit_event(EventPayload::MarketCreated(MarketCreatedEvent {
            market_id,
            kind,
            title,
        }));
        Ok(market_id)
    }

    pub fn create_binary_market(
        &self,
        question: impl Into<String>,
        seed_liquidity: Decimal,
    ) -> Result<MarketId, EngineError> {
        self.create_market(MarketSpec::binary(question, seed_liquidity))
    }

    pub fn create_perpetual_market(
        &self,
        ticker: impl Into<String>,
        initial_price: Decimal,
        synthetic_supply: Decimal,
    ) -> Result<MarketId, EngineError> {
        self.create_market(MarketSpec::perpetual(ticker, initial_price, synthetic_supply))
    }

    /// Registers a participant funded by `allocator`.
    pub fn register_user(&self, allocator: &dyn CapitalAllocator) -> Result<UserId, EngineError> {
        let user_id = UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst));
        let starting_capital = allocator.starting_capital(user_id);
        if starting_capital.is_negative() {
            return Err(EngineError::InvalidAmount(format!(
                "starting capital must not be negative: {starting_capital}"
            )));
        }

        let mut account = Account::new(user_id, &self.config.points, self.time());
        if !starting_capital.is_zero() {
            account.deposit(starting_capital)?;
        }
        self.accounts.insert(user_id, account);

        debug!(user = %user_id, %starting_capital, "user registered");
        self.emit_event(EventPayload::UserRegistered(UserRegisteredEvent {
            user_id,
            starting_capital,
        }));
        Ok(user_id)
    }

    pub fn deposit(&self, user_id: UserId, amount: Quote) -> Result<Quote, EngineError> {
        let new_balance = {
            let mut account = self
                .accounts
                .get_mut(&user_id)
                .ok_or(EngineError::UserNotFound(user_id))?;
            account.deposit(amount)?;
            account.balance
        };

        self.emit_event(EventPayload::Deposit(BalanceEvent {
            user_id,
            amount,
            new_balance,
        }));
        Ok(new_balance)
    }

    pub fn withdraw(&self, user_id: UserId, amount: Quote) -> Result<Quote, EngineError> {
        let new_balance = {
            let mut account = self
                .accounts
                .get_mut(&user_id)
                .ok_or(EngineError::UserNotFound(user_id))?;
            account.withdraw(amount)?;
            account.balance
        };

        self.emit_event(EventPayload::Withdrawal(BalanceEvent {
            user_id,
            amount,
            new_balance,
        }));
        Ok(new_balance)
    }

    /// Applies `points(new) - points(old)` for a lifetime P&L tracked outside
    /// the engine. `pnl_old` must be the account's recorded lifetime P&L; a
    /// replayed conversion returns 0. Returns the delta.
    pub fn convert_pnl_delta(
        &self,
        user_id: UserId,
        pnl_old: Decimal,
        pnl_new: Decimal,
    ) -> Result<i64, EngineError> {
        let (delta, reputation_points) = {
            let mut account = self
                .accounts
                .get_mut(&user_id)
                .ok_or(EngineError::UserNotFound(user_id))?;
            let delta = account.convert_lifetime_pnl(pnl_old, pnl_new, &self.config.points)?;
            (delta, account.points.reputation_points)
        };

        if delta != 0 {
            self.emit_points(user_id, PointsSource::TradingPnl, delta, reputation_points);
        }
        Ok(delta)
    }

    pub fn award_invite_points(&self, user_id: UserId, points: i64) -> Result<PointsAccount, EngineError> {
        self.award_points(user_id, PointsSource::Invite, points)
    }

    pub fn award_bonus_points(&self, user_id: UserId, points: i64) -> Result<PointsAccount, EngineError> {
        self.award_points(user_id, PointsSource::Bonus, points)
    }

    fn award_points(
        &self,
        user_id: UserId,
        source: PointsSource,
        points: i64,
    ) -> Result<PointsAccount, EngineError> {
        let snapshot = {
            let mut account = self
                .accounts
                .get_mut(&user_id)
                .ok_or(EngineError::UserNotFound(user_id))?;
            match source {
                PointsSource::Invite => account.points.award_invite(points, &self.config.points),
                PointsSource::Bonus => account.points.award_bonus(points, &self.config.points),
                PointsSource::TradingPnl => {
                    return Err(EngineError::Validation(
                        "trading points follow realized P&L".to_string(),
                    ))
                }
            }
            account.points.clone()
        };

        self.emit_points(user_id, source, points, snapshot.reputation_points);
        Ok(snapshot)
    }

    pub fn events(&self) -> Vec<Event> {
        self.journal.events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.journal.recent(count)
    }

    pub fn trade_events(&self) -> Vec<crate::events::TradeEvent> {
        self.journal.trades()
    }

    /// Runs `op` under the market's lock. Waits at most `lock_timeout`.
    pub(super) fn with_market<T>(
        &self,
        market_id: MarketId,
        op: impl FnOnce(&mut MarketSlot) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let slot = self
            .markets
            .get(&market_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::MarketNotFound(market_id))?;

        let Some(mut guard) = slot.try_lock_for(self.config.lock_timeout()) else {
            return Err(EngineError::ConcurrencyConflict {
                market_id,
                reason: ConflictReason::LockTimeout,
            });
        };
        op(&mut guard)
    }

    /// Retries lock conflicts up to `max_retries` times. Stale-version
    /// conflicts and every other error return immediately.
    pub(super) fn retrying<T>(
        &self,
        mut op: impl FnMut() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(EngineError::ConcurrencyConflict {
                    market_id,
                    reason: ConflictReason::LockTimeout,
                }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(market = %market_id, attempt, "market lock contended, retrying");
                    std::thread::yield_now();
                }
                result => return result,
            }
        }
    }

    /// Ids of every market, sorted. Collected up front so no map guard is
    /// held while a market lock is taken.
    pub(super) fn market_ids(&self) -> Vec<MarketId> {
        let mut ids: Vec<MarketId> = self.markets.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub(super) fn next_position_id(&self) -> PositionId {
        PositionId(self.next_position_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn next_trade_id(&self) -> TradeId {
        TradeId(self.next_trade_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn emit_points(
        &self,
        user_id: UserId,
        source: PointsSource,
        delta: i64,
        reputation_points: i64,
    ) {
        self.emit_event(EventPayload::PointsAwarded(PointsAwardedEvent {
            user_id,
            source,
            delta,
            reputation_points,
        }));
    }

    pub(super) fn emit_event(&self, payload: EventPayload) {
        let id = EventId(self.next_event_id.fetch_add(1, Ordering::SeqCst));
        let event = Event::new(id, self.time(), payload);

        if let Some(sink) = &self.sink {
            sink.record(event.clone());
        }
        self.journal.record(event);
    }
}
