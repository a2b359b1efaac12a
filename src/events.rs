// 7.0: every committed state change produces an event. trade events are the audit trail
// handed to the sink; the rest describe market lifecycle and account changes.

use crate::market::Resolution;
use crate::types::{MarketId, MarketKind, PositionId, Price, Quote, Side, Timestamp, TradeAction, TradeId, UserId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Market lifecycle
    MarketCreated(MarketCreatedEvent),
    MarketResolved(MarketResolvedEvent),

    // Trading
    Trade(TradeEvent),
    PositionClaimed(PositionClaimedEvent),

    // Accounts
    UserRegistered(UserRegisteredEvent),
    Deposit(BalanceEvent),
    Withdrawal(BalanceEvent),
    PointsAwarded(PointsAwardedEvent),
}

/// Immutable record of one executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: TradeId,
    pub market_id: MarketId,
    pub user_id: UserId,
    pub position_id: PositionId,
    pub side: Side,
    pub action: TradeAction,
    // capital for buys, proceeds for sells
    pub amount: Quote,
    pub shares: Decimal,
    pub price: Price,
    pub realized_pnl: Option<Quote>,
    pub executed_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market_id: MarketId,
    pub kind: MarketKind,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResolvedEvent {
    pub market_id: MarketId,
    pub resolution: Resolution,
    pub settlement_price: Option<Price>,
    pub open_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClaimedEvent {
    pub market_id: MarketId,
    pub position_id: PositionId,
    pub user_id: UserId,
    pub payout: Quote,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegisteredEvent {
    pub user_id: UserId,
    pub starting_capital: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub user_id: UserId,
    pub amount: Quote,
    pub new_balance: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PointsSource {
    TradingPnl,
    Invite,
    Bonus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsAwardedEvent {
    pub user_id: UserId,
    pub source: PointsSource,
    pub delta: i64,
    pub reputation_points: i64,
}

/// Destination for engine events. Called while the originating market lock is
/// held, so implementations must not call back into the engine.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: Event);
}

/// Bounded in-memory journal. Oldest events are dropped past `capacity`.
#[derive(Debug)]
pub struct EventJournal {
    events: RwLock<VecDeque<Event>>,
    capacity: usize,
}

impl EventJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().iter().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let events = self.events.read();
        let start = events.len().saturating_sub(count);
        events.iter().skip(start).cloned().collect()
    }

    pub fn trades(&self) -> Vec<TradeEvent> {
        self.events
            .read()
            .iter()
            .filter_map(|event| match &event.payload {
                EventPayload::Trade(trade) => Some(trade.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl AuditSink for EventJournal {
    fn record(&self, event: Event) {
        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deposit(id: u64) -> Event {
        Event::new(
            EventId(id),
            Timestamp::from_millis(1000),
            EventPayload::Deposit(BalanceEvent {
                user_id: UserId(1),
                amount: Quote::new(dec!(100)),
                new_balance: Quote::new(dec!(100)),
            }),
        )
    }

    fn trade(id: u64) -> Event {
        Event::new(
            EventId(id),
            Timestamp::from_millis(2000),
            EventPayload::Trade(TradeEvent {
                id: TradeId(id),
                market_id: MarketId(1),
                user_id: UserId(1),
                position_id: PositionId(1),
                side: Side::Yes,
                action: TradeAction::Buy,
                amount: Quote::new(dec!(50)),
                shares: dec!(100),
                price: Price::new_unchecked(dec!(0.5)),
                realized_pnl: None,
                executed_at: Timestamp::from_millis(2000),
            }),
        )
    }

    #[test]
    fn journal_is_bounded() {
        let journal = EventJournal::new(2);
        journal.record(deposit(1));
        journal.record(deposit(2));
        journal.record(deposit(3));

        let ids: Vec<u64> = journal.events().iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn trades_filtered_from_journal() {
        let journal = EventJournal::new(10);
        journal.record(deposit(1));
        journal.record(trade(2));

        let trades = journal.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].shares, dec!(100));
        assert_eq!(journal.recent(1)[0].id, EventId(2));
    }

    #[test]
    fn trade_event_serializes() {
        let event = trade(7);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"Trade\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, EventId(7));
    }
}
