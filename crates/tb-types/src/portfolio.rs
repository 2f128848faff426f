use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::contract::OptionContract;
use crate::errors::{TbError, TbResult};
use crate::strategy::{Action, StrategyLeg};

/// A strategy leg bound to its entry and its running mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Index of the leg inside its strategy.
    pub leg_index: usize,
    pub leg: StrategyLeg,
    /// Per-unit entry premium.
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Per-unit mark.
    pub current_price: Decimal,
    /// Signed market value: sign × quantity × multiplier × current price.
    pub current_value: Decimal,
    pub realized_pnl: Decimal,
    pub is_open: bool,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    pub fn new(leg_index: usize, leg: StrategyLeg, entry_price: Decimal, entry_time: DateTime<Utc>) -> Self {
        let mut position = Self {
            leg_index,
            leg,
            entry_price,
            entry_time,
            current_price: entry_price,
            current_value: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            is_open: true,
            last_updated: entry_time,
        };
        position.current_value = position.value_at(entry_price);
        position
    }

    /// Signed value of the whole position at a per-unit price.
    pub fn value_at(&self, price: Decimal) -> Decimal {
        self.leg.signed_notional_units() * price
    }

    pub fn contract(&self) -> &OptionContract {
        &self.leg.contract
    }

    pub fn is_long(&self) -> bool {
        self.leg.is_long()
    }

    pub fn is_short(&self) -> bool {
        self.leg.is_short()
    }

    pub fn update_market_price(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.current_price = price;
        self.current_value = self.value_at(price);
        self.last_updated = at;
    }

    /// Unrealized P&L against the entry premium.
    pub fn unrealized_pnl(&self) -> Decimal {
        if !self.is_open {
            return Decimal::ZERO;
        }
        self.value_at(self.current_price - self.entry_price)
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl()
    }
}

/// Kind of simulated trade event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKind {
    Open,
    Close,
    Expire,
    /// Early exercise (long leg) or assignment (short leg) of an American option.
    Exercise,
}

impl TradeKind {
    /// True for trades that end a position.
    pub fn is_closing(&self) -> bool {
        !matches!(self, TradeKind::Open)
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeKind::Open => "open",
            TradeKind::Close => "close",
            TradeKind::Expire => "expire",
            TradeKind::Exercise => "exercise",
        };
        write!(f, "{}", s)
    }
}

/// Immutable, append-only record of a simulated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub leg_index: usize,
    pub contract: OptionContract,
    /// Direction of this trade (a closing trade reverses the leg action).
    pub action: Action,
    pub quantity: Decimal,
    /// Per-unit price.
    pub price: Decimal,
    pub kind: TradeKind,
    pub commission: Decimal,
    /// Realized P&L contributed by this trade, commission included.
    pub realized_pnl: Decimal,
}

impl Trade {
    /// Cash impact of the trade (premium × multiplier × quantity ± commission).
    pub fn cash_flow(&self) -> Decimal {
        let notional = self.price * self.contract.multiplier * self.quantity;
        match self.action {
            Action::Buy => -(notional + self.commission),
            Action::Sell => notional - self.commission,
        }
    }
}

/// One row per simulated calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnL {
    pub date: NaiveDate,
    pub portfolio_value: Decimal,
    pub daily_pnl: Decimal,
    pub cumulative_pnl: Decimal,
    pub cash: Decimal,
    pub open_positions: usize,
    /// Some input for this day was carried forward or substituted.
    pub stale: bool,
}

/// Portfolio state owned by exactly one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub account_id: String,
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub positions: Vec<Position>,
    pub trades: Vec<Trade>,
    pub daily_pnl: Vec<DailyPnL>,
    pub total_commissions: Decimal,
}

impl Portfolio {
    pub fn new(account_id: String, initial_capital: Decimal) -> Self {
        Self {
            account_id,
            initial_capital,
            cash: initial_capital,
            positions: Vec::new(),
            trades: Vec::new(),
            daily_pnl: Vec::new(),
            total_commissions: Decimal::ZERO,
        }
    }

    /// Open a position for a leg at a per-unit price.
    pub fn open_position(
        &mut self,
        leg_index: usize,
        leg: &StrategyLeg,
        price: Decimal,
        commission: Decimal,
        at: DateTime<Utc>,
    ) -> &Trade {
        let trade = Trade {
            id: Uuid::new_v4(),
            timestamp: at,
            leg_index,
            contract: leg.contract.clone(),
            action: leg.action,
            quantity: leg.quantity,
            price,
            kind: TradeKind::Open,
            commission,
            realized_pnl: -commission,
        };
        self.cash += trade.cash_flow();
        self.total_commissions += commission;

        let mut position = Position::new(leg_index, leg.clone(), price, at);
        position.realized_pnl = -commission;
        self.positions.push(position);

        self.trades.push(trade);
        &self.trades[self.trades.len() - 1]
    }

    /// Close the position at `index` with a closing trade of `kind`.
    pub fn close_position(
        &mut self,
        index: usize,
        price: Decimal,
        kind: TradeKind,
        commission: Decimal,
        at: DateTime<Utc>,
    ) -> TbResult<&Trade> {
        let position = self
            .positions
            .get_mut(index)
            .ok_or_else(|| TbError::Internal(format!("no position at index {index}")))?;
        if !position.is_open {
            return Err(TbError::Internal(format!(
                "position {index} is already closed"
            )));
        }

        let realized = position.value_at(price - position.entry_price) - commission;
        let trade = Trade {
            id: Uuid::new_v4(),
            timestamp: at,
            leg_index: position.leg_index,
            contract: position.leg.contract.clone(),
            action: position.leg.action.opposite(),
            quantity: position.leg.quantity,
            price,
            kind,
            commission,
            realized_pnl: realized,
        };

        position.realized_pnl += realized;
        position.is_open = false;
        position.current_price = price;
        position.current_value = Decimal::ZERO;
        position.last_updated = at;

        self.cash += trade.cash_flow();
        self.total_commissions += commission;
        self.trades.push(trade);
        Ok(&self.trades[self.trades.len() - 1])
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open)
    }

    pub fn has_open_positions(&self) -> bool {
        self.positions.iter().any(|p| p.is_open)
    }

    /// Signed value of all open positions.
    pub fn market_value(&self) -> Decimal {
        self.open_positions().map(|p| p.current_value).sum()
    }

    /// Cash plus signed leg values.
    pub fn total_value(&self) -> Decimal {
        self.cash + self.market_value()
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.iter().map(|p| p.realized_pnl).sum()
    }

    /// Append the day's row. Days must be strictly increasing.
    pub fn record_day(&mut self, date: NaiveDate, stale: bool) -> TbResult<&DailyPnL> {
        let portfolio_value = self.total_value();
        let (previous_value, previous_cumulative) = match self.daily_pnl.last() {
            Some(last) if last.date >= date => {
                return Err(TbError::Internal(format!(
                    "daily P&L out of order: {date} recorded after {}",
                    last.date
                )));
            }
            Some(last) => (last.portfolio_value, last.cumulative_pnl),
            None => (self.initial_capital, Decimal::ZERO),
        };

        let daily_pnl = portfolio_value - previous_value;
        self.daily_pnl.push(DailyPnL {
            date,
            portfolio_value,
            daily_pnl,
            cumulative_pnl: previous_cumulative + daily_pnl,
            cash: self.cash,
            open_positions: self.open_positions().count(),
            stale,
        });
        Ok(&self.daily_pnl[self.daily_pnl.len() - 1])
    }

    pub fn get_total_return(&self) -> Decimal {
        if self.initial_capital > Decimal::ZERO {
            (self.total_value() - self.initial_capital) / self.initial_capital
        } else {
            Decimal::ZERO
        }
    }
}
