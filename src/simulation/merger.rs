// Order Book Merger
// Combines real book levels with the user's virtual orders into one ranked view.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::simulation::order_book::BookView;
use crate::simulation::virtual_orders::VirtualBook;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelSource {
    Real,
    Virtual,
}

/// One row of the merged book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    /// Cumulative quantity of this row and every better row on the same side
    pub total: Decimal,
    pub source: LevelSource,
    pub trade_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedBook {
    pub bids: Vec<MergedLevel>,
    pub asks: Vec<MergedLevel>,
}

impl MergedBook {
    pub fn side(&self, side: Side) -> &[MergedLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }
}

/// Merge real and virtual levels per side, best price first, truncated to `depth`.
///
/// Real and virtual rows at the same price stay separate; the real row sorts first.
pub fn merge_book(book: &BookView, virtual_orders: &VirtualBook, depth: usize) -> MergedBook {
    MergedBook {
        bids: merge_side(Side::Bid, book, virtual_orders, depth),
        asks: merge_side(Side::Ask, book, virtual_orders, depth),
    }
}

fn merge_side(side: Side, book: &BookView, virtual_orders: &VirtualBook, depth: usize) -> Vec<MergedLevel> {
    let real = book.side(side).iter().map(|level| MergedLevel {
        price: level.price,
        quantity: level.quantity,
        total: Decimal::ZERO,
        source: LevelSource::Real,
        trade_id: None,
    });
    let simulated = virtual_orders.side(side).iter().map(|order| MergedLevel {
        price: order.price,
        quantity: order.amount,
        total: Decimal::ZERO,
        source: LevelSource::Virtual,
        trade_id: order.trade_id,
    });

    let mut rows: Vec<MergedLevel> = real.chain(simulated).collect();
    // stable sort keeps real rows ahead of virtual rows at equal prices
    rows.sort_by(|a, b| side.best_first(&a.price, &b.price));
    rows.truncate(depth);

    let mut running = Decimal::ZERO;
    for row in rows.iter_mut() {
        running = running.saturating_add(row.quantity);
        row.total = running;
    }

    rows
}
