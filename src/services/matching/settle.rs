//! Pure fill arithmetic: crossing, execution pricing, settlement amounts.
//!
//! Money is rounded to 2 decimals, half-up, and only at the point a value
//! is written to a balance; intermediate products keep full precision.

use rust_decimal::{Decimal, RoundingStrategy};

pub const MONEY_DP: u32 = 2;

/// Round a monetary amount for a balance write.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Cash reserved when a buy opens: shares x limit, at monetary precision.
/// The cancel refund uses the same computation, so reserve and refund
/// cancel out exactly.
pub fn buy_reservation(shares: Decimal, limit_price: Decimal) -> Decimal {
    round_money(shares * limit_price)
}

/// A buy and a sell cross when the seller asks no more than the buyer bids.
pub fn crosses(buy_limit: Decimal, sell_limit: Decimal) -> bool {
    sell_limit <= buy_limit
}

/// One side of a potential fill, as it sits in the book.
#[derive(Debug, Clone, Copy)]
pub struct FillSide {
    pub order_id: i64,
    pub limit_price: Decimal,
    pub created_at: i64,
    pub open_shares: Decimal,
}

/// The agreed terms of a single fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillTerms {
    pub shares: Decimal,
    pub price: Decimal,
    /// Over-reservation returned to the buyer: shares x (buy limit - price).
    pub buyer_refund: Decimal,
    /// Cash credited to the seller: shares x price.
    pub seller_proceeds: Decimal,
}

/// The resting order of the pair dictates the execution price: earlier
/// `created_at` first, ties broken by lower order id.
pub fn resting_price(a: &FillSide, b: &FillSide) -> Decimal {
    if (a.created_at, a.order_id) <= (b.created_at, b.order_id) {
        a.limit_price
    } else {
        b.limit_price
    }
}

/// Terms for matching `buy` against `sell`, or `None` when they do not
/// cross. The caller is responsible for having picked the best opposite
/// candidate; price-time priority lives in the book query, not here.
pub fn fill_terms(buy: &FillSide, sell: &FillSide) -> Option<FillTerms> {
    if !crosses(buy.limit_price, sell.limit_price) {
        return None;
    }

    let shares = buy.open_shares.min(sell.open_shares);
    if shares <= Decimal::ZERO {
        return None;
    }

    let price = resting_price(buy, sell);
    Some(FillTerms {
        shares,
        price,
        buyer_refund: round_money(shares * (buy.limit_price - price)),
        seller_proceeds: round_money(shares * price),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn side(order_id: i64, limit: Decimal, created_at: i64, open: Decimal) -> FillSide {
        FillSide {
            order_id,
            limit_price: limit,
            created_at,
            open_shares: open,
        }
    }

    #[test]
    fn crossing_requires_sell_at_or_below_buy() {
        assert!(crosses(dec!(50), dec!(45)));
        assert!(crosses(dec!(45), dec!(45)));
        assert!(!crosses(dec!(40), dec!(45)));
    }

    #[test]
    fn resting_side_sets_the_price() {
        // Older sell rests; later buy crosses up and pays the seller's ask.
        let sell = side(1, dec!(45), 1000, dec!(100));
        let buy = side(2, dec!(50), 2000, dec!(100));
        let terms = fill_terms(&buy, &sell).unwrap();
        assert_eq!(terms.price, dec!(45));

        // Older buy rests; later sell crosses down and gets the bid.
        let buy = side(3, dec!(50), 1000, dec!(100));
        let sell = side(4, dec!(45), 2000, dec!(100));
        let terms = fill_terms(&buy, &sell).unwrap();
        assert_eq!(terms.price, dec!(50));
    }

    #[test]
    fn time_tie_breaks_by_lower_order_id() {
        let sell = side(7, dec!(45), 1000, dec!(100));
        let buy = side(9, dec!(50), 1000, dec!(100));
        assert_eq!(resting_price(&buy, &sell), dec!(45));
        assert_eq!(resting_price(&sell, &buy), dec!(45));
    }

    #[test]
    fn partial_fill_refunds_the_price_improvement() {
        // SELL 50 @ 45 resting, BUY 100 @ 50 incoming: 50 fill at 45.
        let sell = side(1, dec!(45), 1000, dec!(50));
        let buy = side(2, dec!(50), 2000, dec!(100));
        let terms = fill_terms(&buy, &sell).unwrap();
        assert_eq!(terms.shares, dec!(50));
        assert_eq!(terms.price, dec!(45));
        assert_eq!(terms.buyer_refund, dec!(250));
        assert_eq!(terms.seller_proceeds, dec!(2250));
    }

    #[test]
    fn non_crossing_pair_produces_no_fill() {
        // SELL 100 @ 45 resting, BUY 100 @ 40 incoming: no trade.
        let sell = side(1, dec!(45), 1000, dec!(100));
        let buy = side(2, dec!(40), 2000, dec!(100));
        assert_eq!(fill_terms(&buy, &sell), None);
    }

    #[test]
    fn exhausted_side_produces_no_fill() {
        let sell = side(1, dec!(45), 1000, dec!(0));
        let buy = side(2, dec!(50), 2000, dec!(100));
        assert_eq!(fill_terms(&buy, &sell), None);
    }

    #[test]
    fn money_rounds_half_up_at_two_decimals() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(1.004)), dec!(1.00));
        assert_eq!(round_money(dec!(2.675)), dec!(2.68));
    }

    #[test]
    fn fractional_refund_is_rounded_only_at_the_write() {
        // 3 shares x 0.335 improvement = 1.005 exact, 1.01 at the write.
        let sell = side(1, dec!(9.665), 1000, dec!(3));
        let buy = side(2, dec!(10.00), 2000, dec!(3));
        let terms = fill_terms(&buy, &sell).unwrap();
        assert_eq!(terms.buyer_refund, dec!(1.01));
    }

    #[test]
    fn reservation_matches_refund() {
        assert_eq!(buy_reservation(dec!(100), dec!(60)), dec!(6000));
        assert_eq!(buy_reservation(dec!(3), dec!(0.335)), dec!(1.01));
    }
}
