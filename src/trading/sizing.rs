//! Kelly-based position sizing.
//!
//! `f* = edge / (1 - price)` for a binary bought at `price`, scaled by the
//! adaptive fractional-Kelly multiplier and boxed in by the hard caps: max
//! position size, wallet percentage, and a slice of the visible depth.

use crate::store::params::Params;

/// Fraction of the opposing top-of-book depth we are willing to take.
const LIQUIDITY_CAP_FRACTION: f64 = 0.10;

/// Entries below one dollar are not worth the fee drag.
pub const MIN_NOTIONAL_USD: f64 = 1.0;

pub struct SizingInputs {
    pub wallet_balance: f64,
    /// Net edge for the chosen side.
    pub edge: f64,
    /// Price of the side being bought.
    pub side_price: f64,
    /// Kelly f* from the fair-value engine when the signal carries one.
    pub engine_kelly: Option<f64>,
    /// Contracts visible on the side being taken.
    pub side_depth: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Sizing {
    pub notional: f64,
    pub qty: f64,
    /// True when the notional cleared the $1 floor.
    pub viable: bool,
}

pub fn size_position(inputs: &SizingInputs, params: &Params) -> Sizing {
    let f_star = match inputs.engine_kelly {
        Some(k) => k.clamp(0.0, params.kelly_ceiling()),
        None => {
            if inputs.side_price < 1.0 && inputs.edge > 0.0 {
                (inputs.edge / (1.0 - inputs.side_price)).clamp(0.0, params.kelly_ceiling())
            } else {
                0.0
            }
        }
    };
    let f = params.kelly_fraction() * f_star;

    let liquidity_cap = LIQUIDITY_CAP_FRACTION * inputs.side_depth * inputs.side_price;
    let notional = params
        .max_position_size()
        .min(inputs.wallet_balance * params.max_position_pct())
        .min(liquidity_cap)
        .min(f * inputs.wallet_balance)
        .max(0.0);

    let qty = if inputs.side_price > 0.0 {
        notional / inputs.side_price
    } else {
        0.0
    };

    Sizing {
        notional,
        qty,
        viable: notional >= MIN_NOTIONAL_USD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_by_the_tightest_cap() {
        let params = Params::defaults();
        let s = size_position(
            &SizingInputs {
                wallet_balance: 500.0,
                edge: 0.068,
                side_price: 0.59,
                engine_kelly: Some(0.166),
                side_depth: 400.0,
            },
            &params,
        );
        // Caps: max_position_size 10, wallet pct 60, liquidity 23.6,
        // kelly 0.10*0.166*500 = 8.3. Kelly is the binding cap.
        assert!(s.viable);
        assert!((s.notional - 8.3).abs() < 0.1, "notional {}", s.notional);
        assert!((s.qty - s.notional / 0.59).abs() < 1e-9);
    }

    #[test]
    fn liquidity_cap_binds_thin_books() {
        let params = Params::defaults();
        let s = size_position(
            &SizingInputs {
                wallet_balance: 10_000.0,
                edge: 0.10,
                side_price: 0.50,
                engine_kelly: Some(0.25),
                side_depth: 20.0,
            },
            &params,
        );
        // 0.10 * 20 contracts * $0.50 = $1 of allowed notional.
        assert!((s.notional - 1.0).abs() < 1e-9);
        assert!(s.viable);
    }

    #[test]
    fn composite_derived_kelly_respects_ceiling() {
        let params = Params::defaults();
        let s = size_position(
            &SizingInputs {
                wallet_balance: 500.0,
                edge: 0.40,
                side_price: 0.90,
                engine_kelly: None,
                // Huge edge at a high price: raw f* = 4.0, must clamp to 0.25.
                side_depth: 10_000.0,
            },
            &params,
        );
        // f = 0.10 * 0.25 = 0.025 -> $12.5, above max_position_size $10.
        assert!((s.notional - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sub_dollar_not_viable() {
        let params = Params::defaults();
        let s = size_position(
            &SizingInputs {
                wallet_balance: 20.0,
                edge: 0.02,
                side_price: 0.50,
                engine_kelly: None,
                side_depth: 400.0,
            },
            &params,
        );
        assert!(!s.viable, "notional {}", s.notional);
    }

    #[test]
    fn zero_edge_zero_size() {
        let params = Params::defaults();
        let s = size_position(
            &SizingInputs {
                wallet_balance: 500.0,
                edge: 0.0,
                side_price: 0.59,
                engine_kelly: None,
                side_depth: 400.0,
            },
            &params,
        );
        assert_eq!(s.notional, 0.0);
        assert!(!s.viable);
    }
}
