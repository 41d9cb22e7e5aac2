//! Structural parsing for crypto binary contracts.
//!
//! Gemini symbols follow `GEMI-{ASSET}{YYMMDDHHMM}-HI{STRIKE}` (`LO` for
//! below-strike; `D` escapes a decimal point in the strike, e.g. `HI1D3` is
//! 1.3). Kalshi expiries are parsed from the event ticker's embedded
//! date/hour segment.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use crate::models::Payoff;
use crate::venues::MarketDescriptor;

/// Expiry mismatch beyond this rejects the match outright.
const MAX_EXPIRY_DELTA_SECS: i64 = 48 * 3600;
/// Mismatches up to here keep near-full confidence.
const TIGHT_EXPIRY_DELTA_SECS: i64 = 12 * 3600;

/// Assets we can tie between Gemini symbols and Kalshi series tickers.
const KNOWN_ASSETS: &[&str] = &["BTC", "ETH", "SOL", "XRP", "DOGE"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSymbol {
    pub asset: String,
    pub strike: f64,
    pub expiry_ts: i64,
    pub payoff: Payoff,
}

/// Parse a Gemini prediction-market symbol into its structural fields.
pub fn parse_gemini_symbol(symbol: &str) -> Option<ParsedSymbol> {
    let rest = symbol.strip_prefix("GEMI-")?;
    let (asset_expiry, strike_part) = rest.split_once('-')?;

    // Asset is the alphabetic prefix, expiry the 10-digit tail.
    let digit_start = asset_expiry.find(|c: char| c.is_ascii_digit())?;
    let (asset, expiry_digits) = asset_expiry.split_at(digit_start);
    if asset.is_empty() || expiry_digits.len() != 10 {
        return None;
    }
    let expiry_ts = parse_yymmddhhmm(expiry_digits)?;

    let (payoff, strike_str) = if let Some(s) = strike_part.strip_prefix("HI") {
        (Payoff::Above, s)
    } else if let Some(s) = strike_part.strip_prefix("LO") {
        (Payoff::Below, s)
    } else {
        return None;
    };

    let strike: f64 = strike_str.replace('D', ".").parse().ok()?;
    if !(strike.is_finite() && strike > 0.0) {
        return None;
    }

    Some(ParsedSymbol {
        asset: asset.to_ascii_uppercase(),
        strike,
        expiry_ts,
        payoff,
    })
}

fn parse_yymmddhhmm(digits: &str) -> Option<i64> {
    let year: i32 = digits[0..2].parse().ok()?;
    let month: u32 = digits[2..4].parse().ok()?;
    let day: u32 = digits[4..6].parse().ok()?;
    let hour: u32 = digits[6..8].parse().ok()?;
    let minute: u32 = digits[8..10].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&date.and_time(time)).timestamp())
}

/// Parse a Kalshi event ticker expiry, e.g. `KXBTCD-26FEB0417` is Feb 4 2026,
/// 17:00 ET. Kalshi quotes ET; we use the EST offset as the date parser in
/// this family of tickers does not carry DST information.
pub fn parse_kalshi_event_expiry(event_ticker: &str) -> Option<i64> {
    let segment = event_ticker.split('-').nth(1)?;
    if segment.len() < 9 {
        return None;
    }
    let year: i32 = segment[0..2].parse().ok()?;
    let month = match &segment[2..5].to_ascii_uppercase()[..] {
        "JAN" => 1,
        "FEB" => 2,
        "MAR" => 3,
        "APR" => 4,
        "MAY" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" => 8,
        "SEP" => 9,
        "OCT" => 10,
        "NOV" => 11,
        "DEC" => 12,
        _ => return None,
    };
    let day: u32 = segment[5..7].parse().ok()?;
    let hour: u32 = segment[7..9].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, 0, 0)?;
    // ET -> UTC with the EST offset.
    let utc = date.and_time(time) + chrono::Duration::hours(5);
    Some(Utc.from_utc_datetime(&utc).timestamp())
}

/// Asset encoded in a Kalshi series/event ticker (`KXBTCD-...` -> BTC).
pub fn asset_from_kalshi_event(event_ticker: &str) -> Option<String> {
    let series = event_ticker.split('-').next()?.to_ascii_uppercase();
    KNOWN_ASSETS
        .iter()
        .find(|asset| series.contains(*asset))
        .map(|asset| asset.to_string())
}

/// Confidence from the expiry mismatch between the two venues.
/// Exact match 1.0; up to 12 h 0.95; 12-48 h linear down to 0.5; beyond, None.
pub fn expiry_confidence(a_expiry: i64, c_expiry: i64) -> Option<f64> {
    let delta = (a_expiry - c_expiry).abs();
    if delta == 0 {
        return Some(1.0);
    }
    if delta > MAX_EXPIRY_DELTA_SECS {
        return None;
    }
    if delta <= TIGHT_EXPIRY_DELTA_SECS {
        return Some(0.95);
    }
    let span = (MAX_EXPIRY_DELTA_SECS - TIGHT_EXPIRY_DELTA_SECS) as f64;
    let over = (delta - TIGHT_EXPIRY_DELTA_SECS) as f64;
    Some(0.95 - over / span * 0.45)
}

/// Select the bracket tickers covering the payoff range: `[strike, +inf)` for
/// above-strike contracts, `(-inf, strike]` for below-strike.
pub fn bind_brackets(
    payoff: Payoff,
    strike: f64,
    brackets: &[MarketDescriptor],
) -> Vec<String> {
    let mut selected: Vec<&MarketDescriptor> = brackets
        .iter()
        .filter(|b| match payoff {
            Payoff::Above => match (b.floor_strike, b.cap_strike) {
                // Range bracket fully at or above the strike.
                (Some(floor), _) => floor >= strike,
                // Open-bottomed bracket cannot cover an above range.
                (None, Some(_)) => false,
                (None, None) => false,
            },
            Payoff::Below => match (b.floor_strike, b.cap_strike) {
                (_, Some(cap)) => cap <= strike,
                (Some(_), None) => false,
                (None, None) => false,
            },
        })
        .collect();
    selected.sort_by(|a, b| {
        let ka = a.floor_strike.or(a.cap_strike).unwrap_or(0.0);
        let kb = b.floor_strike.or(b.cap_strike).unwrap_or(0.0);
        ka.total_cmp(&kb)
    });
    selected.into_iter().map(|b| b.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn bracket(id: &str, floor: Option<f64>, cap: Option<f64>) -> MarketDescriptor {
        MarketDescriptor {
            id: id.to_string(),
            title: id.to_string(),
            category: Category::Crypto,
            close_ts: None,
            floor_strike: floor,
            cap_strike: cap,
            volume: Some(100.0),
            event_id: Some("KXBTCD-26FEB0417".to_string()),
        }
    }

    #[test]
    fn parses_above_strike_symbol() {
        let p = parse_gemini_symbol("GEMI-BTC2602041700-HI67500").unwrap();
        assert_eq!(p.asset, "BTC");
        assert_eq!(p.strike, 67_500.0);
        assert_eq!(p.payoff, Payoff::Above);
        // 2026-02-04 17:00 UTC.
        let dt = Utc.timestamp_opt(p.expiry_ts, 0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2026-02-04 17:00");
    }

    #[test]
    fn parses_decimal_escape_and_below() {
        let p = parse_gemini_symbol("GEMI-XRP2602041700-LO1D3").unwrap();
        assert_eq!(p.asset, "XRP");
        assert!((p.strike - 1.3).abs() < 1e-12);
        assert_eq!(p.payoff, Payoff::Below);
    }

    #[test]
    fn rejects_malformed_symbols() {
        assert!(parse_gemini_symbol("BTC2602041700-HI67500").is_none());
        assert!(parse_gemini_symbol("GEMI-BTC26020417-HI67500").is_none());
        assert!(parse_gemini_symbol("GEMI-BTC2602041700-XX67500").is_none());
        assert!(parse_gemini_symbol("GEMI-BTC2602041700-HI0").is_none());
    }

    #[test]
    fn kalshi_event_expiry_and_asset() {
        let ts = parse_kalshi_event_expiry("KXBTCD-26FEB0417").unwrap();
        // 17:00 EST == 22:00 UTC.
        let dt = Utc.timestamp_opt(ts, 0).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2026-02-04 22:00");
        assert_eq!(asset_from_kalshi_event("KXBTCD-26FEB0417").unwrap(), "BTC");
        assert!(asset_from_kalshi_event("KXRAIN-26FEB04").is_none());
    }

    #[test]
    fn expiry_confidence_curve() {
        assert_eq!(expiry_confidence(1_000, 1_000), Some(1.0));
        assert_eq!(expiry_confidence(0, 6 * 3600), Some(0.95));
        // Midpoint of the 12-48h band: 30h -> 0.725.
        let mid = expiry_confidence(0, 30 * 3600).unwrap();
        assert!((mid - 0.725).abs() < 1e-9);
        assert!(expiry_confidence(0, 49 * 3600).is_none());
    }

    #[test]
    fn binds_brackets_covering_above_range() {
        let brackets = vec![
            bracket("b-60-65", Some(60_000.0), Some(65_000.0)),
            bracket("b-65-70", Some(65_000.0), Some(70_000.0)),
            bracket("b-70-75", Some(70_000.0), Some(75_000.0)),
            bracket("b-75-up", Some(75_000.0), None),
        ];
        let bound = bind_brackets(Payoff::Above, 67_500.0, &brackets);
        // Only brackets fully at/above the strike; the straddling 65-70
        // bracket is excluded.
        assert_eq!(bound, vec!["b-70-75".to_string(), "b-75-up".to_string()]);
    }

    #[test]
    fn binds_brackets_covering_below_range() {
        let brackets = vec![
            bracket("b-low", None, Some(60_000.0)),
            bracket("b-60-65", Some(60_000.0), Some(65_000.0)),
            bracket("b-65-70", Some(65_000.0), Some(70_000.0)),
        ];
        let bound = bind_brackets(Payoff::Below, 65_000.0, &brackets);
        assert_eq!(bound, vec!["b-low".to_string(), "b-60-65".to_string()]);
    }
}
