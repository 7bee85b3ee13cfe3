//! Expected value of backing a selection at decimal odds.

use crate::models::{MarketQuote, Probabilities, Signal};

/// EV per unit stake: `prob * odds - 1`.
#[inline]
pub fn expected_value(prob: f64, odds: f64) -> f64 {
    prob * odds - 1.0
}

/// One signal per quote with positive EV whose selection maps to a live
/// probability.
///
/// Unknown selections and unusable odds are skipped. Only `ev > 0` is
/// enforced here; callers apply their own threshold.
pub fn calculate_ev(
    fixture_id: &str,
    bookmaker: Option<&str>,
    probs: &Probabilities,
    quotes: &[MarketQuote],
) -> Vec<Signal> {
    quotes
        .iter()
        .filter(|quote| quote.has_valid_odds())
        .filter_map(|quote| {
            let prob = probs.for_selection(&quote.selection)?;
            let ev = expected_value(prob, quote.odds);
            if ev <= 0.0 {
                return None;
            }
            Some(Signal {
                fixture_id: fixture_id.to_string(),
                selection: quote.selection.clone(),
                ev,
                prob,
                odds: quote.odds,
                bookmaker: bookmaker.map(str::to_string),
            })
        })
        .collect()
}
