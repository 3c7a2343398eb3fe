//! Choosing which held tokens pay for an amount.
//!
//! This is a bounded heuristic, not a subset-sum solver. A set is found only
//! if it is a single token, or a run of tokens of one denomination:
//!
//! ```text
//!   held: 0.50 0.50 0.50 0.50     amount 1.00 → [0.50, 0.50]
//!   held: 0.20 0.50               amount 0.70 → none (mixed denominations)
//! ```
//!
//! Authorities may plan their denominations around this behaviour, so it is
//! kept as is rather than replaced with something cleverer.

use std::collections::BTreeMap;

use crate::token::{Amount, Token};

/// Count held tokens per denomination, largest first.
fn denominations(held: &[Token]) -> Vec<(Amount, usize)> {
    let mut counts: BTreeMap<Amount, usize> = BTreeMap::new();
    for token in held {
        *counts.entry(token.value()).or_default() += 1;
    }
    counts.into_iter().rev().collect()
}

/// Tokens adding up to exactly `amount`, or `None`.
///
/// A single token of that value wins. Otherwise the largest denomination
/// that divides `amount` and is held often enough.
pub fn select_exact(held: &[Token], amount: Amount) -> Option<Vec<Token>> {
    if amount.is_zero() {
        return None;
    }

    if let Some(single) = held.iter().find(|t| t.value() == amount) {
        return Some(vec![single.clone()]);
    }

    for (value, available) in denominations(held) {
        if amount.cents() % value.cents() != 0 {
            continue;
        }
        let needed = (amount.cents() / value.cents()) as usize;
        if needed <= available {
            return Some(
                held.iter()
                    .filter(|t| t.value() == value)
                    .take(needed)
                    .cloned()
                    .collect(),
            );
        }
    }
    None
}

/// The smallest amount of at least `amount` that [`select_exact`] can pay.
///
/// Tokens are never broken on the client, so paying 0.25 from a purse of
/// 0.50 tokens costs 0.50. Candidates are every single token worth at least
/// `amount`, and for every denomination the fewest tokens covering it.
pub fn quote(held: &[Token], amount: Amount) -> Option<Amount> {
    if amount.is_zero() {
        return None;
    }

    let singles = held
        .iter()
        .map(Token::value)
        .filter(|v| *v >= amount);

    let runs = denominations(held)
        .into_iter()
        .filter_map(|(value, available)| {
            let needed = amount.cents().div_ceil(value.cents());
            if needed as usize <= available {
                value.checked_mul(needed)
            } else {
                None
            }
        });

    singles.chain(runs).min()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(c: u64) -> Amount {
        Amount::from_cents(c)
    }

    fn purse(values: &[u64]) -> Vec<Token> {
        values
            .iter()
            .map(|v| Token::create(cents(*v)).unwrap())
            .collect()
    }

    fn total(tokens: &[Token]) -> Amount {
        tokens.iter().map(Token::value).sum()
    }

    #[test]
    fn single_token_match_wins() {
        let held = purse(&[50, 50, 100]);
        let picked = select_exact(&held, cents(100)).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0], held[2]);
    }

    #[test]
    fn run_of_one_denomination() {
        let held = purse(&[50, 50, 50, 50]);
        let picked = select_exact(&held, cents(150)).unwrap();
        assert_eq!(picked.len(), 3);
        assert_eq!(total(&picked), cents(150));
    }

    #[test]
    fn largest_fitting_denomination_is_preferred() {
        let held = purse(&[10, 10, 10, 10, 20, 20]);
        let picked = select_exact(&held, cents(40)).unwrap();
        assert_eq!(picked.len(), 2);
        assert!(picked.iter().all(|t| t.value() == cents(20)));
    }

    #[test]
    fn mixed_denominations_are_not_combined() {
        let held = purse(&[20, 50]);
        assert!(select_exact(&held, cents(70)).is_none());
    }

    #[test]
    fn not_enough_tokens() {
        let held = purse(&[50, 50]);
        assert!(select_exact(&held, cents(150)).is_none());
        assert!(select_exact(&held, Amount::ZERO).is_none());
    }

    #[test]
    fn quote_rounds_up_to_whole_tokens() {
        let held = purse(&[50, 50, 50, 50]);
        assert_eq!(quote(&held, cents(25)), Some(cents(50)));
        assert_eq!(quote(&held, cents(100)), Some(cents(100)));
        assert_eq!(quote(&held, cents(110)), Some(cents(150)));
        assert_eq!(quote(&held, cents(210)), None);
    }

    #[test]
    fn quote_prefers_cheapest_candidate() {
        let held = purse(&[500, 20, 20, 20]);
        // One 5.00 token covers 0.50, but three 0.20 tokens cost only 0.60.
        assert_eq!(quote(&held, cents(50)), Some(cents(60)));
    }

    #[test]
    fn quoted_charge_is_always_selectable() {
        let held = purse(&[500, 20, 20, 20, 50, 50]);
        for wanted in [1, 20, 35, 50, 60, 99, 100, 450, 500] {
            if let Some(charge) = quote(&held, cents(wanted)) {
                let picked = select_exact(&held, charge).expect("charge selectable");
                assert_eq!(total(&picked), charge);
                assert!(charge >= cents(wanted));
            }
        }
    }
}
