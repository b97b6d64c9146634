//! Action registry and phrase matching
//!
//! Maps spoken phrases to canonical actions via an immutable alias
//! table: exact substring match first, fuzzy match as a fallback.

use std::collections::BTreeSet;

use similar::TextDiff;

/// Canonical light actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Power on
    TurnOn,
    /// Power off
    TurnOff,
    /// Reduce brightness by a magnitude-dependent delta
    Dim,
    /// Raise brightness by a magnitude-dependent delta
    Brighten,
    /// Power on at full brightness
    Maximum,
    /// Power on at the lowest brightness
    Minimum,
}

/// Canonical name and alias phrases per action, checked in order
const ALIASES: &[(Action, &str, &[&str])] = &[
    (
        Action::TurnOn,
        "turn on",
        &["lights on", "switch on", "power on", "on", "activate lights"],
    ),
    (
        Action::TurnOff,
        "turn off",
        &["lights off", "switch off", "power off", "off", "deactivate lights"],
    ),
    (
        Action::Dim,
        "dim",
        &["lower", "darker", "reduce brightness", "less bright", "dimmer"],
    ),
    (
        Action::Brighten,
        "brighten",
        &["brighter", "increase", "more light", "lighter", "more brightness"],
    ),
    (
        Action::Maximum,
        "maximum",
        &["brightest", "full", "hundred percent", "max brightness"],
    ),
    (
        Action::Minimum,
        "minimum",
        &["dimmest", "low", "lowest", "min brightness"],
    ),
];

/// Phrases that request an undo, checked as substrings
const UNDO_PHRASES: &[&str] = &["undo", "revert", "go back", "previous", "cancel"];

/// Read-only phrase → action lookup
pub struct ActionRegistry {
    fuzzy_threshold: u8,
}

impl ActionRegistry {
    /// Create a registry accepting fuzzy scores above `fuzzy_threshold`
    /// on a 0-100 scale
    #[must_use]
    pub const fn new(fuzzy_threshold: u8) -> Self {
        Self { fuzzy_threshold }
    }

    /// Resolve a spoken phrase to an action
    ///
    /// Substring matches against the canonical names and aliases win
    /// outright, in table order. Otherwise the whole alias set is
    /// fuzzy-scored and the best score is accepted only above the
    /// threshold.
    #[must_use]
    pub fn resolve(&self, phrase: &str) -> Option<Action> {
        for (action, canonical, aliases) in ALIASES {
            if phrase.contains(canonical) {
                return Some(*action);
            }
            for alias in *aliases {
                if phrase.contains(alias) {
                    return Some(*action);
                }
            }
        }

        let mut best: Option<(Action, u8)> = None;
        for (action, canonical, aliases) in ALIASES {
            for candidate in std::iter::once(canonical).chain(aliases.iter()) {
                let score = fuzzy_score(phrase, candidate);
                if score > self.fuzzy_threshold
                    && best.is_none_or(|(_, best_score)| score > best_score)
                {
                    best = Some((*action, score));
                }
            }
        }

        if let Some((action, score)) = best {
            tracing::debug!(phrase, ?action, score, "fuzzy matched action");
        }
        best.map(|(action, _)| action)
    }

    /// Whether the phrase asks to undo the previous command
    #[must_use]
    pub fn is_undo(phrase: &str) -> bool {
        UNDO_PHRASES.iter().any(|p| phrase.contains(p))
    }
}

/// Similarity on a 0-100 scale: the better of the plain character
/// ratio and the token-set ratio, so word order and filler words
/// don't sink an otherwise clear match
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fuzzy_score(a: &str, b: &str) -> u8 {
    let plain = char_ratio(a, b);
    let token_set = token_set_ratio(a, b);
    (plain.max(token_set) * 100.0).round() as u8
}

fn char_ratio(a: &str, b: &str) -> f32 {
    TextDiff::from_chars(a, b).ratio()
}

/// Token-set ratio: compare the sorted word intersection against each
/// side's full sorted word set and keep the best ratio
fn token_set_ratio(a: &str, b: &str) -> f32 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    let join = |set: &BTreeSet<&str>| set.iter().copied().collect::<Vec<_>>().join(" ");

    let common = join(&tokens_a.intersection(&tokens_b).copied().collect());
    let only_a = join(&tokens_a.difference(&tokens_b).copied().collect());
    let only_b = join(&tokens_b.difference(&tokens_a).copied().collect());

    let combined_a = [common.as_str(), only_a.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let combined_b = [common.as_str(), only_b.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    char_ratio(&common, &combined_a)
        .max(char_ratio(&common, &combined_b))
        .max(char_ratio(&combined_a, &combined_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ActionRegistry {
        ActionRegistry::new(70)
    }

    #[test]
    fn canonical_substring_match() {
        assert_eq!(registry().resolve("turn on the lights"), Some(Action::TurnOn));
        assert_eq!(registry().resolve("please turn off"), Some(Action::TurnOff));
        assert_eq!(registry().resolve("dim the bedroom"), Some(Action::Dim));
    }

    #[test]
    fn alias_substring_match() {
        assert_eq!(registry().resolve("make it brighter"), Some(Action::Brighten));
        assert_eq!(registry().resolve("go to max brightness"), Some(Action::Maximum));
        assert_eq!(registry().resolve("switch off everything"), Some(Action::TurnOff));
    }

    #[test]
    fn filler_words_still_resolve() {
        // "off" is present, so the substring pass catches this
        assert_eq!(
            registry().resolve("turn the lightbulbs off please"),
            Some(Action::TurnOff)
        );
    }

    #[test]
    fn gibberish_resolves_to_nothing() {
        assert_eq!(registry().resolve("asdkjhasd"), None);
        assert_eq!(registry().resolve("what time is it"), None);
    }

    #[test]
    fn near_miss_fuzzy_match() {
        // Misrecognized "switch off": no alias is a substring, but the
        // phrase is close enough to clear the threshold
        assert_eq!(registry().resolve("swich of"), Some(Action::TurnOff));
    }

    #[test]
    fn lower_prefers_dim_over_minimum() {
        // "lower" (dim alias) appears before "low" (minimum alias)
        assert_eq!(registry().resolve("lower the lights"), Some(Action::Dim));
    }

    #[test]
    fn undo_phrases() {
        assert!(ActionRegistry::is_undo("undo that"));
        assert!(ActionRegistry::is_undo("go back"));
        assert!(ActionRegistry::is_undo("cancel the last one"));
        assert!(!ActionRegistry::is_undo("turn off the lights"));
    }

    #[test]
    fn token_set_ignores_word_order() {
        let score = fuzzy_score("off turn", "turn off");
        assert!(score > 95, "score was {score}");
    }
}
