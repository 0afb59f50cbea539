//! Fixed lookup tables used by the scoring engine.

/// Rank of the most positive label on the scale.
pub const TOP_RATING_RANK: i32 = 9;

/// Normalized labels that rank at the top of the scale.
pub const TOP_RATING_LABELS: &[&str] = &["strong buy", "top pick", "conviction buy"];

/// Postgres rendering of [`normalize_label`] over `current_rating`.
pub const NORMALIZED_RATING_SQL: &str =
    "btrim(regexp_replace(lower(current_rating), '[-_[:space:]]+', ' ', 'g'))";

pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordinal position of a rating label, 1 (strong sell) through 9 (strong buy).
pub fn rating_rank(label: &str) -> Option<i32> {
    let rank = match normalize_label(label).as_str() {
        "strong sell" => 1,
        "sell" => 2,
        "underperform" | "underweight" | "reduce" | "moderate sell" => 3,
        "sector underperform" | "market underperform" => 4,
        "hold" | "neutral" | "equal weight" | "market perform" | "sector perform" | "in line"
        | "inline" | "peer perform" | "sector weight" => 5,
        "sector outperform" | "market outperform" | "moderate buy" => 6,
        "outperform" | "overweight" | "accumulate" | "positive" => 7,
        "buy" | "speculative buy" => 8,
        top if TOP_RATING_LABELS.contains(&top) => TOP_RATING_RANK,
        _ => return None,
    };
    Some(rank)
}

pub fn is_top_rating(label: &str) -> bool {
    rating_rank(label) == Some(TOP_RATING_RANK)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Upgrade,
    TargetRaised,
    Initiated,
    Reiterated,
    TargetSet,
    TargetLowered,
    Downgrade,
    Removed,
    Other,
}

impl ActionKind {
    pub fn parse(action: &str) -> Self {
        match normalize_action(action).as_str() {
            "upgraded" | "upgrade" => Self::Upgrade,
            "target raised" => Self::TargetRaised,
            "initiated" => Self::Initiated,
            "reiterated" => Self::Reiterated,
            "target set" => Self::TargetSet,
            "target lowered" => Self::TargetLowered,
            "downgraded" | "downgrade" => Self::Downgrade,
            "removed" | "coverage dropped" | "discontinued" => Self::Removed,
            _ => Self::Other,
        }
    }

    pub fn adjustment(self) -> f64 {
        match self {
            Self::Upgrade => 20.0,
            Self::TargetRaised => 10.0,
            Self::Initiated => 5.0,
            Self::Reiterated => 3.0,
            Self::TargetSet => 2.0,
            Self::TargetLowered => -10.0,
            Self::Downgrade => -20.0,
            Self::Removed => -15.0,
            Self::Other => 0.0,
        }
    }
}

/// Lowercases, trims and drops the feed's trailing " by" ("upgraded by" -> "upgraded").
pub fn normalize_action(action: &str) -> String {
    let lowered = action.trim().to_lowercase();
    match lowered.strip_suffix(" by") {
        Some(stripped) => stripped.trim_end().to_string(),
        None => lowered,
    }
}

/// Step bonus for how fresh an event is.
pub fn recency_adjustment(days_elapsed: f64) -> f64 {
    match days_elapsed {
        d if d < 1.0 => 12.0,
        d if d < 3.0 => 8.0,
        d if d < 7.0 => 4.0,
        d if d < 10.0 => -5.0,
        _ => -10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_case_and_separator_insensitive() {
        assert_eq!(rating_rank("Strong-Buy"), Some(9));
        assert_eq!(rating_rank("  strong_buy "), Some(9));
        assert_eq!(rating_rank("Equal-Weight"), Some(5));
        assert_eq!(rating_rank("Hold"), Some(5));
        assert_eq!(rating_rank("Buy"), Some(8));
        assert_eq!(rating_rank("Sector Outperform"), Some(6));
        assert_eq!(rating_rank("Unknown Label"), None);
        assert_eq!(rating_rank(""), None);
    }

    #[test]
    fn top_labels_normalize_to_top_rank() {
        for label in TOP_RATING_LABELS {
            assert_eq!(rating_rank(label), Some(TOP_RATING_RANK));
        }
        for label in ["Strong-Buy", "strong_buy", "Top Pick", " conviction   BUY "] {
            assert!(is_top_rating(label), "{label}");
        }
        assert!(!is_top_rating("Buy"));
        assert!(!is_top_rating("strongbuy"));
    }

    #[test]
    fn action_drops_trailing_by() {
        assert_eq!(normalize_action("Target Raised By"), "target raised");
        assert_eq!(normalize_action(" upgraded by "), "upgraded");
        assert_eq!(normalize_action("by"), "by");
        assert_eq!(ActionKind::parse("downgraded by"), ActionKind::Downgrade);
        assert_eq!(ActionKind::parse("target lowered by"), ActionKind::TargetLowered);
        assert_eq!(ActionKind::parse("something new"), ActionKind::Other);
        assert_eq!(ActionKind::Other.adjustment(), 0.0);
    }

    #[test]
    fn recency_is_monotonically_decreasing() {
        let samples = [0.0, 0.5, 1.0, 2.9, 3.0, 6.5, 7.0, 9.9, 10.0, 45.0];
        for pair in samples.windows(2) {
            assert!(recency_adjustment(pair[0]) >= recency_adjustment(pair[1]));
        }
        assert_eq!(recency_adjustment(0.2), 12.0);
        assert_eq!(recency_adjustment(30.0), -10.0);
    }
}
