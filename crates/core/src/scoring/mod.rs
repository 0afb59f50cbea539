//! Rating-event scoring.
//!
//! `score_event` is pure: the current time is passed in, nothing is read from the environment and
//! nothing is written except a debug log for unparseable target prices.

pub mod scale;

use crate::domain::stock::RatingEvent;
use chrono::{DateTime, Utc};
use scale::{rating_rank, recency_adjustment, ActionKind};

const BASE_SCORE: f64 = 50.0;
const TARGET_JUMP: f64 = 0.5;
const TARGET_JUMP_POINTS: f64 = 30.0;
const TARGET_WEIGHT: f64 = 40.0;
const UPPER_KNEE: f64 = 70.0;
const LOWER_KNEE: f64 = 30.0;
const NEUTRAL_REASON: &str = "neutral outlook";

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
    pub current_rating: String,
}

pub fn score_event(event: &RatingEvent, now: DateTime<Utc>) -> Score {
    let action = ActionKind::parse(&event.action);
    let rank_to = rating_rank(&event.rating_to);

    let mut score = BASE_SCORE;
    score += rating_transition(rating_rank(&event.rating_from), rank_to);
    score += target_change(&event.ticker, &event.target_from, &event.target_to);
    score += action.adjustment();
    score += recency_adjustment(days_elapsed(event.time, now));

    let score = round_to(compress_tails(score.clamp(0.0, 100.0)), 2);
    let confidence = round_to(score / 100.0, 3);

    let mut reasons: Vec<String> = Vec::new();
    match action {
        ActionKind::Upgrade => reasons.push("recent upgrade".to_string()),
        ActionKind::Downgrade => reasons.push("recent downgrade".to_string()),
        _ => {}
    }
    if rank_to.is_some_and(|r| r >= 8) {
        reasons.push("buy rating".to_string());
    }
    let target_to = event.target_to.trim();
    if !target_to.is_empty() {
        reasons.push(format!("target price: {target_to}"));
    }

    let reason = if reasons.is_empty() {
        NEUTRAL_REASON.to_string()
    } else {
        reasons.join(" • ")
    };

    Score {
        score,
        confidence,
        reason,
        current_rating: event.rating_to.clone(),
    }
}

fn rating_transition(from: Option<i32>, to: Option<i32>) -> f64 {
    let (Some(from), Some(to)) = (from, to) else {
        return 0.0;
    };
    let delta = to - from;
    let multiplier = if delta.abs() > 2 {
        4
    } else if delta > 0 {
        3
    } else {
        2
    };
    f64::from(delta * multiplier)
}

fn target_change(ticker: &str, from: &str, to: &str) -> f64 {
    let (from, to) = match (parse_target_price(from), parse_target_price(to)) {
        (Ok(Some(from)), Ok(Some(to))) => (from, to),
        (Err(raw), _) | (_, Err(raw)) => {
            tracing::debug!(%ticker, target = %raw, "unparseable target price; skipping target term");
            return 0.0;
        }
        _ => return 0.0,
    };
    if from <= 0.0 {
        return 0.0;
    }

    let pct = (to - from) / from;
    if pct > TARGET_JUMP {
        TARGET_JUMP_POINTS
    } else if pct < -TARGET_JUMP {
        -TARGET_JUMP_POINTS
    } else {
        pct * TARGET_WEIGHT
    }
}

/// `Ok(None)` for a blank target, `Err(raw)` when something is there but is not a number.
pub fn parse_target_price(raw: &str) -> Result<Option<f64>, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | '¥' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(raw.to_string()),
    }
}

fn days_elapsed(time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - time).num_seconds().max(0);
    secs as f64 / 86_400.0
}

fn compress_tails(score: f64) -> f64 {
    if score > UPPER_KNEE {
        UPPER_KNEE + (score - UPPER_KNEE) * 0.5
    } else if score < LOWER_KNEE {
        LOWER_KNEE - (LOWER_KNEE - score) * 0.5
    } else {
        score
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap()
    }

    fn event(
        rating_from: &str,
        rating_to: &str,
        action: &str,
        target_from: &str,
        target_to: &str,
        age: Duration,
    ) -> RatingEvent {
        RatingEvent {
            ticker: "TEST".into(),
            company: "Test Corp".into(),
            brokerage: "Test Securities".into(),
            action: action.into(),
            rating_from: rating_from.into(),
            rating_to: rating_to.into(),
            target_from: target_from.into(),
            target_to: target_to.into(),
            time: now() - age,
        }
    }

    #[test]
    fn fresh_upgrade_hold_to_buy_scores_85() {
        let e = event("hold", "buy", "upgraded", "100", "120", Duration::zero());
        let s = score_event(&e, now());
        assert_eq!(s.score, 85.0);
        assert_eq!(s.confidence, 0.85);
        assert_eq!(s.current_rating, "buy");
        assert_eq!(s.reason, "recent upgrade • buy rating • target price: 120");
    }

    #[test]
    fn mid_range_scores_are_not_compressed() {
        let e = event("Buy", "Buy", "reiterated by", "$100.00", "$90.00", Duration::days(5));
        let s = score_event(&e, now());
        // 50 + 0 - 4 + 3 + 4
        assert!((s.score - 53.0).abs() < 1e-9);
        assert_eq!(s.reason, "buy rating • target price: $90.00");
    }

    #[test]
    fn upper_tail_is_pulled_halfway_to_70() {
        let e = event(
            "Neutral",
            "Outperform",
            "target raised by",
            "$50.00",
            "$55.00",
            Duration::days(2),
        );
        let s = score_event(&e, now());
        // 50 + 2*3 + 0.1*40 + 10 + 8 = 78 -> 74
        assert!((s.score - 74.0).abs() < 1e-9);
        assert!((s.confidence - 0.74).abs() < 1e-9);
    }

    #[test]
    fn heavy_downgrade_is_clamped_then_lifted_toward_30() {
        let e = event(
            "Strong-Buy",
            "Sell",
            "downgraded by",
            "$100",
            "$40",
            Duration::days(15),
        );
        let s = score_event(&e, now());
        // 50 - 28 - 30 - 20 - 10 = -38 -> 0 -> 15
        assert_eq!(s.score, 15.0);
        assert_eq!(s.confidence, 0.15);
        assert_eq!(s.reason, "recent downgrade • target price: $40");
    }

    #[test]
    fn small_negative_transition_uses_double_multiplier() {
        let e = event("Outperform", "Neutral", "", "", "", Duration::days(4));
        // 50 - 2*2 + 4
        assert_eq!(score_event(&e, now()).score, 50.0);
    }

    #[test]
    fn unknown_inputs_fall_back_to_neutral_reason() {
        let e = event("Mystery", "Enigma", "noted", "", "", Duration::days(20));
        let s = score_event(&e, now());
        assert_eq!(s.score, 40.0);
        assert_eq!(s.reason, "neutral outlook");
    }

    #[test]
    fn unparseable_target_skips_target_term() {
        let with_bad = event("Hold", "Hold", "reiterated by", "n/a", "$20", Duration::days(4));
        let without = event("Hold", "Hold", "reiterated by", "", "$20", Duration::days(4));
        assert_eq!(
            score_event(&with_bad, now()).score,
            score_event(&without, now()).score
        );
    }

    #[test]
    fn zero_prior_target_skips_target_term() {
        let e = event("Hold", "Hold", "", "$0", "$20", Duration::days(4));
        assert_eq!(score_event(&e, now()).score, 54.0);
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let e = event("Hold", "Hold", "", "", "", Duration::hours(-6));
        assert_eq!(score_event(&e, now()).score, 62.0);
    }

    #[test]
    fn parses_currency_and_separators() {
        assert_eq!(parse_target_price("$1,250.50"), Ok(Some(1250.5)));
        assert_eq!(parse_target_price(" € 12 "), Ok(Some(12.0)));
        assert_eq!(parse_target_price(""), Ok(None));
        assert_eq!(parse_target_price("  "), Ok(None));
        assert!(parse_target_price("abc").is_err());
        assert!(parse_target_price("NaN").is_err());
    }

    #[test]
    fn score_and_confidence_stay_in_bounds() {
        let labels = [
            "Strong Sell", "Sell", "Underperform", "Hold", "Sector Outperform", "Outperform",
            "Buy", "Strong-Buy", "unrated",
        ];
        let actions = ["upgraded by", "downgraded by", "target lowered by", "removed", "?"];
        let targets = [("$1", "$1000"), ("$1000", "$1"), ("$10", "$11"), ("", "x")];
        let ages = [Duration::zero(), Duration::days(2), Duration::days(8), Duration::days(90)];

        for from in labels {
            for to in labels {
                for action in actions {
                    for (tf, tt) in targets {
                        for age in ages {
                            let s = score_event(&event(from, to, action, tf, tt, age), now());
                            assert!((0.0..=100.0).contains(&s.score), "{from}->{to} {action}: {}", s.score);
                            assert!((0.0..=1.0).contains(&s.confidence));
                            assert!((s.confidence - s.score / 100.0).abs() <= 0.0005);
                        }
                    }
                }
            }
        }
    }
}
