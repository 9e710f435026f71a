// Lot scoring - turns a skeleton plus market comps into a valued lot
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use lotwise_api::round_cents;

use crate::config::ScoringConfig;
use crate::grouping::Strategy;
use crate::models::{Confidence, Item, Lot, LotSkeleton, MarketSnapshot};

/// Most missing volumes spelled out before we just say "and N more"
const MAX_LISTED_GAPS: usize = 8;

/// Shipping cost per pound, against the lot's per-item price
const SHIPPING_COST_PER_LB: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct LotScorer {
    config: ScoringConfig,
}

impl LotScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Value a skeleton
    ///
    /// `members` are the items behind the skeleton's ids. With a priced
    /// snapshot the value is the blended median scaled by member count;
    /// otherwise it's the sum of per-item estimates at low confidence.
    /// The justification only explains, it never feeds back into the number.
    pub fn score(
        &self,
        skeleton: &LotSkeleton,
        members: &[&Item],
        snapshot: Option<MarketSnapshot>,
    ) -> Lot {
        let count = skeleton.len();
        let item_total = round_cents(members.iter().map(|i| i.estimated_price.max(0.0)).sum());

        let unit_price = snapshot.as_ref().and_then(|s| self.unit_price(s));
        let estimated_value = match unit_price {
            Some(unit) => round_cents(unit * count as f64),
            None => item_total,
        };
        let confidence = self.confidence(snapshot.as_ref(), unit_price.is_some());

        let mut justification = Vec::new();
        justification.push(strategy_line(skeleton, members));
        if skeleton.strategy() == Strategy::BySeries {
            justification.extend(series_completeness(members));
        }
        justification.push(format!("Size {} (bonus {:.1})", count, size_bonus(count)));
        justification.push(cohesion_line(skeleton.strategy()));

        match &snapshot {
            Some(s) => {
                justification.push(format!(
                    "{} sold comps, {} active listings",
                    s.sold_count, s.active_count
                ));
                let sell_through = s.sold_count as f64 / (s.sold_count + s.active_count).max(1) as f64;
                justification.push(format!("Sell-through {:.0}%", sell_through * 100.0));

                match unit_price {
                    Some(unit) => justification.push(format!(
                        "Market value ${:.2} per item x {} = ${:.2}",
                        unit, count, estimated_value
                    )),
                    None => justification
                        .push("No market comps found, using per-item estimates".to_string()),
                }

                justification.push(format!(
                    "Price consistency {:.2} (active vs sold median)",
                    price_consistency(s)
                ));

                if s.is_stale {
                    justification.push(format!(
                        "Market data is stale (fetched {})",
                        s.fetched_at.format("%Y-%m-%d %H:%M UTC")
                    ));
                }
            }
            None => justification
                .push("Market data unavailable, using per-item estimates".to_string()),
        }

        justification.push(format!("Per-item estimates total ${:.2}", item_total));
        justification.push(shipping_line(members, snapshot.as_ref()));

        if let (Some(s), Some(_)) = (&snapshot, unit_price) {
            if s.sold_count < self.config.min_sold_for_high {
                justification.push(format!(
                    "Thin sample: {} sold comps (need {} for high confidence)",
                    s.sold_count, self.config.min_sold_for_high
                ));
            }
        }

        Lot {
            skeleton: skeleton.clone(),
            name: display_name(skeleton, members),
            snapshot,
            estimated_value,
            confidence,
            justification,
        }
    }

    /// Blended per-item price, None when the snapshot carries no prices
    pub fn unit_price(&self, snapshot: &MarketSnapshot) -> Option<f64> {
        match (snapshot.sold_median_price, snapshot.active_median_price) {
            (Some(sold), Some(active)) => {
                Some(self.config.sold_weight * sold + self.config.active_weight * active)
            }
            (Some(sold), None) => Some(sold),
            (None, Some(active)) => Some(active),
            (None, None) => None,
        }
    }

    /// Stale or thin snapshots never reach high
    pub fn confidence(&self, snapshot: Option<&MarketSnapshot>, priced: bool) -> Confidence {
        let Some(s) = snapshot else {
            return Confidence::Low;
        };
        if !priced {
            return Confidence::Low;
        }
        if s.sold_count >= self.config.min_sold_for_high && !s.is_stale {
            Confidence::High
        } else if s.sold_count >= self.config.min_sold_for_medium {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl Default for LotScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

/// Confidence first, then value, then key so ties are stable
pub fn rank_lots(lots: &mut [Lot]) {
    lots.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| {
                b.estimated_value
                    .partial_cmp(&a.estimated_value)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.key().cmp(b.key()))
    });
}

/// Human name for the lot, from the most common spelling among members
pub fn display_name(skeleton: &LotSkeleton, members: &[&Item]) -> String {
    let strategy = skeleton.strategy();
    let spelling = most_common(members.iter().filter_map(|item| strategy.raw_value(item)))
        .unwrap_or_else(|| skeleton.group_key().to_string());

    match strategy {
        Strategy::ByAuthor => format!("{} Collection", spelling),
        Strategy::BySeries => format!("{} Series", spelling),
        Strategy::ByTheme => format!("{} Books", title_case(&spelling)),
    }
}

fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    // equal counts: lexicographically smallest spelling wins
    counts
        .into_iter()
        .max_by(|(a_val, a_n), (b_val, b_n)| a_n.cmp(b_n).then_with(|| b_val.cmp(a_val)))
        .map(|(value, _)| value.to_string())
}

fn title_case(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn strategy_line(skeleton: &LotSkeleton, members: &[&Item]) -> String {
    let n = skeleton.len();
    let strategy = skeleton.strategy();
    let spelling = most_common(members.iter().filter_map(|item| strategy.raw_value(item)))
        .unwrap_or_else(|| skeleton.group_key().to_string());
    match strategy {
        Strategy::ByAuthor => format!("{} books by {}", n, spelling),
        Strategy::BySeries => format!("{} books from the {} series", n, spelling),
        Strategy::ByTheme => format!("{} books tagged {}", n, spelling),
    }
}

/// Lots of 3 to 8 move best; singles-adjacent and huge lots less so
fn size_bonus(count: usize) -> f64 {
    match count {
        3..=8 => 1.0,
        2 | 9..=12 => 0.8,
        n if n > 12 => 0.6,
        _ => 0.5,
    }
}

fn cohesion_line(strategy: Strategy) -> String {
    match strategy {
        Strategy::BySeries => "Cohesion 1.0 (single series)".to_string(),
        Strategy::ByAuthor => "Cohesion 0.7 (single author)".to_string(),
        Strategy::ByTheme => "Cohesion 0.7 (shared theme)".to_string(),
    }
}

/// 1 minus the relative spread of the two medians, 1.0 with fewer than two
fn price_consistency(snapshot: &MarketSnapshot) -> f64 {
    let prices: Vec<f64> = [snapshot.active_median_price, snapshot.sold_median_price]
        .into_iter()
        .flatten()
        .filter(|p| *p > 0.0)
        .collect();
    if prices.len() < 2 {
        return 1.0;
    }
    let lo = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    1.0 - (hi - lo) / ((hi + lo) / 2.0)
}

fn shipping_line(members: &[&Item], snapshot: Option<&MarketSnapshot>) -> String {
    let lbs: f64 = members.iter().map(|item| item.shipping_lbs()).sum();
    let baseline = snapshot
        .and_then(|s| s.sold_median_price.or(s.active_median_price))
        .unwrap_or(10.0)
        .max(10.0);
    let penalty = (lbs * SHIPPING_COST_PER_LB / baseline).clamp(0.0, 0.5);
    format!("Est. shipping {:.1} lb (penalty {:.2})", lbs, penalty)
}

fn series_completeness(members: &[&Item]) -> Vec<String> {
    let held: BTreeSet<u32> = members
        .iter()
        .filter_map(|item| item.series_position)
        .filter(|p| *p > 0)
        .collect();
    let Some(&highest) = held.iter().next_back() else {
        return Vec::new();
    };

    let mut lines = vec![format!("series {}/{} complete", held.len(), highest)];

    let missing: Vec<u32> = (1..highest).filter(|p| !held.contains(p)).collect();
    if !missing.is_empty() {
        let listed: Vec<String> = missing
            .iter()
            .take(MAX_LISTED_GAPS)
            .map(|p| format!("#{}", p))
            .collect();
        let mut line = format!("Missing volumes: {}", listed.join(", "));
        if missing.len() > MAX_LISTED_GAPS {
            line.push_str(&format!(" and {} more", missing.len() - MAX_LISTED_GAPS));
        }
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LotKey, MarketStats};
    use chrono::Utc;

    fn skeleton(strategy: Strategy, key: &str, ids: &[&str]) -> LotSkeleton {
        LotSkeleton {
            key: LotKey::new(strategy, key),
            member_item_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn snapshot(key: &LotKey, sold: u32, sold_median: Option<f64>, active_median: Option<f64>) -> MarketSnapshot {
        MarketSnapshot::from_stats(
            key.clone(),
            MarketStats {
                active_count: 10,
                active_median_price: active_median,
                sold_count: sold,
                sold_median_price: sold_median,
            },
            Utc::now(),
        )
    }

    fn authored(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| Item::new(i.to_string(), 4.0).with_author("Ann Leckie"))
            .collect()
    }

    #[test]
    fn test_blended_value_scales_with_members() {
        let items = authored(3);
        let members: Vec<&Item> = items.iter().collect();
        let sk = skeleton(Strategy::ByAuthor, "ann leckie", &["0", "1", "2"]);
        let snap = snapshot(&sk.key, 12, Some(10.0), Some(20.0));

        let lot = LotScorer::default().score(&sk, &members, Some(snap));

        // 0.65 * 10 + 0.35 * 20 = 13.50 per item
        assert_eq!(lot.estimated_value, 40.5);
        assert_eq!(lot.confidence, Confidence::High);
        assert_eq!(lot.name, "Ann Leckie Collection");
    }

    #[test]
    fn test_no_snapshot_falls_back_to_item_sum() {
        let items = authored(3);
        let members: Vec<&Item> = items.iter().collect();
        let sk = skeleton(Strategy::ByAuthor, "ann leckie", &["0", "1", "2"]);

        let lot = LotScorer::default().score(&sk, &members, None);

        assert_eq!(lot.estimated_value, 12.0);
        assert_eq!(lot.confidence, Confidence::Low);
        assert!(lot
            .justification
            .iter()
            .any(|l| l.contains("Market data unavailable")));
    }

    #[test]
    fn test_empty_comps_are_low_confidence() {
        let items = authored(3);
        let members: Vec<&Item> = items.iter().collect();
        let sk = skeleton(Strategy::ByAuthor, "ann leckie", &["0", "1", "2"]);
        let snap = snapshot(&sk.key, 0, None, None);

        let lot = LotScorer::default().score(&sk, &members, Some(snap));
        assert_eq!(lot.estimated_value, 12.0);
        assert_eq!(lot.confidence, Confidence::Low);
    }

    #[test]
    fn test_stale_snapshot_caps_at_medium() {
        let items = authored(3);
        let members: Vec<&Item> = items.iter().collect();
        let sk = skeleton(Strategy::ByAuthor, "ann leckie", &["0", "1", "2"]);
        let snap = snapshot(&sk.key, 50, Some(10.0), None).into_stale();

        let lot = LotScorer::default().score(&sk, &members, Some(snap));
        assert_eq!(lot.confidence, Confidence::Medium);
        assert!(lot.is_stale());
        assert!(lot.justification.iter().any(|l| l.contains("stale")));
    }

    #[test]
    fn test_thin_sample_is_medium() {
        let scorer = LotScorer::default();
        let key = LotKey::new(Strategy::ByTheme, "horror");
        assert_eq!(
            scorer.confidence(Some(&snapshot(&key, 2, Some(5.0), None)), true),
            Confidence::Medium
        );
        assert_eq!(
            scorer.confidence(Some(&snapshot(&key, 0, None, Some(5.0))), true),
            Confidence::Low
        );
    }

    #[test]
    fn test_series_completeness_lines() {
        let items: Vec<Item> = [1, 3, 4, 7]
            .iter()
            .map(|p| Item::new(p.to_string(), 2.0).with_series("Saga", Some(*p)))
            .collect();
        let members: Vec<&Item> = items.iter().collect();
        let sk = skeleton(Strategy::BySeries, "saga", &["1", "3", "4", "7"]);

        let lot = LotScorer::default().score(&sk, &members, None);

        assert_eq!(lot.name, "Saga Series");
        assert!(lot.justification.contains(&"series 4/7 complete".to_string()));
        assert!(lot
            .justification
            .contains(&"Missing volumes: #2, #5, #6".to_string()));
    }

    #[test]
    fn test_justification_does_not_change_value() {
        let scorer = LotScorer::default();
        let with_positions: Vec<Item> = (1..=2)
            .map(|p| Item::new(p.to_string(), 3.0).with_series("Saga", Some(p)))
            .collect();
        let without: Vec<Item> = (1..=2)
            .map(|p| Item::new(p.to_string(), 3.0).with_series("Saga", None))
            .collect();
        let sk = skeleton(Strategy::BySeries, "saga", &["1", "2"]);

        let a = scorer.score(&sk, &with_positions.iter().collect::<Vec<_>>(), None);
        let b = scorer.score(&sk, &without.iter().collect::<Vec<_>>(), None);

        assert_eq!(a.estimated_value, b.estimated_value);
        assert_eq!(a.confidence, b.confidence);
        assert_ne!(a.justification, b.justification);
    }

    #[test]
    fn test_lot_shape_lines_do_not_change_value() {
        let scorer = LotScorer::default();
        let hardcovers: Vec<Item> = (0..3)
            .map(|i| {
                Item::new(i.to_string(), 4.0)
                    .with_author("Ann Leckie")
                    .with_binding("Hardcover", Some(400))
            })
            .collect();
        let paperbacks: Vec<Item> = (0..3)
            .map(|i| {
                Item::new(i.to_string(), 4.0)
                    .with_author("Ann Leckie")
                    .with_binding("Paperback", Some(400))
            })
            .collect();
        let sk = skeleton(Strategy::ByAuthor, "ann leckie", &["0", "1", "2"]);
        let snap = snapshot(&sk.key, 6, Some(10.0), Some(20.0));

        let heavy = scorer.score(&sk, &hardcovers.iter().collect::<Vec<_>>(), Some(snap.clone()));
        let light = scorer.score(&sk, &paperbacks.iter().collect::<Vec<_>>(), Some(snap));

        assert_eq!(heavy.estimated_value, light.estimated_value);
        assert_eq!(heavy.confidence, light.confidence);
        assert!(heavy.justification.iter().any(|l| l.starts_with("Est. shipping 3.0 lb")));
        assert!(light.justification.iter().any(|l| l.starts_with("Est. shipping 1.5 lb")));
        for lot in [&heavy, &light] {
            assert!(lot.justification.contains(&"Size 3 (bonus 1.0)".to_string()));
            assert!(lot.justification.contains(&"Cohesion 0.7 (single author)".to_string()));
            // medians 10 and 20 spread 10 over a midpoint of 15
            assert!(lot
                .justification
                .contains(&"Price consistency 0.33 (active vs sold median)".to_string()));
        }
    }

    #[test]
    fn test_size_bonus_bands() {
        assert_eq!(size_bonus(1), 0.5);
        assert_eq!(size_bonus(2), 0.8);
        assert_eq!(size_bonus(5), 1.0);
        assert_eq!(size_bonus(12), 0.8);
        assert_eq!(size_bonus(20), 0.6);
    }

    #[test]
    fn test_display_name_prefers_common_spelling() {
        let items = vec![
            Item::new("1", 1.0).with_tag("cozy mystery"),
            Item::new("2", 1.0).with_tag("Cozy Mystery"),
            Item::new("3", 1.0).with_tag("cozy mystery"),
        ];
        let members: Vec<&Item> = items.iter().collect();
        let sk = skeleton(Strategy::ByTheme, "cozy mystery", &["1", "2", "3"]);
        assert_eq!(display_name(&sk, &members), "Cozy Mystery Books");
    }

    #[test]
    fn test_most_common_breaks_ties_lexicographically() {
        let values = ["b", "a", "b", "a"];
        assert_eq!(most_common(values.into_iter()), Some("a".to_string()));
    }

    #[test]
    fn test_rank_lots() {
        let scorer = LotScorer::default();
        let items = authored(3);
        let members: Vec<&Item> = items.iter().collect();
        let low = scorer.score(&skeleton(Strategy::ByAuthor, "b", &["0", "1", "2"]), &members, None);
        let high_key = LotKey::new(Strategy::ByAuthor, "a");
        let high = scorer.score(
            &skeleton(Strategy::ByAuthor, "a", &["0", "1", "2"]),
            &members,
            Some(snapshot(&high_key, 9, Some(1.0), None)),
        );

        let mut lots = vec![low.clone(), high.clone()];
        rank_lots(&mut lots);
        assert_eq!(lots[0].key(), high.key());
    }
}
