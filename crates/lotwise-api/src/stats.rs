// Price statistics over noisy listing data

/// Share of prices trimmed from each end before taking a median
pub const DEFAULT_TRIM: f64 = 0.10;

/// Sort the usable prices and trim both tails
///
/// Non-finite and non-positive prices are dropped. Lists shorter than three
/// are returned sorted but untrimmed; at least one price is always trimmed
/// from each side otherwise.
pub fn winsorize(values: &[f64], trim: f64) -> Vec<f64> {
    let mut xs: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    xs.sort_by(|a, b| a.total_cmp(b));

    if xs.len() < 3 {
        return xs;
    }

    let k = ((xs.len() as f64 * trim) as usize).max(1);
    if 2 * k >= xs.len() {
        return xs;
    }
    xs[k..xs.len() - k].to_vec()
}

/// Median of the trimmed prices, rounded to cents
pub fn robust_median(values: &[f64]) -> Option<f64> {
    let xs = winsorize(values, DEFAULT_TRIM);
    if xs.is_empty() {
        return None;
    }

    let mid = xs.len() / 2;
    let median = if xs.len() % 2 == 0 {
        (xs[mid - 1] + xs[mid]) / 2.0
    } else {
        xs[mid]
    };
    Some(round_cents(median))
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
