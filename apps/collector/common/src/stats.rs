//! Summary statistics over a collected dataset.

use crate::ChatEvent;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Users by event count, most active first, ties broken by name
pub fn top_users(events: &[ChatEvent], top: usize, exclude: Option<&str>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for event in events {
        if exclude.is_some_and(|login| event.user.eq_ignore_ascii_case(login)) {
            continue;
        }
        *counts.entry(event.user.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(user, count)| (user.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top);
    ranked
}

pub fn daily_counts(events: &[ChatEvent]) -> BTreeMap<NaiveDate, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.sent.date()).or_default() += 1;
    }
    counts
}

/// Events per second of observed broadcast time.
///
/// Observed time is the first-to-last span of each calendar day, summed.
/// `None` when no span could be observed.
pub fn moment_rate(events: &[ChatEvent]) -> Option<f64> {
    let mut spans: BTreeMap<NaiveDate, (chrono::NaiveDateTime, chrono::NaiveDateTime)> =
        BTreeMap::new();
    for event in events {
        spans
            .entry(event.sent.date())
            .and_modify(|(first, last)| {
                *first = (*first).min(event.sent);
                *last = (*last).max(event.sent);
            })
            .or_insert((event.sent, event.sent));
    }

    let observed: i64 = spans
        .values()
        .map(|(first, last)| (*last - *first).num_seconds())
        .sum();
    (observed > 0).then(|| events.len() as f64 / observed as f64)
}

/// Poisson mean for a stream of `hours` at `rate` events per second
pub fn expected_mu(rate: f64, hours: f64) -> f64 {
    rate * hours * 3600.0
}

fn ln_factorial(k: u64) -> f64 {
    (2..=k).map(|i| (i as f64).ln()).sum()
}

/// P(X = k)
pub fn poisson_pmf(k: u64, mu: f64) -> f64 {
    if mu <= 0.0 {
        return if k == 0 { 1.0 } else { 0.0 };
    }
    (k as f64 * mu.ln() - mu - ln_factorial(k)).exp()
}

/// P(X <= k)
pub fn poisson_cdf(k: u64, mu: f64) -> f64 {
    (0..=k).map(|i| poisson_pmf(i, mu)).sum::<f64>().min(1.0)
}
