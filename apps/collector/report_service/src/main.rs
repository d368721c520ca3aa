use common::config::BatchConfig;
use common::dataset::DatasetSink;
use common::logger;
use common::stats::{daily_counts, expected_mu, moment_rate, poisson_cdf, poisson_pmf, top_users};
use tracing::{info, warn};

/// Moment counts tabulated per stream length
const MOMENT_CHECKPOINTS: [u64; 6] = [0, 5, 10, 20, 30, 50];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();

    let config = BatchConfig::new()?;
    let sink = DatasetSink::new(&config.data_dir);
    let raw = sink.load(&config.raw_dataset)?;
    let clean = sink.load(&config.clean_dataset)?;

    info!(
        "Report over {} raw and {} cleaned rows",
        raw.len(),
        clean.len()
    );

    for (rank, (user, count)) in top_users(raw.events(), config.top_users, config.login.as_deref())
        .iter()
        .enumerate()
    {
        info!("#{:<3} {:<25} {}", rank + 1, user, count);
    }

    for (day, count) in daily_counts(clean.events()) {
        info!("{} {} ({})", day, count, day.format("%a"));
    }

    let Some(rate) = moment_rate(clean.events()) else {
        warn!("Not enough cleaned rows to estimate a rate");
        return Ok(());
    };
    info!("{:.9} moments per second of broadcast", rate);

    for hours in 1..=10u32 {
        let mu = expected_mu(rate, hours as f64);
        let row: Vec<String> = MOMENT_CHECKPOINTS
            .iter()
            .map(|&k| {
                format!(
                    "k={} pmf={:.4} cdf={:.4}",
                    k,
                    poisson_pmf(k, mu),
                    poisson_cdf(k, mu)
                )
            })
            .collect();
        info!("{:>2}h mu={:.2} | {}", hours, mu, row.join(" | "));
    }

    Ok(())
}
