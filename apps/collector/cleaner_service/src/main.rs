use chrono::Duration;
use common::clean::clean;
use common::config::BatchConfig;
use common::dataset::{Dataset, DatasetSink};
use common::logger;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();

    let config = BatchConfig::new()?;
    let sink = DatasetSink::new(&config.data_dir);

    let raw = sink.load(&config.raw_dataset)?;
    info!(
        "Cleaning {} rows from {} (keyword '{}', {}s window)",
        raw.len(),
        sink.path_for(&config.raw_dataset).display(),
        config.clean_keyword,
        config.clean_window_secs
    );

    let kept = clean(
        raw.events(),
        &config.clean_keyword,
        Duration::seconds(config.clean_window_secs as i64),
    );
    let cleaned = Dataset::from_events(kept);
    let path = sink.save(&cleaned, &config.clean_dataset)?;

    info!("Wrote {} rows to {}", cleaned.len(), path.display());
    Ok(())
}
