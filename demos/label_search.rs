use anyhow::Result;
use std::time::Duration;
use visual_layer::{Client, EntityType, IssueType, LogConfig, Query, SearchOperator};

fn main() -> Result<()> {
    // Configure credentials via env vars or a `.visuallayerrc` file.
    // Usage: label_search <dataset-id> [label...]
    let mut args = std::env::args().skip(1);
    let dataset_id = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: label_search <dataset-id> [label...]"))?;
    let labels: Vec<String> = args.collect();

    let client = Client::from_env()?.with_log_dispatch(LogConfig::stderr().build()?);
    let dataset = client
        .dataset(&dataset_id)?
        .with_poll_interval(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(120));

    let rows = if labels.is_empty() {
        Query::new()
            .search_by_issues(&[IssueType::Outliers], None, 0.8, 1.0)
            .results(&dataset, EntityType::Images)?
    } else {
        dataset.search_by_labels(labels, EntityType::Images, SearchOperator::IsOneOf)?
    };

    println!("{} row(s)", rows.len());
    for r in &rows {
        println!(
            "{}\t{}\t{}\t{}",
            r.media_id,
            r.media_uri.as_deref().unwrap_or(""),
            r.image_labels,
            r.issues
        );
    }
    Ok(())
}
