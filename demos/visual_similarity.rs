use anyhow::Result;
use visual_layer::{Client, EntityType, SearchOperator};

fn main() -> Result<()> {
    // Usage: visual_similarity <dataset-id> <image>...
    let mut args = std::env::args().skip(1);
    let dataset_id = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: visual_similarity <dataset-id> <image>..."))?;
    let anchors: Vec<String> = args.collect();

    let client = Client::from_env()?;
    let dataset = client.dataset(&dataset_id)?;

    // One job per anchor; duplicates across anchors are dropped.
    let rows = dataset.search_by_visual_similarity(
        &anchors,
        EntityType::Images,
        SearchOperator::IsOneOf,
        0.0,
    )?;

    println!("{} similar item(s)", rows.len());
    for r in rows {
        println!("{}\t{}", r.media_id, r.file_name.unwrap_or_default());
    }
    Ok(())
}
