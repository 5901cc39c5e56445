use super::{json_pretty, EXIT_SUCCESS};
use dbsandbox_schema::{CapabilityMatrix, Flavor, VersionTriple};

pub fn run(flavor: Flavor, version: Option<&str>, json: bool) -> Result<u8, String> {
    let matrix = CapabilityMatrix::builtin();
    let at = version
        .map(VersionTriple::parse)
        .transpose()
        .map_err(|e| format!("validation: {e}"))?;

    let features: Vec<_> = matrix
        .features(flavor)
        .filter(|(_, cap)| at.map_or(true, |v| cap.contains(v)))
        .collect();

    if json {
        let rows: Vec<_> = features
            .iter()
            .map(|(name, cap)| {
                serde_json::json!({
                    "feature": name,
                    "description": cap.description,
                    "since": cap.since.to_string(),
                    "until": cap.until.map(|u| u.to_string()),
                })
            })
            .collect();
        let payload = serde_json::json!({
            "flavor": flavor,
            "version": at.map(|v| v.to_string()),
            "features": rows,
        });
        println!("{}", json_pretty(&payload)?);
    } else if features.is_empty() {
        println!("no features for {flavor}");
    } else {
        println!("{:<24} {:<10} {:<10} DESCRIPTION", "FEATURE", "SINCE", "UNTIL");
        for (name, cap) in &features {
            let until = cap.until.map_or_else(|| "-".to_owned(), |u| u.to_string());
            println!(
                "{:<24} {:<10} {:<10} {}",
                name, cap.since, until, cap.description
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
