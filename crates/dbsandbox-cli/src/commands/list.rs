use super::{colorize_type, describe, json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use dbsandbox_core::Deployer;
use dbsandbox_store::{CatalogDivergence, SandboxItem};

fn ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn divergence_json(d: &CatalogDivergence) -> serde_json::Value {
    serde_json::json!({
        "destination": d.key.to_string(),
        "catalog_ports": d.catalog_ports,
        "description_ports": d.description_ports,
    })
}

fn print_table(items: &[SandboxItem]) {
    println!(
        "{:<28} {:<18} {:<8} {:<10} PORTS",
        "NAME", "TYPE", "FLAVOR", "VERSION"
    );
    for item in items {
        let name = item
            .destination
            .file_name()
            .map_or_else(|| item.destination.display().to_string(), |n| {
                n.to_string_lossy().into_owned()
            });
        // escape codes would throw off {:<18}
        let pad = " ".repeat(18usize.saturating_sub(item.sb_type.as_str().len()));
        println!(
            "{:<28} {}{} {:<8} {:<10} {}",
            name,
            colorize_type(item.sb_type),
            pad,
            item.flavor,
            item.version,
            ports(&item.port)
        );
    }
}

pub fn run(deployer: &Deployer, check: bool, json: bool) -> Result<u8, String> {
    let items = deployer.list().map_err(|e| describe(&e))?;
    let divergent = if check {
        deployer.divergent_entries().map_err(|e| describe(&e))?
    } else {
        Vec::new()
    };

    if json {
        if check {
            let payload = serde_json::json!({
                "sandboxes": items,
                "divergent": divergent.iter().map(divergence_json).collect::<Vec<_>>(),
            });
            println!("{}", json_pretty(&payload)?);
        } else {
            println!("{}", json_pretty(&items)?);
        }
    } else {
        if items.is_empty() {
            println!("no sandboxes found");
        } else {
            print_table(&items);
        }
        for d in &divergent {
            let on_disk = d.description_ports.as_ref().map_or_else(
                || "no description".to_owned(),
                |p| ports(&p.iter().copied().collect::<Vec<_>>()),
            );
            println!(
                "diverged: {} catalog [{}] on disk [{}]",
                d.key,
                ports(&d.catalog_ports.iter().copied().collect::<Vec<_>>()),
                on_disk
            );
        }
    }

    if divergent.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_comma_separated() {
        assert_eq!(ports(&[8030, 18_030]), "8030,18030");
        assert_eq!(ports(&[]), "");
    }
}
