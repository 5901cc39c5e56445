use super::{describe, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use dbsandbox_core::Deployer;

pub fn run(deployer: &Deployer, sandbox: &str, json: bool) -> Result<u8, String> {
    let path = deployer.sandbox_path(sandbox);
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("deleting {}...", path.display())))
    };
    let freed = match deployer.delete_sandbox(sandbox) {
        Ok(freed) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("deleted {}", path.display()));
            }
            freed
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "delete failed");
            }
            return Err(describe(&e));
        }
    };

    if json {
        let payload = serde_json::json!({
            "sandbox": path,
            "freed_ports": freed,
            "status": "deleted"
        });
        println!("{}", json_pretty(&payload)?);
    } else if !freed.is_empty() {
        let list: Vec<String> = freed.iter().map(ToString::to_string).collect();
        println!("freed ports: {}", list.join(", "));
    }
    Ok(EXIT_SUCCESS)
}

pub fn binaries(deployer: &Deployer, version: &str, json: bool) -> Result<u8, String> {
    let removed = deployer.delete_binaries(version).map_err(|e| describe(&e))?;
    if json {
        let payload = serde_json::json!({
            "basedir": removed,
            "status": "deleted"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("removed {}", removed.display());
    }
    Ok(EXIT_SUCCESS)
}
