use super::{colorize_phase, json_pretty, Settings, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Availability {
    name: String,
    available: bool,
    included: bool,
    phase: String,
    prefix: Option<String>,
    error: Option<String>,
}

pub fn run(settings: &Settings, names: &[String], json_output: bool) -> Result<u8, String> {
    let mut registry = settings.read_only().registry()?;
    let targets: Vec<String> = if names.is_empty() {
        registry
            .defined_names()
            .into_iter()
            .map(str::to_owned)
            .collect()
    } else {
        names.to_vec()
    };

    let mut results = Vec::with_capacity(targets.len());
    for name in &targets {
        let available = registry
            .check_available(&[name.as_str()])
            .map_err(|e| e.to_string())?;
        let component = registry.component(name).map_err(|e| e.to_string())?;
        results.push(Availability {
            name: name.clone(),
            available,
            included: registry.included(&[name.as_str()]),
            phase: component.phase().to_string(),
            prefix: registry.prefix_of(name).map(|p| p.display().to_string()),
            error: registry.error_of(name).map(|e| e.root_cause().to_string()),
        });
    }

    let all_available = results.iter().all(|r| r.available);
    if json_output {
        println!("{}", json_pretty(&results)?);
    } else {
        println!("{:<16} {:<10} {:<12} DETAIL", "NAME", "STATUS", "PHASE");
        for r in &results {
            let status = if r.available { "ok" } else { "missing" };
            let detail = match (&r.error, &r.prefix) {
                (Some(err), _) => err.clone(),
                (None, Some(prefix)) => prefix.clone(),
                (None, None) => String::new(),
            };
            let detail = if r.included {
                detail
            } else {
                format!("(not included) {detail}")
            };
            println!(
                "{:<16} {status:<10} {:<12} {detail}",
                r.name,
                colorize_phase(&r.phase)
            );
        }
    }
    Ok(if all_available {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
