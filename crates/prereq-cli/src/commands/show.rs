use super::{colorize_phase, json_pretty, Settings, EXIT_SUCCESS};

fn display_path(path: Option<&std::path::Path>) -> String {
    path.map_or_else(|| "-".to_owned(), |p| p.display().to_string())
}

pub fn run(settings: &Settings, name: &str, json_output: bool) -> Result<u8, String> {
    let mut registry = settings.read_only().registry()?;
    let available = registry
        .check_available(&[name])
        .map_err(|e| e.to_string())?;
    let component = registry.component(name).map_err(|e| e.to_string())?;
    let error = registry.error_of(name).map(|e| e.root_cause().to_string());

    if json_output {
        let value = serde_json::json!({
            "name": name,
            "available": available,
            "definition": component.def(),
            "state": component.state(),
            "error": error,
        });
        println!("{}", json_pretty(&value)?);
        return Ok(EXIT_SUCCESS);
    }

    let def = component.def();
    let state = component.state();
    println!("name:      {name}");
    println!("available: {available}");
    println!("phase:     {}", colorize_phase(state.phase.as_str()));
    if let Some(git) = &def.git {
        println!("git:       {}", git.url);
    }
    if let Some(archive) = &def.archive {
        println!("archive:   {} ({})", archive.url, archive.checksum);
    }
    if !def.requires.is_empty() {
        println!("requires:  {}", def.requires.join(", "));
    }
    if !def.libs.is_empty() {
        println!("libs:      {}", def.libs.join(", "));
    }
    if !def.headers.is_empty() {
        println!("headers:   {}", def.headers.join(", "));
    }
    if !def.progs.is_empty() {
        println!("progs:     {}", def.progs.join(", "));
    }
    if let Some(package) = &def.package {
        println!("package:   {package}");
    }
    println!(
        "prefix:    {}",
        display_path(registry.prefix_of(name))
    );
    println!("src:       {}", display_path(state.src_path.as_deref()));
    if let Some(err) = error {
        println!("error:     {err}");
    }
    Ok(EXIT_SUCCESS)
}
