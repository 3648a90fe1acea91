use super::{json_pretty, Settings, EXIT_SUCCESS};
use prereq_schema::{ComponentDef, DefinitionsFile};

fn source_kind(def: &ComponentDef) -> &'static str {
    if def.git.is_some() {
        "git"
    } else if def.archive.is_some() {
        "archive"
    } else {
        "system"
    }
}

fn source_url(def: &ComponentDef) -> Option<&str> {
    def.git
        .as_ref()
        .map(|g| g.url.as_str())
        .or_else(|| def.archive.as_ref().map(|a| a.url.as_str()))
}

fn entries(file: &DefinitionsFile) -> Vec<serde_json::Value> {
    file.components
        .iter()
        .map(|(name, def)| {
            serde_json::json!({
                "name": name,
                "source": source_kind(def),
                "url": source_url(def),
                "requires": def.requires,
                "optional": def.optional,
                "prebuild": file.prebuild.contains(name),
            })
        })
        .collect()
}

pub fn run(settings: &Settings, json_output: bool) -> Result<u8, String> {
    let file = settings.definitions()?;
    if json_output {
        println!("{}", json_pretty(&entries(&file))?);
    } else if file.components.is_empty() {
        println!("no components defined");
    } else {
        println!("{:<16} {:<8} {:<9} REQUIRES", "NAME", "SOURCE", "FLAGS");
        for (name, def) in &file.components {
            let mut flags = Vec::new();
            if file.prebuild.contains(name) {
                flags.push("pre");
            }
            if def.optional {
                flags.push("opt");
            }
            println!(
                "{name:<16} {:<8} {:<9} {}",
                source_kind(def),
                flags.join(","),
                def.requires.join(", ")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
