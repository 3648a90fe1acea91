use super::{
    colorize_phase, json_pretty, lock_build_root, name_refs, spin_fail, spin_ok, spinner,
    Settings, EXIT_SUCCESS,
};
use prereq_core::Registry;
use prereq_runtime::BuildEnv;

pub fn run(
    settings: &Settings,
    names: &[String],
    headers_only: bool,
    json_output: bool,
) -> Result<u8, String> {
    let mut registry = settings.registry()?;
    let _lock = if settings.options.is_dry() {
        None
    } else {
        Some(lock_build_root(registry.layout())?)
    };

    let targets: Vec<String> = if names.is_empty() {
        registry.prebuild_names().to_vec()
    } else {
        names.to_vec()
    };
    if targets.is_empty() {
        return Err("nothing to require: no components given and no prebuild list".to_owned());
    }

    let pb = (!json_output).then(|| spinner(&format!("resolving {}", targets.join(", "))));
    let mut env = registry.system_env().clone();
    let refs = name_refs(&targets);
    let result = if headers_only {
        registry.require_headers(&mut env, &refs)
    } else {
        registry.require(&mut env, &refs)
    };

    let built = match result {
        Ok(built) => built,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "resolution failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(pb) = &pb {
        let msg = if built {
            "components built"
        } else {
            "components up to date"
        };
        spin_ok(pb, msg);
    }

    if json_output {
        println!("{}", json_pretty(&report(&registry, built, &env))?);
    } else {
        print_table(&registry);
    }
    Ok(EXIT_SUCCESS)
}

fn resolved_names(registry: &Registry) -> Vec<&str> {
    registry
        .defined_names()
        .into_iter()
        .filter(|name| registry.is_resolved(name))
        .collect()
}

fn print_table(registry: &Registry) {
    println!("{:<16} {:<12} PREFIX", "NAME", "PHASE");
    for name in resolved_names(registry) {
        let Ok(component) = registry.component(name) else {
            continue;
        };
        let prefix = registry
            .prefix_of(name)
            .map_or_else(|| "-".to_owned(), |p| p.display().to_string());
        println!(
            "{name:<16} {:<12} {prefix}",
            colorize_phase(component.phase().as_str())
        );
    }
}

fn report(registry: &Registry, built: bool, env: &BuildEnv) -> serde_json::Value {
    let components: Vec<serde_json::Value> = resolved_names(registry)
        .into_iter()
        .filter_map(|name| {
            let component = registry.component(name).ok()?;
            Some(serde_json::json!({
                "name": name,
                "phase": component.phase(),
                "prefix": registry.prefix_of(name),
                "built": component.state().built,
            }))
        })
        .collect();
    serde_json::json!({
        "built": built,
        "components": components,
        "env": {
            "include_paths": env.include_paths(),
            "lib_paths": env.lib_paths(),
            "rpaths": env.rpaths(),
            "defines": env.defines(),
            "libs": env.libs(),
            "link_flags": env.link_flags(),
            "vars": env.vars(),
        },
    })
}
