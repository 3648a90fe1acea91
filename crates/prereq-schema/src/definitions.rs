use crate::{Checksum, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Top-level component definitions file (`prereq.toml`).
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DefinitionsFile {
    /// Components built unconditionally by `prereq require` with no names.
    #[serde(default)]
    pub prebuild: Vec<String>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GitSpec {
    pub url: String,
    #[serde(default)]
    pub submodules: bool,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArchiveSpec {
    pub url: String,
    pub checksum: Checksum,
}

/// Where a component's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalSpec {
    Git(GitSpec),
    Archive(ArchiveSpec),
}

/// Static configuration of one external dependency.
///
/// A component with neither `git` nor `archive` is expected to be present on
/// the system already; it is verified in place and never built.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComponentDef {
    #[serde(default)]
    pub git: Option<GitSpec>,
    #[serde(default)]
    pub archive: Option<ArchiveSpec>,
    /// Build steps, each an argv list with `$NAME` placeholders.
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub libs: Vec<String>,
    /// Alternate compiler used only for the library link check.
    #[serde(default)]
    pub libs_cc: Option<String>,
    #[serde(default)]
    pub functions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub progs: Vec<String>,
    #[serde(default)]
    pub pkgconfig: Option<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    /// System libraries needed to run the build commands themselves.
    #[serde(default)]
    pub required_libs: Vec<String>,
    /// System programs needed to run the build commands themselves.
    #[serde(default)]
    pub required_progs: Vec<String>,
    /// OS package suggested when verification of an installed copy fails.
    #[serde(default)]
    pub package: Option<String>,
    /// Provided by the OS package manager rather than by this project.
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub out_of_src_build: bool,
    /// Install subdirectories whose shared objects get their rpath rewritten.
    #[serde(default)]
    pub patch_rpath: Vec<String>,
    #[serde(default)]
    pub extra_lib_path: Vec<String>,
    #[serde(default)]
    pub extra_include_path: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

impl ComponentDef {
    pub fn source(&self) -> Option<RetrievalSpec> {
        match (&self.git, &self.archive) {
            (Some(git), _) => Some(RetrievalSpec::Git(git.clone())),
            (None, Some(archive)) => Some(RetrievalSpec::Archive(archive.clone())),
            (None, None) => None,
        }
    }

    #[inline]
    pub fn has_source(&self) -> bool {
        self.git.is_some() || self.archive.is_some()
    }

    /// Programs that must exist before the build can start, including
    /// `patchelf` when any install directory is rpath-patched.
    pub fn system_programs(&self) -> Vec<String> {
        let mut progs = self.required_progs.clone();
        if !self.patch_rpath.is_empty() && !progs.iter().any(|p| p == "patchelf") {
            progs.push("patchelf".to_owned());
        }
        progs
    }

    pub fn validate(&self, name: &str) -> Result<(), SchemaError> {
        validate_component_name(name)?;

        if self.git.is_some() && self.archive.is_some() {
            return Err(SchemaError::ConflictingSources(name.to_owned()));
        }
        if let Some(git) = &self.git {
            if git.url.trim().is_empty() {
                return Err(SchemaError::EmptyField {
                    component: name.to_owned(),
                    field: "git.url",
                });
            }
        }
        if let Some(archive) = &self.archive {
            if archive.url.trim().is_empty() {
                return Err(SchemaError::EmptyField {
                    component: name.to_owned(),
                    field: "archive.url",
                });
            }
        }
        if self.commands.iter().any(Vec::is_empty) {
            return Err(SchemaError::EmptyField {
                component: name.to_owned(),
                field: "commands entry",
            });
        }

        let mut seen = BTreeSet::new();
        for req in &self.requires {
            if req == name {
                return Err(SchemaError::SelfRequirement(name.to_owned()));
            }
            if !seen.insert(req.as_str()) {
                return Err(SchemaError::DuplicateRequirement {
                    component: name.to_owned(),
                    requirement: req.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn validate_component_name(name: &str) -> Result<(), SchemaError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_owned()))
    }
}

/// Name of the variable that publishes a component's install prefix,
/// e.g. `isal-crypto` becomes `ISAL_CRYPTO_PREFIX`.
pub fn prefix_var(name: &str) -> String {
    let mut var: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    var.push_str("_PREFIX");
    var
}

pub fn parse_definitions_str(input: &str) -> Result<DefinitionsFile, SchemaError> {
    let file: DefinitionsFile = toml::from_str(input)?;
    let mut published: BTreeMap<String, &str> = BTreeMap::new();
    for (name, def) in &file.components {
        def.validate(name)?;
        let var = prefix_var(name);
        if let Some(first) = published.get(&var) {
            return Err(SchemaError::PrefixCollision {
                first: (*first).to_owned(),
                second: name.clone(),
                var,
            });
        }
        published.insert(var, name);
    }
    for name in &file.prebuild {
        validate_component_name(name)?;
    }
    Ok(file)
}

pub fn parse_definitions_file(path: &Path) -> Result<DefinitionsFile, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_definitions_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChecksumAlgorithm;

    const SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn parses_git_and_archive_components() {
        let input = format!(
            r#"
prebuild = ["mercury"]

[components.mercury]
git = {{ url = "https://github.com/mercury-hpc/mercury.git", submodules = true }}
requires = ["ofi"]
commands = [["cmake", "-DCMAKE_INSTALL_PREFIX=$MERCURY_PREFIX", "$SRC_DIR"], ["make", "install"]]
libs = ["mercury"]
headers = ["mercury.h"]
out_of_src_build = true
patch_rpath = ["lib"]

[components.ofi]
archive = {{ url = "https://example.com/libfabric-1.15.tar.gz", checksum = "sha256:{SHA}" }}
commands = [["./configure", "--prefix=$OFI_PREFIX"], ["make", "install"]]
libs = ["fabric"]

[components.uuid]
headers = ["uuid/uuid.h"]
libs = ["uuid"]
package = "libuuid-devel"
system = true
"#
        );
        let file = parse_definitions_str(&input).unwrap();
        assert_eq!(file.prebuild, vec!["mercury"]);
        assert_eq!(file.components.len(), 3);

        let mercury = &file.components["mercury"];
        match mercury.source() {
            Some(RetrievalSpec::Git(git)) => {
                assert!(git.submodules);
                assert!(git.branch.is_none());
            }
            other => panic!("expected git source, got {other:?}"),
        }
        assert_eq!(mercury.commands.len(), 2);
        assert!(mercury.out_of_src_build);

        let ofi = &file.components["ofi"];
        match ofi.source() {
            Some(RetrievalSpec::Archive(a)) => {
                assert_eq!(a.checksum.algorithm(), ChecksumAlgorithm::Sha256);
            }
            other => panic!("expected archive source, got {other:?}"),
        }

        let uuid = &file.components["uuid"];
        assert!(uuid.source().is_none());
        assert!(uuid.system);
        assert_eq!(uuid.package.as_deref(), Some("libuuid-devel"));
    }

    #[test]
    fn reject_unknown_field() {
        let input = r#"
[components.foo]
colour = "blue"
"#;
        assert!(parse_definitions_str(input).is_err());
    }

    #[test]
    fn reject_both_sources() {
        let input = format!(
            r#"
[components.foo]
git = {{ url = "https://example.com/foo.git" }}
archive = {{ url = "https://example.com/foo.tar.gz", checksum = "{SHA}" }}
"#
        );
        let err = parse_definitions_str(&input).unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingSources(n) if n == "foo"));
    }

    #[test]
    fn reject_bad_checksum() {
        let input = r#"
[components.foo]
archive = { url = "https://example.com/foo.tar.gz", checksum = "sha256:1234" }
"#;
        assert!(parse_definitions_str(input).is_err());
    }

    #[test]
    fn reject_self_requirement() {
        let input = r#"
[components.foo]
requires = ["foo"]
"#;
        let err = parse_definitions_str(input).unwrap_err();
        assert!(matches!(err, SchemaError::SelfRequirement(_)));
    }

    #[test]
    fn reject_duplicate_requirement() {
        let input = r#"
[components.foo]
requires = ["bar", "bar"]
"#;
        let err = parse_definitions_str(input).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRequirement { .. }));
    }

    #[test]
    fn reject_empty_command() {
        let input = r#"
[components.foo]
commands = [[]]
"#;
        assert!(parse_definitions_str(input).is_err());
    }

    #[test]
    fn component_names_are_checked() {
        assert!(validate_component_name("isal_crypto").is_ok());
        assert!(validate_component_name("spdk-1.2").is_ok());
        assert!(validate_component_name("").is_err());
        assert!(validate_component_name("-leading").is_err());
        assert!(validate_component_name("2fa").is_err());
        assert!(validate_component_name("_hidden").is_err());
        assert!(validate_component_name("has space").is_err());
        assert!(validate_component_name("a/b").is_err());
    }

    #[test]
    fn reject_names_sharing_a_prefix_var() {
        let err = parse_definitions_str(
            r#"
[components.isal-crypto]
progs = ["igzip"]

[components.isal_crypto]
progs = ["igzip"]
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::PrefixCollision { ref first, ref second, ref var }
                if first == "isal-crypto" && second == "isal_crypto" && var == "ISAL_CRYPTO_PREFIX"
        ));
    }

    #[test]
    fn reject_component_with_leading_digit() {
        let err = parse_definitions_str("[components.3rdparty]\nprogs = [\"sh\"]\n").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidName(ref name) if name == "3rdparty"));
    }

    #[test]
    fn prefix_var_uppercases_and_replaces() {
        assert_eq!(prefix_var("ofi"), "OFI_PREFIX");
        assert_eq!(prefix_var("isal-crypto"), "ISAL_CRYPTO_PREFIX");
        assert_eq!(prefix_var("pmdk.v2"), "PMDK_V2_PREFIX");
    }

    #[test]
    fn patchelf_added_when_patching_rpath() {
        let def = ComponentDef {
            patch_rpath: vec!["lib".to_owned()],
            required_progs: vec!["cmake".to_owned()],
            ..ComponentDef::default()
        };
        assert_eq!(def.system_programs(), vec!["cmake", "patchelf"]);

        let plain = ComponentDef::default();
        assert!(plain.system_programs().is_empty());
    }

    #[test]
    fn parse_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prereq.toml");
        fs::write(&path, "[components.zlib]\nlibs = [\"z\"]\n").unwrap();
        let file = parse_definitions_file(&path).unwrap();
        assert_eq!(file.components["zlib"].libs, vec!["z"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = parse_definitions_file(Path::new("/nonexistent/prereq.toml")).unwrap_err();
        assert!(matches!(err, SchemaError::Io(_)));
    }
}
