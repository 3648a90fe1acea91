//! Definition files, pin configuration, checksums, and command templates for prereq.
//!
//! This crate defines the schema layer: the TOML component definitions file
//! (`DefinitionsFile` / `ComponentDef`), the section-keyed pin configuration
//! (`PinConfig`) that binds components to branches, commits, patches and extra
//! config files, the `Checksum` type used by archive sources, and the strict
//! placeholder substitution used to expand build-step commands.

pub mod checksum;
pub mod definitions;
pub mod pins;
pub mod template;

pub use checksum::{Checksum, ChecksumAlgorithm};
pub use definitions::{
    parse_definitions_file, parse_definitions_str, prefix_var, validate_component_name,
    ArchiveSpec, ComponentDef, DefinitionsFile, GitSpec, RetrievalSpec,
};
pub use pins::{parse_pins_str, PatchLocation, PatchRef, PinConfig, PinSection};
pub use template::{substitute, substitute_all, TemplateError, TemplateVars};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid component name: '{0}'")]
    InvalidName(String),
    #[error("components '{first}' and '{second}' would both publish {var}")]
    PrefixCollision {
        first: String,
        second: String,
        var: String,
    },
    #[error("component '{0}' declares both a git and an archive source")]
    ConflictingSources(String),
    #[error("component '{component}': {field} must not be empty")]
    EmptyField {
        component: String,
        field: &'static str,
    },
    #[error("component '{0}' requires itself")]
    SelfRequirement(String),
    #[error("component '{component}' lists requirement '{requirement}' more than once")]
    DuplicateRequirement {
        component: String,
        requirement: String,
    },
    #[error("invalid checksum '{value}': {reason}")]
    InvalidChecksum { value: String, reason: String },
    #[error("unknown pin section: '{0}'")]
    UnknownSection(String),
    #[error("invalid patch entry '{0}'")]
    InvalidPatch(String),
}
