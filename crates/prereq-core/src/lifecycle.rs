use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a component is in its resolution for the current run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Undefined,
    Configuring,
    Installed,
    NeedsBuild,
    Building,
    Verified,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Undefined => "undefined",
            Phase::Configuring => "configuring",
            Phase::Installed => "installed",
            Phase::NeedsBuild => "needs-build",
            Phase::Building => "building",
            Phase::Verified => "verified",
            Phase::Failed => "failed",
        }
    }

    /// No further transitions happen in this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Installed | Phase::Verified | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate_transition(component: &str, from: Phase, to: Phase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (Phase::Undefined, Phase::Configuring | Phase::Installed)
            | (Phase::Configuring, Phase::Installed | Phase::NeedsBuild)
            | (Phase::NeedsBuild, Phase::Building)
            | (Phase::Building, Phase::Verified)
    ) || (to == Phase::Failed && from != Phase::Failed);

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            component: component.to_owned(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition("c", Phase::Undefined, Phase::Configuring).is_ok());
        assert!(validate_transition("c", Phase::Undefined, Phase::Installed).is_ok());
        assert!(validate_transition("c", Phase::Configuring, Phase::Installed).is_ok());
        assert!(validate_transition("c", Phase::Configuring, Phase::NeedsBuild).is_ok());
        assert!(validate_transition("c", Phase::NeedsBuild, Phase::Building).is_ok());
        assert!(validate_transition("c", Phase::Building, Phase::Verified).is_ok());
        assert!(validate_transition("c", Phase::Building, Phase::Failed).is_ok());
        assert!(validate_transition("c", Phase::Configuring, Phase::Failed).is_ok());
        assert!(validate_transition("c", Phase::NeedsBuild, Phase::Failed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition("c", Phase::Undefined, Phase::Building).is_err());
        assert!(validate_transition("c", Phase::Configuring, Phase::Verified).is_err());
        assert!(validate_transition("c", Phase::Installed, Phase::Building).is_err());
        assert!(validate_transition("c", Phase::Verified, Phase::NeedsBuild).is_err());
        assert!(validate_transition("c", Phase::Failed, Phase::Failed).is_err());
        assert!(validate_transition("c", Phase::Failed, Phase::Configuring).is_err());
    }

    #[test]
    fn error_names_component_and_phases() {
        let err = validate_transition("ofi", Phase::Verified, Phase::Building).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ofi"));
        assert!(msg.contains("verified -> building"));
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Installed.is_terminal());
        assert!(Phase::Verified.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Building.is_terminal());
        assert_eq!(Phase::default(), Phase::Undefined);
    }
}
