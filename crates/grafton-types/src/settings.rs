//! Settings paths.
//!
//! The settings document is one JSON object addressed by slash- or
//! dot-separated paths (`data/maxsize`, `rules.data.read`). Anything may be
//! read, but only the leaves enumerated by [`SettingsPath`] may be written.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Normalize a settings path: `.` becomes `/`, surrounding and repeated
/// separators are dropped.
///
/// ```
/// use grafton_types::normalize_path;
///
/// assert_eq!(normalize_path("rules.data.read"), "rules/data/read");
/// assert_eq!(normalize_path("/data//maxsize/"), "data/maxsize");
/// assert_eq!(normalize_path(""), "");
/// ```
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '.'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Kind of object a rule protects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleTarget {
    Data,
    Graft,
}

/// Action a rule authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Create,
    Read,
    Write,
    Delete,
    Graft,
}

impl RuleTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Graft => "graft",
        }
    }

    /// Actions that carry a rule for this target.
    pub fn actions(self) -> &'static [RuleAction] {
        match self {
            Self::Data => &[
                RuleAction::Create,
                RuleAction::Read,
                RuleAction::Write,
                RuleAction::Delete,
                RuleAction::Graft,
            ],
            Self::Graft => &[RuleAction::Read, RuleAction::Write, RuleAction::Delete],
        }
    }
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Graft => "graft",
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutable settings leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SettingsPath {
    /// `data/maxsize`: largest accepted payload, in bytes.
    MaxSize,
    /// `rules/<target>/<action>`: rule text for one action.
    Rule(RuleTarget, RuleAction),
}

impl SettingsPath {
    /// Every writable path.
    pub fn all() -> Vec<SettingsPath> {
        let mut paths = vec![Self::MaxSize];
        for target in [RuleTarget::Data, RuleTarget::Graft] {
            paths.extend(target.actions().iter().map(|a| Self::Rule(target, *a)));
        }
        paths
    }

    pub fn rule(target: RuleTarget, action: RuleAction) -> Self {
        Self::Rule(target, action)
    }
}

impl fmt::Display for SettingsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxSize => f.write_str("data/maxsize"),
            Self::Rule(target, action) => write!(f, "rules/{target}/{action}"),
        }
    }
}

impl FromStr for SettingsPath {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_path(s);
        Self::all()
            .into_iter()
            .find(|p| p.to_string() == normalized)
            .ok_or(TypeError::ImmutablePath(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn allow_list_has_nine_paths() {
        let all = SettingsPath::all();
        assert_eq!(all.len(), 9);
        assert!(all.contains(&SettingsPath::Rule(RuleTarget::Data, RuleAction::Graft)));
        assert!(!all.contains(&SettingsPath::Rule(RuleTarget::Graft, RuleAction::Create)));
    }

    #[test]
    fn parses_either_separator() {
        assert_eq!("data/maxsize".parse::<SettingsPath>().unwrap(), SettingsPath::MaxSize);
        assert_eq!(
            "rules.graft.delete".parse::<SettingsPath>().unwrap(),
            SettingsPath::Rule(RuleTarget::Graft, RuleAction::Delete)
        );
    }

    #[test]
    fn rejects_paths_outside_allow_list() {
        assert!("data".parse::<SettingsPath>().is_err());
        assert!("rules/graft/create".parse::<SettingsPath>().is_err());
        assert!("storage/engine".parse::<SettingsPath>().is_err());
        assert!("".parse::<SettingsPath>().is_err());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-z./]{0,24}") {
            let once = normalize_path(&path);
            prop_assert_eq!(normalize_path(&once), once.clone());
            prop_assert!(!once.starts_with('/') && !once.ends_with('/'));
            prop_assert!(!once.contains('.'));
        }
    }
}
