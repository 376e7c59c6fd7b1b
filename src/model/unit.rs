//! Unit declarations and their merged form.

use serde::{Deserialize, Serialize};

use super::file::FileSpec;

/// Mode bits for unit files and drop-ins under the unit directory.
pub const UNIT_FILE_MODE: u32 = 0o600;

/// A named content fragment overlaying a base unit definition.
///
/// Ordering among drop-ins of one unit is insertion order and is preserved
/// in the unit's `<name>.d/` directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropIn {
    pub name: String,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitCommand {
    Start,
    Stop,
}

/// A declared unit, as it appears in the desired-state document.
///
/// An entry with neither `enable` nor `command` nor `content` is a
/// fragment-only contribution: its drop-ins merge into the base unit of the
/// same name instead of creating a standalone unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<UnitCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_ins: Vec<DropIn>,
    /// Files embedded for convenience; flattened into the desired file set
    /// during assembly, never part of unit equality.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSpec>,
}

impl UnitSpec {
    pub fn is_fragment_only(&self) -> bool {
        self.enable.is_none() && self.command.is_none() && self.content.is_none()
    }
}

/// A merged unit inside the assembled desired state.
///
/// Embedded files have been flattened away; what remains is exactly the
/// surface the diff engine compares structurally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<UnitCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_ins: Vec<DropIn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(name: &str) -> UnitSpec {
        UnitSpec {
            name: name.to_string(),
            enable: None,
            command: None,
            content: None,
            drop_ins: Vec::new(),
            files: Vec::new(),
        }
    }

    #[test]
    fn fragment_detection() {
        let mut unit = bare("u.service");
        unit.drop_ins.push(DropIn {
            name: "10-extra.conf".into(),
            content: "[Service]".into(),
        });
        assert!(unit.is_fragment_only());

        let mut with_enable = unit.clone();
        with_enable.enable = Some(true);
        assert!(!with_enable.is_fragment_only());

        let mut with_command = unit.clone();
        with_command.command = Some(UnitCommand::Start);
        assert!(!with_command.is_fragment_only());

        let mut with_content = unit;
        with_content.content = Some("[Unit]".into());
        assert!(!with_content.is_fragment_only());
    }

    #[test]
    fn command_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&UnitCommand::Start).unwrap(),
            "\"start\""
        );
        assert_eq!(
            serde_json::from_str::<UnitCommand>("\"stop\"").unwrap(),
            UnitCommand::Stop
        );
    }
}
