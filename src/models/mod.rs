// Data models for the package list and update-script output

pub mod change_record;

pub use change_record::{parse_change_records, ChangeRecord};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Feature flag a package's update script can declare
pub const FEATURE_COMMIT: &str = "commit";

/// Command line of an update script
///
/// Accepts either a list (`["./update.sh", "--flag"]`) or a single string,
/// which is taken as the program with no arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateScript {
    Program(String),
    Command(Vec<String>),
}

impl UpdateScript {
    /// Program to run and its arguments
    pub fn split(&self) -> Option<(&str, &[String])> {
        match self {
            UpdateScript::Program(program) => Some((program.as_str(), &[] as &[String])),
            UpdateScript::Command(parts) => parts
                .split_first()
                .map(|(program, args)| (program.as_str(), args)),
        }
    }
}

/// One entry of the package list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    /// Display name
    pub name: String,
    /// Short identifier, used for log filenames
    pub pname: String,
    pub update_script: UpdateScript,
    #[serde(default)]
    pub supported_features: BTreeSet<String>,
}

impl Package {
    /// Whether the update script supports commit integration
    pub fn supports_commit(&self) -> bool {
        self.supported_features.contains(FEATURE_COMMIT)
    }

    /// Name of the failure log written for this package
    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.pname)
    }
}

/// Parse a JSON package list
pub fn parse_package_list(json: &str) -> Result<Vec<Package>, serde_json::Error> {
    serde_json::from_str(json)
}
