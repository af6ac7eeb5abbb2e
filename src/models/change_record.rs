// Structured change records emitted by update scripts

use serde::{Deserialize, Serialize};

/// One version bump reported by an update script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub attr_path: String,
    pub old_version: String,
    pub new_version: String,
    pub files: Vec<String>,
}

impl ChangeRecord {
    /// Commit message for this change: `<attrPath>: <oldVersion> → <newVersion>`
    pub fn commit_message(&self) -> String {
        format!(
            "{}: {} → {}",
            self.attr_path, self.old_version, self.new_version
        )
    }
}

/// Parse the captured stdout of an update script as a list of change records
pub fn parse_change_records(stdout: &[u8]) -> Result<Vec<ChangeRecord>, serde_json::Error> {
    serde_json::from_slice(stdout)
}
