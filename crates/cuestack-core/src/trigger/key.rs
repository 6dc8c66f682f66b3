use serde::{Deserialize, Serialize};

use crate::cue::CueAction;

/// Fires when the front end reports a key press.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTrigger {
    /// Key name as reported by the front end, compared case-insensitively
    pub key: String,
    pub action: CueAction,
}

impl KeyTrigger {
    pub const CLASS: &'static str = "KeyTrigger";

    pub fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}
