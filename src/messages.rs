// Message types exchanged with the HTTP relay

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Poll request, `{"status_update": {}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status_update: BTreeMap<String, serde_json::Value>,
}

/// Command upload, `{"put_cmd": ["w 10 10"]}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutCommand {
    pub put_cmd: Vec<String>,
}

impl PutCommand {
    pub fn single(command: &str) -> Self {
        Self {
            put_cmd: vec![command.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayCommand {
    pub cmd: String,
}

/// Pending commands keyed by relay handle. An empty queue may come back
/// as a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PendingCommands {
    Keyed(BTreeMap<String, RelayCommand>),
    Empty(Vec<serde_json::Value>),
}

/// Relay answer to a status update
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayStatus {
    #[serde(default)]
    pub commands: Option<PendingCommands>,
}

impl RelayStatus {
    /// At most one command per poll; the lowest handle wins
    pub fn into_first_command(self) -> Option<String> {
        match self.commands? {
            PendingCommands::Keyed(commands) => {
                commands.into_values().next().map(|command| command.cmd)
            }
            PendingCommands::Empty(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_shape() {
        let json = serde_json::to_string(&StatusUpdate::default()).unwrap();
        assert_eq!(json, r#"{"status_update":{}}"#);
    }

    #[test]
    fn test_put_command_escapes_text() {
        let json = serde_json::to_string(&PutCommand::single(r#"say "hi""#)).unwrap();
        assert_eq!(json, r#"{"put_cmd":["say \"hi\""]}"#);
    }

    #[test]
    fn test_first_command_of_many() {
        let status: RelayStatus = serde_json::from_str(
            r#"{"commands": {"h2": {"cmd": "s"}, "h1": {"cmd": "f"}}}"#,
        )
        .unwrap();
        assert_eq!(status.into_first_command().as_deref(), Some("f"));
    }

    #[test]
    fn test_empty_forms() {
        for body in [r#"{}"#, r#"{"commands": null}"#, r#"{"commands": []}"#, r#"{"commands": {}}"#] {
            let status: RelayStatus = serde_json::from_str(body).unwrap();
            assert_eq!(status.into_first_command(), None, "{}", body);
        }
    }
}
