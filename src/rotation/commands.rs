use serde_json::json;

use crate::protocol::{Command, CommandReply};

use super::RotationController;

pub async fn handle_command(
    controller: &RotationController,
    command: Command,
) -> Result<CommandReply, String> {
    controller.execute(command).await.map_err(|e| e.to_string())
}

/// Runs one JSON-encoded command and renders the reply as JSON. Parse and
/// command failures come back as `{"error": ...}`.
pub async fn handle_json(controller: &RotationController, raw: &str) -> String {
    let reply = match serde_json::from_str::<Command>(raw) {
        Ok(command) => handle_command(controller, command)
            .await
            .unwrap_or_else(|error| CommandReply::Error { error }),
        Err(err) => CommandReply::Error {
            error: format!("unrecognised command: {err}"),
        },
    };

    serde_json::to_string(&reply)
        .unwrap_or_else(|err| json!({ "error": err.to_string() }).to_string())
}
