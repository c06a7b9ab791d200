use crate::error::ControlError;
use std::collections::HashMap;
use torctl_socket::ControlMessage;

/// Parses a `GETINFO` reply body: a sequence of
/// `key=value` lines terminated by `250 OK`.
pub fn parse(message: &ControlMessage) -> Result<HashMap<String, String>, ControlError> {
    if !message.is_ok() {
        let unrecognized: Vec<String> = message
            .content()
            .filter(|(code, _, _)| *code == "552")
            .filter_map(|(_, _, content)| unrecognized_key(content))
            .collect();
        if !unrecognized.is_empty() {
            return Err(ControlError::InvalidArguments {
                code: "552".to_string(),
                keys: unrecognized,
            });
        }
        return Err(ControlError::MalformedFrame(format!(
            "GETINFO response didn't have an OK status: {}",
            message.terminal_code()
        )));
    }

    let lines: Vec<&str> = message.into_iter().collect();
    let (entries_lines, ok_line) = lines.split_at(lines.len() - 1);
    debug_assert_eq!(ok_line, ["OK"]);

    let mut entries = HashMap::with_capacity(entries_lines.len());
    for line in entries_lines {
        let (key, value) = line.split_once('=').ok_or_else(|| {
            ControlError::MalformedFrame(format!(
                "GETINFO replies should only contain parameter=value mappings: {line:?}"
            ))
        })?;
        let mut value = value.to_string();
        if value.contains('\n') {
            if !value.starts_with('\n') {
                return Err(ControlError::MalformedFrame(format!(
                    "GETINFO response contained a multiline value that didn't start with a newline: {key:?}"
                )));
            }
            value.remove(0);
        }
        entries.insert(key.to_string(), value);
    }
    Ok(entries)
}

/// Extracts `X` from a line of the form `Unrecognized key "X"`.
fn unrecognized_key(content: &str) -> Option<String> {
    const PREFIX: &str = "Unrecognized key \"";
    if content.starts_with(PREFIX) && content.ends_with('"') && content.len() > PREFIX.len() {
        Some(content[PREFIX.len()..content.len() - 1].to_string())
    } else {
        None
    }
}
