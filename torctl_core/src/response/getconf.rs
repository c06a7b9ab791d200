use crate::error::ControlError;
use std::collections::HashMap;
use torctl_socket::ControlMessage;

/// Parses a `GETCONF` reply body into Tor's own view of
/// the option table: `keyword -> values`, keyed and cased exactly as Tor
/// echoed them back. Restoring the caller's requested casing and expanding
/// the `HiddenService*` option group are the command layer's job, not this
/// parser's — see `Controller::get_conf_map`.
pub fn parse(message: &ControlMessage) -> Result<HashMap<String, Vec<String>>, ControlError> {
    if !message.is_ok() {
        let unrecognized: Vec<String> = message
            .content()
            .filter(|(code, _, _)| *code == "552")
            .filter_map(|(_, _, content)| quoted_substring(content))
            .collect();
        if !unrecognized.is_empty() {
            return Err(ControlError::InvalidArguments {
                code: "552".to_string(),
                keys: unrecognized,
            });
        }
        return Err(ControlError::MalformedFrame(format!(
            "GETCONF response didn't have an OK status: {}",
            message.terminal_code()
        )));
    }

    let lines: Vec<&str> = message.into_iter().collect();
    let (entries_lines, _ok_line) = lines.split_at(lines.len() - 1);

    let mut entries: HashMap<String, Vec<String>> = HashMap::new();
    for line in entries_lines {
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k, v.to_string()),
            None => (*line, String::new()),
        };
        entries.entry(key.to_string()).or_default().push(value);
    }
    Ok(entries)
}

/// Finds the first quoted substring in a `552` reply's content, e.g. the
/// `foo` in `Unrecognized option: "foo"`. Tor doesn't pin down one fixed
/// wording for this across versions, so we look for a quoted key rather
/// than a literal prefix.
fn quoted_substring(content: &str) -> Option<String> {
    let start = content.find('"')?;
    let end = content[start + 1..].find('"')? + start + 1;
    Some(content[start + 1..end].to_string())
}
