use torctl_socket::ControlMessage;

/// A generic acknowledgement reply: just the terminal
/// status code, its message, and whether it was a success. Used by every
/// command that doesn't carry structured data back — `SETCONF`,
/// `RESETCONF`, `LOADCONF`, `SAVECONF`.
#[derive(Clone, Debug)]
pub struct SingleLineResponse {
    pub code: String,
    pub message: String,
    ok: bool,
}

impl SingleLineResponse {
    pub fn parse(message: &ControlMessage) -> Self {
        Self {
            code: message.terminal_code().to_string(),
            message: message.terminal_message().to_string(),
            ok: message.is_ok(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }
}
