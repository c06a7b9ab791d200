use crate::error::SocketError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One line of a control reply: a three digit status code, the divider that
/// relates it to the rest of the reply, and its content.
///
/// `divider` is one of `' '` (last line of the reply), `'-'` (an
/// intermediate line), or `'+'` (introduces a multiline data block, in which
/// case `content` already holds the fully unescaped, joined body).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: String,
    pub divider: char,
    pub content: String,
}

/// A parsed reply or event from the control socket: an ordered list of
/// [`ReplyLine`]s. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlMessage {
    lines: Vec<ReplyLine>,
}

impl ControlMessage {
    pub(crate) fn new(lines: Vec<ReplyLine>) -> Self {
        debug_assert!(!lines.is_empty());
        Self { lines }
    }

    /// The reply's lines in arrival order.
    pub fn lines(&self) -> &[ReplyLine] {
        &self.lines
    }

    /// Iterates over each line as `(code, divider, content)`.
    pub fn content(&self) -> impl Iterator<Item = (&str, char, &str)> {
        self.lines
            .iter()
            .map(|l| (l.code.as_str(), l.divider, l.content.as_str()))
    }

    /// True iff the terminal line is `250 OK`.
    pub fn is_ok(&self) -> bool {
        let last = self.terminal_line();
        last.code == "250" && last.content == "OK"
    }

    /// True iff this message is an asynchronous event (terminal code `650`).
    pub fn is_event(&self) -> bool {
        self.terminal_line().code == "650"
    }

    /// The status code of the reply as a whole (the terminal line's code).
    pub fn terminal_code(&self) -> &str {
        &self.terminal_line().code
    }

    /// The terminal line's content, conventionally the human readable message.
    pub fn terminal_message(&self) -> &str {
        &self.terminal_line().content
    }

    fn terminal_line(&self) -> &ReplyLine {
        self.lines.last().expect("ControlMessage is never empty")
    }
}

impl<'a> IntoIterator for &'a ControlMessage {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, ReplyLine>, fn(&'a ReplyLine) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter().map(|l| l.content.as_str())
    }
}

/// Reads one full control message (reply or event) from a buffered stream.
///
/// Multiline data blocks (`CODE+KEY=\r\n...\r\n.\r\n`) are unescaped and
/// joined into a single content string, prefixed with the leading newline
/// that marks a multiline value (`KEY=\n<body>`).
pub async fn read_message<R>(reader: &mut R) -> Result<ControlMessage, SocketError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let raw = read_line(reader).await?;
        if raw.len() < 4 {
            return Err(SocketError::Protocol(format!(
                "reply line too short to contain a status code: {raw:?}"
            )));
        }
        let (code, rest) = raw.split_at(3);
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SocketError::Protocol(format!(
                "reply line didn't start with a status code: {raw:?}"
            )));
        }
        let mut chars = rest.chars();
        let divider = chars.next().ok_or_else(|| {
            SocketError::Protocol(format!("reply line missing a divider: {raw:?}"))
        })?;
        let mut content = chars.as_str().to_string();
        let terminal = match divider {
            ' ' => true,
            '-' => false,
            '+' => {
                content = format!("{content}\n{}", read_data_block(reader).await?);
                false
            }
            other => {
                return Err(SocketError::Protocol(format!(
                    "unrecognized reply divider '{other}': {raw:?}"
                )));
            }
        };
        lines.push(ReplyLine {
            code: code.to_string(),
            divider,
            content,
        });
        if terminal {
            return Ok(ControlMessage::new(lines));
        }
    }
}

/// Reads the body of a `+`-introduced data block up to (and consuming) the
/// terminating lone `.` line, undoing dot-stuffing along the way.
async fn read_data_block<R>(reader: &mut R) -> Result<String, SocketError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line == "." {
            return Ok(body.join("\n"));
        }
        body.push(match line.strip_prefix("..") {
            Some(rest) => format!(".{rest}"),
            None => line,
        });
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String, SocketError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = String::new();
    let read = reader.read_line(&mut raw).await?;
    if read == 0 {
        return Err(SocketError::Closed);
    }
    while raw.ends_with('\n') || raw.ends_with('\r') {
        raw.pop();
    }
    Ok(raw)
}
