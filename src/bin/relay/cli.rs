use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};

/// One line of user input, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    /// `/nick NAME`; an empty name is passed through and rejected by the relay.
    Nick(String),
    /// Resend the pending draft, or refresh when there is none.
    Retry,
    Status,
    Feed,
    Help,
    Unknown(String),
    Send(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    if !trimmed.starts_with('/') {
        return Command::Send(trimmed.to_owned());
    }

    let (name, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    match name {
        "/q" | "/stop" => Command::Quit,
        "/nick" => Command::Nick(rest.trim().to_owned()),
        "/retry" => Command::Retry,
        "/status" => Command::Status,
        "/feed" => Command::Feed,
        "/help" => Command::Help,
        other => Command::Unknown(other.to_owned()),
    }
}

/// Next line including its newline, or `None` at EOF.
pub async fn read_line(reader: &mut (impl AsyncBufRead + Unpin)) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(parse_command("  hello grid \n"), Command::Send("hello grid".to_owned()));
        assert_eq!(parse_command(" \n"), Command::Empty);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_command("/q\n"), Command::Quit);
        assert_eq!(parse_command("/stop"), Command::Quit);
        assert_eq!(parse_command("/nick  ghost one "), Command::Nick("ghost one".to_owned()));
        assert_eq!(parse_command("/nick"), Command::Nick(String::new()));
        assert_eq!(parse_command("/retry"), Command::Retry);
        assert_eq!(parse_command("/warp 9"), Command::Unknown("/warp".to_owned()));
    }

    #[tokio::test]
    async fn reads_lines_until_eof() {
        let mut reader = tokio::io::BufReader::new(&b"one\ntwo"[..]);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("one\n"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("two"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }
}
