//! Parsing of terminal input lines

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Open(String),
    Dm(String),
    Send(String),
    Reply(String),
    Older,
    React { message_id: String, emoji: String },
    Edit { message_id: String, content: String },
    Delete(String),
    Leave,
    Name(String),
    Quit,
}

impl Command {
    /// Parse a trimmed input line. Lines that are not commands are sent as text.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "help" | "h" | "?" => Command::Help,
            "list" | "ls" => Command::List,
            "open" | "o" => Command::Open(required(rest, "open <conversation-id>")?),
            "dm" => Command::Dm(required(rest, "dm <user-id>")?),
            "send" | "s" => Command::Send(required(rest, "send <text>")?),
            "reply" | "r" => Command::Reply(required(rest, "reply <message-id>")?),
            "older" => Command::Older,
            "react" => {
                let (message_id, emoji) = pair(rest, "react <message-id> <emoji>")?;
                Command::React { message_id, emoji }
            }
            "edit" => {
                let (message_id, content) = pair(rest, "edit <message-id> <text>")?;
                Command::Edit {
                    message_id,
                    content,
                }
            }
            "delete" | "del" => Command::Delete(required(rest, "delete <message-id>")?),
            "leave" => Command::Leave,
            "name" => Command::Name(required(rest, "name <display name>")?),
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Send(line.to_string()),
        };
        Ok(command)
    }
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("Usage: {usage}"))
    } else {
        Ok(rest.to_string())
    }
}

fn pair(rest: &str, usage: &str) -> Result<(String, String), String> {
    match rest.split_once(char::is_whitespace) {
        Some((first, second)) if !second.trim().is_empty() => {
            Ok((first.to_string(), second.trim().to_string()))
        }
        _ => Err(format!("Usage: {usage}")),
    }
}
