//! Command parsing for the terminal front end.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    NewChat,
    /// `None` shows the current model.
    Model(Option<String>),
    Models,
    Chats,
    Open(i64),
    Delete(i64),
    Export(Option<String>),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
Commands:
  <text>           send a message
  /new             start a new chat
  /model [name]    show or switch the model
  /models          list models available on the server
  /chats           list saved chats
  /open <id>       open a saved chat
  /delete <id>     delete a saved chat
  /export [path]   write the open chat as markdown
  /help            show this help
  /quit            exit
Press Ctrl-C while a reply is streaming to stop it.
";

fn parse_id(cmd: &str, args: &str) -> Command {
    match args.parse::<i64>() {
        Ok(id) => match cmd {
            "open" => Command::Open(id),
            _ => Command::Delete(id),
        },
        Err(_) => Command::Invalid(format!("/{} needs a chat id, got {:?}", cmd, args)),
    }
}

pub fn parse_command(line: &str) -> Command {
    let input = line.trim();
    if input.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = input.strip_prefix('/') else {
        return Command::Send(line.trim_end_matches(['\r', '\n']).to_string());
    };

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let cmd = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");
    let arg = (!args.is_empty()).then(|| args.to_string());

    match cmd.as_str() {
        "new" | "n" => Command::NewChat,
        "model" | "m" => Command::Model(arg),
        "models" => Command::Models,
        "chats" | "ls" => Command::Chats,
        "open" | "o" => parse_id("open", args),
        "delete" | "rm" => parse_id("delete", args),
        "export" => Command::Export(arg),
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => Command::Invalid(format!("Unknown command: /{}", other)),
    }
}
