use parley_storage::MediaAttachment;

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send {
        text: String,
        media: Option<MediaAttachment>,
    },
    Clear,
    /// Leave the chat screen so replies raise notifications.
    Background,
    Foreground,
    Bubble,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send {
                text: line.to_string(),
                media: None,
            };
        };

        let (name, argument) = rest
            .split_once(char::is_whitespace)
            .map(|(name, argument)| (name, argument.trim()))
            .unwrap_or((rest, ""));
        match name {
            "quit" | "exit" => Command::Quit,
            "clear" => Command::Clear,
            "background" | "bg" => Command::Background,
            "foreground" | "fg" => Command::Foreground,
            "bubble" => Command::Bubble,
            "help" => Command::Help,
            "photo" if !argument.is_empty() => {
                let (uri, caption) = argument
                    .split_once(char::is_whitespace)
                    .map(|(uri, caption)| (uri, caption.trim()))
                    .unwrap_or((argument, ""));
                Command::Send {
                    text: caption.to_string(),
                    media: Some(MediaAttachment::new(uri, guess_mime_type(uri))),
                }
            }
            _ => Command::Unknown(line.to_string()),
        }
    }
}

pub const HELP: &str = "commands: /photo <uri> [caption], /background, /foreground, /bubble, /clear, /quit";

fn guess_mime_type(uri: &str) -> Option<String> {
    let extension = uri.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}
