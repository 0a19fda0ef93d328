//! USI line codec
//!
//! Decodes the subset of engine output the session reacts to, and encodes the
//! commands it sends. Line framing is handled by the session's reader.

use std::fmt;

/// Something the engine said that the session cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// `usiok`
    HandshakeAck,
    /// The engine could not load a required data file (evaluation weights,
    /// usually). It keeps running but cannot score positions.
    InitError,
    /// `readyok`
    ReadyAck,
    /// `... score cp <n> ...`
    ScoreUpdate(i32),
    /// `bestmove <move>`, carrying any score printed on the same line
    BestMove { best_move: String, score: Option<i32> },
    /// `option name <name> type ...`
    OptionDecl { name: String },
}

/// Decodes one line of engine output.
///
/// Checks run top-down and the first hit wins, so a line reporting both an
/// init error and `readyok` is treated as the error.
pub fn parse_line(line: &str) -> Option<EngineEvent> {
    if has_token(line, "usiok") {
        return Some(EngineEvent::HandshakeAck);
    }
    if line.contains("Error!") || line.contains("failed to read") {
        return Some(EngineEvent::InitError);
    }
    if has_token(line, "readyok") {
        return Some(EngineEvent::ReadyAck);
    }

    let score = parse_score_cp(line);
    if let Some(best_move) = parse_best_move(line) {
        return Some(EngineEvent::BestMove { best_move, score });
    }
    if let Some(cp) = score {
        return Some(EngineEvent::ScoreUpdate(cp));
    }

    line.strip_prefix("option ")
        .and_then(parse_option_name)
        .map(|name| EngineEvent::OptionDecl { name })
}

fn has_token(line: &str, token: &str) -> bool {
    line.split_whitespace().any(|t| t == token)
}

/// Extracts `<n>` from the first `score cp <n>` occurrence.
fn parse_score_cp(line: &str) -> Option<i32> {
    const MARKER: &str = "score cp ";
    let rest = &line[line.find(MARKER)? + MARKER.len()..];

    let negative = rest.starts_with('-');
    let digits_from = usize::from(negative);
    let digits_len = rest[digits_from..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    rest[..digits_from + digits_len].parse().ok()
}

fn parse_best_move(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == "bestmove")?;
    tokens.next().map(str::to_string)
}

/// Parses the option name out of `name <words...> type <kind> ...`
fn parse_option_name(rest: &str) -> Option<String> {
    let mut tokens = rest.split_whitespace();
    if tokens.next()? != "name" {
        return None;
    }
    let words: Vec<&str> = tokens.take_while(|t| *t != "type").collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// A command written to the engine's stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Usi,
    SetOption { name: String, value: String },
    IsReady,
    Position { sfen: String },
    Go { depth: u32 },
    Stop,
    Quit,
}

impl Command {
    /// The command as one newline-terminated line, ready for a single write
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Usi => write!(f, "usi"),
            Command::SetOption { name, value } => {
                write!(f, "setoption name {} value {}", name, value)
            }
            Command::IsReady => write!(f, "isready"),
            Command::Position { sfen } => write!(f, "position sfen {}", sfen),
            Command::Go { depth } => write!(f, "go depth {}", depth),
            Command::Stop => write!(f, "stop"),
            Command::Quit => write!(f, "quit"),
        }
    }
}
