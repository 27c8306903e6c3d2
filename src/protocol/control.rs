//! Operator command parser.
//!
//! The running session reads one command per line from its controlling
//! terminal, in place of hotkeys and dialogs.

use tracing::warn;

use crate::board::Side;
use crate::locate::Rect;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// `color <w|b>`: the side this session plays.
    SetPlayerColor(Side),

    /// `auto <on|off>`: execute chosen moves automatically.
    SetAutoExecute(bool),

    /// `stealth <on|off>`: randomised move choice and timing.
    SetStealth(bool),

    /// `region <x> <y> <width> <height>`: manual board region.
    SetRegion(Rect),

    /// Detect the board region again.
    Relocate,

    /// Forget repetition counts and move history.
    NewGame,

    /// Empty the telemetry log.
    ClearTelemetry,

    /// Report telemetry statistics as a status line.
    Stats,

    Quit,
}

fn parse_switch(token: Option<&&str>) -> Option<bool> {
    match token.copied() {
        Some("on") | Some("true") | Some("1") => Some(true),
        Some("off") | Some("false") | Some("0") => Some(false),
        _ => None,
    }
}

/// Parses one line. Returns `None` for blank lines and unknown commands;
/// malformed arguments are logged.
pub fn parse_control(line: &str) -> Option<Control> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let first = *tokens.first()?;

    let parsed = match first {
        "color" | "colour" => tokens.get(1).and_then(|t| t.parse().ok()).map(Control::SetPlayerColor),
        "auto" => parse_switch(tokens.get(1)).map(Control::SetAutoExecute),
        "stealth" => parse_switch(tokens.get(1)).map(Control::SetStealth),
        "region" => {
            let nums: Vec<u32> = tokens[1..].iter().filter_map(|t| t.parse().ok()).collect();
            match nums[..] {
                [x, y, w, h] if tokens.len() == 5 => Some(Control::SetRegion(Rect::new(x, y, w, h))),
                _ => None,
            }
        }
        "locate" => Some(Control::Relocate),
        "newgame" | "new" => Some(Control::NewGame),
        "clearlog" => Some(Control::ClearTelemetry),
        "stats" => Some(Control::Stats),
        "quit" | "exit" => Some(Control::Quit),
        _ => {
            warn!("unknown command: {}", first);
            return None;
        }
    };

    if parsed.is_none() {
        warn!("malformed command: {}", line.trim());
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_switches() {
        assert_eq!(parse_control("auto on"), Some(Control::SetAutoExecute(true)));
        assert_eq!(parse_control("stealth off"), Some(Control::SetStealth(false)));
        assert_eq!(parse_control("auto maybe"), None);
        assert_eq!(parse_control("stealth"), None);
    }

    #[test]
    fn parse_color() {
        assert_eq!(parse_control("color b"), Some(Control::SetPlayerColor(Side::Black)));
        assert_eq!(parse_control("  colour w  "), Some(Control::SetPlayerColor(Side::White)));
        assert_eq!(parse_control("color red"), None);
    }

    #[test]
    fn parse_region() {
        assert_eq!(
            parse_control("region 10 20 400 400"),
            Some(Control::SetRegion(Rect::new(10, 20, 400, 400)))
        );
        assert_eq!(parse_control("region 10 20 400"), None);
        assert_eq!(parse_control("region 10 20 400 x"), None);
    }

    #[test]
    fn parse_bare_commands() {
        assert_eq!(parse_control("locate"), Some(Control::Relocate));
        assert_eq!(parse_control("newgame"), Some(Control::NewGame));
        assert_eq!(parse_control("clearlog"), Some(Control::ClearTelemetry));
        assert_eq!(parse_control("stats"), Some(Control::Stats));
        assert_eq!(parse_control("quit"), Some(Control::Quit));
        assert_eq!(parse_control(""), None);
        assert_eq!(parse_control("dance"), None);
    }
}
