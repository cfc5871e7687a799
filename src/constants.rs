// MIT License - Copyright (c) 2026 Peter Wright
// WattBox integration protocol constants

/// Line terminator for both directions.
pub const LF: u8 = b'\n';

/// Request / response sigils.
pub const QUERY_SIGIL: char = '?';
pub const CONTROL_SIGIL: char = '!';
pub const ERROR_SIGIL: char = '#';
pub const UNSOLICITED_SIGIL: char = '~';

/// Success response for control commands.
pub const OK_RESPONSE: &str = "OK";
/// Generic failure response.
pub const ERROR_RESPONSE: &str = "#Error";

/// Graceful session-end command.
pub const EXIT_COMMAND: &str = "Exit";

/// Default ports.
pub const DEFAULT_TELNET_PORT: u16 = 23;
pub const DEFAULT_ENCRYPTED_PORT: u16 = 992;

/// Factory credentials.
pub const DEFAULT_USERNAME: &str = "wattbox";
pub const DEFAULT_PASSWORD: &str = "wattbox";

/// Prompt substrings, matched case-insensitively.
pub const LOGIN_PROMPTS: &[&str] = &["login:", "username:", "user:"];
pub const PASSWORD_PROMPTS: &[&str] = &["password:", "pass:", "passwd:"];
/// Text the device prints before re-prompting after a bad login.
pub const REJECTION_MARKERS: &[&str] = &["invalid", "incorrect"];
/// Banner printed by firmware that confirms a login.
pub const SUCCESS_BANNERS: &[&str] = &["successfully logged in"];

/// Telnet option negotiation bytes.
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

/// Upper bound on buffered, unterminated input.
pub const MAX_LINE_BUFFER: usize = 8192;

/// Valid ranges accepted by the device for control parameters.
pub const MAX_DELAY_SECS: u32 = 600;
pub const MAX_OUTLET_NAME_LEN: usize = 32;
