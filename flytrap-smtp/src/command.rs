use core::fmt::{self, Display, Formatter};

/// One tokenized SMTP request line.
///
/// Arguments are carried raw: mailbox parsing (and its `451` on failure) is
/// the session's concern, so a syntactically valid command with a garbage
/// address still tokenizes here.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// The raw argument after `MAIL FROM:`, angle brackets and all.
    MailFrom(String),
    /// The raw argument after `RCPT TO:`.
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Vrfy(String),
    Expn(String),
    Help,
    Quit,
    StartTls,
    Auth(String),
}

/// A request line that did not tokenize to any known verb.
///
/// The session answers these with `500 Syntax error, command unrecognized`.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct InvalidCommand {
    line: String,
}

impl InvalidCommand {
    pub fn line(&self) -> &str {
        &self.line
    }
}

impl Display for InvalidCommand {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.line)
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(domain) => write!(fmt, "HELO {domain}"),
            Self::Ehlo(domain) => write!(fmt, "EHLO {domain}"),
            Self::MailFrom(arg) => write!(fmt, "MAIL FROM:{arg}"),
            Self::RcptTo(arg) => write!(fmt, "RCPT TO:{arg}"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Vrfy(arg) => write!(fmt, "VRFY {arg}"),
            Self::Expn(arg) => write!(fmt, "EXPN {arg}"),
            Self::Help => fmt.write_str("HELP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::Auth(arg) => write!(fmt, "AUTH {arg}"),
        }
    }
}

fn prefix_match(line: &str, candidate: &str) -> bool {
    line.len() >= candidate.len() && line[..candidate.len()].eq_ignore_ascii_case(candidate)
}

/// Split `VERB argument`, tolerating any amount of whitespace in between.
fn split_verb(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    }
}

impl TryFrom<&str> for Command {
    type Error = InvalidCommand;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let trimmed = line.trim();

        // MAIL FROM / RCPT TO carry their colon as part of the verb; a
        // missing colon is a syntax error, not an empty argument.
        if prefix_match(trimmed, "MAIL FROM:") {
            return Ok(Self::MailFrom(trimmed[10..].trim().to_string()));
        }
        if prefix_match(trimmed, "RCPT TO:") {
            return Ok(Self::RcptTo(trimmed[8..].trim().to_string()));
        }

        let (verb, argument) = split_verb(trimmed);

        if verb.eq_ignore_ascii_case("HELO") {
            Ok(Self::Helo(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("EHLO") {
            Ok(Self::Ehlo(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("DATA") {
            Ok(Self::Data)
        } else if verb.eq_ignore_ascii_case("RSET") {
            Ok(Self::Rset)
        } else if verb.eq_ignore_ascii_case("NOOP") {
            Ok(Self::Noop)
        } else if verb.eq_ignore_ascii_case("VRFY") {
            Ok(Self::Vrfy(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("EXPN") {
            Ok(Self::Expn(argument.to_string()))
        } else if verb.eq_ignore_ascii_case("HELP") {
            Ok(Self::Help)
        } else if verb.eq_ignore_ascii_case("QUIT") {
            Ok(Self::Quit)
        } else if verb.eq_ignore_ascii_case("STARTTLS") {
            Ok(Self::StartTls)
        } else if verb.eq_ignore_ascii_case("AUTH") {
            Ok(Self::Auth(argument.to_string()))
        } else {
            Err(InvalidCommand {
                line: trimmed.to_string(),
            })
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = InvalidCommand;

    fn try_from(line: &[u8]) -> Result<Self, Self::Error> {
        match std::str::from_utf8(line) {
            Ok(line) => Self::try_from(line),
            Err(_) => Err(InvalidCommand {
                line: String::from_utf8_lossy(line).into_owned(),
            }),
        }
    }
}
