use core::fmt::{self, Display, Formatter};

use crate::command::Command;

/// Where a session stands in the RFC 5321 command sequence.
///
/// The permitted-verb table is the whole contract: `permits` is a pure
/// function of `(state, verb)`, and a rejected verb leaves both the state
/// and the envelope untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceState {
    /// Banner sent, nothing heard yet (also the state right after a
    /// successful STARTTLS handshake).
    #[default]
    Greeted,
    /// HELO or EHLO accepted.
    HeloOk,
    /// MAIL FROM accepted.
    FromOk,
    /// At least one RCPT TO accepted.
    RcptOk,
    /// Between the 354 reply and the terminating dot; raw body only.
    DataMode,
    /// Body sealed; only RSET or QUIT move the session on.
    PostData,
}

impl SequenceState {
    /// Whether `command` is acceptable in this state.
    pub fn permits(self, command: &Command) -> bool {
        match self {
            Self::Greeted => matches!(
                command,
                Command::Helo(_)
                    | Command::Ehlo(_)
                    | Command::Noop
                    | Command::Rset
                    | Command::Quit
                    | Command::StartTls
            ),
            Self::HeloOk => matches!(
                command,
                Command::MailFrom(_)
                    | Command::Noop
                    | Command::Rset
                    | Command::Quit
                    | Command::StartTls
                    | Command::Ehlo(_)
                    | Command::Helo(_)
                    | Command::Help
                    | Command::Vrfy(_)
                    | Command::Expn(_)
                    | Command::Auth(_)
            ),
            Self::FromOk => matches!(
                command,
                Command::RcptTo(_) | Command::Rset | Command::Noop | Command::Quit
            ),
            Self::RcptOk => matches!(
                command,
                Command::RcptTo(_)
                    | Command::Data
                    | Command::Rset
                    | Command::Noop
                    | Command::Quit
            ),
            // No commands are read in DATA mode, so nothing is permitted.
            Self::DataMode => false,
            Self::PostData => matches!(command, Command::Rset | Command::Quit),
        }
    }
}

impl Display for SequenceState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Greeted => "GREETED",
            Self::HeloOk => "HELO_OK",
            Self::FromOk => "FROM_OK",
            Self::RcptOk => "RCPT_OK",
            Self::DataMode => "DATA_MODE",
            Self::PostData => "POST_DATA",
        })
    }
}
