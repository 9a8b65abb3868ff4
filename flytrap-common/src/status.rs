use core::fmt::{self, Display, Formatter};

/// SMTP reply codes spoken by the honeypot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    HelpMessage = 214,
    ServiceReady = 220,
    GoodBye = 221,
    Ok = 250,
    CannotVerify = 252,
    StartMailInput = 354,
    RequestAborted = 451,
    SyntaxError = 500,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
}

impl Status {
    /// Checks if the status is a permanent rejection
    pub fn is_permanent(self) -> bool {
        u32::from(self) >= 500
    }

    /// Checks if the status is a temporary rejection
    pub fn is_temporary(self) -> bool {
        u32::from(self) >= 400 && u32::from(self) < 500
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::HelpMessage => 214,
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::CannotVerify => 252,
            Status::StartMailInput => 354,
            Status::RequestAborted => 451,
            Status::SyntaxError => 500,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn status() {
        assert!(Status::SyntaxError.is_permanent());
        assert!(!Status::SyntaxError.is_temporary());

        assert!(Status::RequestAborted.is_temporary());
        assert!(!Status::RequestAborted.is_permanent());

        assert_eq!(u32::from(Status::InvalidCommandSequence), 503);
        assert_eq!(Status::Ok.to_string(), "250");
    }
}
