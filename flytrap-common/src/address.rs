use std::{
    fmt::{Debug, Display},
    ops::Deref,
};

use mailparse::MailAddr;
use serde::{de, Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when a client-supplied mailbox argument cannot be parsed.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The argument was empty (or contained only brackets/whitespace).
    #[error("Empty mailbox argument")]
    Empty,

    /// RFC 5322 group syntax is not a deliverable mailbox.
    #[error("Group syntax is not a valid mailbox")]
    Group,

    /// The underlying parser rejected the argument.
    #[error("Unparseable mailbox: {0}")]
    Unparseable(String),
}

/// A single RFC 5322 mailbox as captured from MAIL FROM / RCPT TO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address(pub MailAddr);

impl Address {
    /// The bare `local@domain` form, without any display name.
    pub fn mailbox(&self) -> String {
        match &self.0 {
            MailAddr::Single(single) => single.addr.clone(),
            MailAddr::Group(group) => group.group_name.clone(),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<MailAddr> for Address {
    fn from(value: MailAddr) -> Self {
        Self(value)
    }
}

impl Deref for Address {
    type Target = MailAddr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Parse the argument of a MAIL FROM / RCPT TO command into a mailbox.
///
/// One layer of surrounding angle brackets is tolerated and stripped; the
/// remainder goes through `mailparse`. Group syntax and empty reverse-paths
/// are rejected: the honeypot records concrete mailboxes only.
pub fn parse_mailbox(argument: &str) -> Result<Address, AddressError> {
    let trimmed = argument.trim();
    let trimmed = trimmed
        .strip_prefix('<')
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(trimmed)
        .trim();

    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    let mut parsed = mailparse::addrparse(trimmed)
        .map_err(|err| AddressError::Unparseable(err.to_string()))?;

    if parsed.is_empty() {
        return Err(AddressError::Empty);
    }

    match parsed.remove(0) {
        MailAddr::Group(_) => Err(AddressError::Group),
        addr @ MailAddr::Single(_) => Ok(Address(addr)),
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let addr = match &self.0 {
            MailAddr::Group(group_info) => group_info.to_string(),
            MailAddr::Single(single_info) => single_info.to_string(),
        };
        serializer.serialize_str(addr.as_str())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Addr;

        impl de::Visitor<'_> for Addr {
            type Value = Address;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("an email address")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                mailparse::addrparse(v)
                    .map(|mut a| a.remove(0))
                    .map(Address)
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(v), &Self))
            }
        }

        deserializer.deserialize_str(Addr)
    }
}
