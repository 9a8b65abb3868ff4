use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Identifier assigned to every captured envelope.
///
/// ULIDs are 128-bit, collision-resistant, and lexicographically sortable by
/// creation time, which keeps per-bucket keys roughly chronological.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvelopeId {
    id: ulid::Ulid,
}

impl EnvelopeId {
    /// Generate a new unique envelope ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Get the underlying ULID
    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl serde::Serialize for EnvelopeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for EnvelopeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Geolocation attached to an envelope during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMark {
    pub country: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One captured SMTP transaction: participants, raw body, and the security
/// and enrichment metadata accumulated on the way to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    id: EnvelopeId,
    remote_address: String,
    received_at: DateTime<Utc>,
    from: Option<Address>,
    to: Option<Address>,
    forwards: Vec<Address>,
    message: Vec<u8>,
    securely_delivered: bool,
    geo: Option<GeoMark>,
}

impl Envelope {
    /// Allocate a fresh envelope for a connection.
    ///
    /// `received_at` is the instant the session was opened; RSET allocates a
    /// replacement envelope carrying the same timestamp.
    pub fn new(remote_address: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            id: EnvelopeId::generate(),
            remote_address: remote_address.into(),
            received_at,
            from: None,
            to: None,
            forwards: Vec::new(),
            message: Vec::new(),
            securely_delivered: false,
            geo: None,
        }
    }

    #[inline]
    pub const fn id(&self) -> &EnvelopeId {
        &self.id
    }

    #[inline]
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// The host portion of `remote_address`, without the port and without
    /// the brackets an IPv6 address carries in `host:port` form.
    pub fn remote_host(&self) -> &str {
        let host = self
            .remote_address
            .rsplit_once(':')
            .map_or(self.remote_address.as_str(), |(host, _)| host);

        host.strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host)
    }

    #[inline]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    #[inline]
    pub const fn from(&self) -> Option<&Address> {
        self.from.as_ref()
    }

    #[inline]
    pub const fn to(&self) -> Option<&Address> {
        self.to.as_ref()
    }

    #[inline]
    pub fn forwards(&self) -> &[Address] {
        &self.forwards
    }

    #[inline]
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    #[inline]
    pub const fn securely_delivered(&self) -> bool {
        self.securely_delivered
    }

    #[inline]
    pub const fn geo(&self) -> Option<&GeoMark> {
        self.geo.as_ref()
    }

    /// Record the reverse-path. `secure` fixes `securely_delivered` for the
    /// lifetime of this envelope; it cannot regress afterwards.
    pub fn set_sender(&mut self, from: Address, secure: bool) {
        self.from = Some(from);
        if secure {
            self.securely_delivered = true;
        }
    }

    /// Record a recipient: the first becomes the primary `to`, every
    /// subsequent one is kept in arrival order as a forward.
    pub fn add_recipient(&mut self, recipient: Address) {
        if self.to.is_none() {
            self.to = Some(recipient);
        } else {
            self.forwards.push(recipient);
        }
    }

    /// Seal the envelope with the body received in DATA mode.
    ///
    /// Called exactly once, at end-of-DATA; the body is never mutated after
    /// this point.
    pub fn seal(&mut self, message: Vec<u8>) {
        debug_assert!(self.message.is_empty(), "envelope sealed twice");
        self.message = message;
    }

    /// Attach geolocation during enrichment.
    pub fn set_geo(&mut self, geo: GeoMark) {
        self.geo = Some(geo);
    }

    /// The UTC day bucket this envelope is stored under, formatted `YYYYMMDD`.
    pub fn day_bucket(&self) -> String {
        self.received_at.format("%Y%m%d").to_string()
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::Envelope;
    use crate::address::parse_mailbox;

    fn envelope() -> Envelope {
        let opened = Utc.with_ymd_and_hms(2024, 3, 9, 13, 37, 0).unwrap();
        Envelope::new("203.0.113.7:49152", opened)
    }

    #[test]
    fn recipients_split_into_to_and_forwards() {
        let mut env = envelope();
        env.add_recipient(parse_mailbox("<c@d.example>").unwrap());
        env.add_recipient(parse_mailbox("<e@f.example>").unwrap());
        env.add_recipient(parse_mailbox("<g@h.example>").unwrap());

        assert_eq!(env.to().unwrap().mailbox(), "c@d.example");
        let forwards: Vec<String> = env.forwards().iter().map(|a| a.mailbox()).collect();
        assert_eq!(forwards, ["e@f.example", "g@h.example"]);
    }

    #[test]
    fn secure_delivery_does_not_regress() {
        let mut env = envelope();
        env.set_sender(parse_mailbox("<a@b.example>").unwrap(), true);
        assert!(env.securely_delivered());

        env.set_sender(parse_mailbox("<x@y.example>").unwrap(), false);
        assert!(env.securely_delivered());
    }

    #[test]
    fn remote_host_strips_port() {
        assert_eq!(envelope().remote_host(), "203.0.113.7");
        assert!(envelope().remote_host().parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn remote_host_unwraps_ipv6_brackets() {
        let opened = Utc.with_ymd_and_hms(2024, 3, 9, 13, 37, 0).unwrap();
        let env = Envelope::new("[2001:db8::7]:49152", opened);

        assert_eq!(env.remote_host(), "2001:db8::7");
        assert!(env.remote_host().parse::<std::net::IpAddr>().is_ok());
    }

    #[test]
    fn day_bucket_is_utc_date() {
        assert_eq!(envelope().day_bucket(), "20240309");
    }

    #[test]
    fn serde_round_trip_preserves_message_bytes() {
        let mut env = envelope();
        env.set_sender(parse_mailbox("<a@b.example>").unwrap(), false);
        env.add_recipient(parse_mailbox("<c@d.example>").unwrap());
        env.seal(b".leading dot\r\nbinary \xff\xfe bytes\r\n".to_vec());

        let json = serde_json::to_vec(&env).unwrap();
        let back: Envelope = serde_json::from_slice(&json).unwrap();

        assert_eq!(back.id(), env.id());
        assert_eq!(back.remote_address(), env.remote_address());
        assert_eq!(back.received_at(), env.received_at());
        assert_eq!(back.message(), env.message());
        assert_eq!(back.securely_delivered(), env.securely_delivered());
        assert!(back.geo().is_none());
    }
}
