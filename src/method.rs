use std::fmt;

/// STOMP 1.2 frame commands.
///
/// Client frames and server frames share one enum; the tokenizer reports
/// `None` for a syntactically valid command it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Method {
    pub const ALL: [Method; 15] = [
        Method::Connect,
        Method::Stomp,
        Method::Connected,
        Method::Send,
        Method::Subscribe,
        Method::Unsubscribe,
        Method::Ack,
        Method::Nack,
        Method::Begin,
        Method::Commit,
        Method::Abort,
        Method::Disconnect,
        Method::Message,
        Method::Receipt,
        Method::Error,
    ];

    /// Wire spelling of the command.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "CONNECT",
            Method::Stomp => "STOMP",
            Method::Connected => "CONNECTED",
            Method::Send => "SEND",
            Method::Subscribe => "SUBSCRIBE",
            Method::Unsubscribe => "UNSUBSCRIBE",
            Method::Ack => "ACK",
            Method::Nack => "NACK",
            Method::Begin => "BEGIN",
            Method::Commit => "COMMIT",
            Method::Abort => "ABORT",
            Method::Disconnect => "DISCONNECT",
            Method::Message => "MESSAGE",
            Method::Receipt => "RECEIPT",
            Method::Error => "ERROR",
        }
    }

    /// Resolve a command token. Matching is exact (STOMP commands are
    /// upper case on the wire).
    pub fn from_bytes(token: &[u8]) -> Option<Method> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().as_bytes() == token)
    }

    /// Only SEND, MESSAGE and ERROR frames carry a body.
    pub const fn has_body(&self) -> bool {
        matches!(self, Method::Send | Method::Message | Method::Error)
    }

    /// CONNECT and CONNECTED frames are exempt from header escaping.
    pub const fn escapes_headers(&self) -> bool {
        !matches!(self, Method::Connect | Method::Stomp | Method::Connected)
    }

    /// Frames a broker sends to a client.
    pub const fn is_server_frame(&self) -> bool {
        matches!(
            self,
            Method::Connected | Method::Message | Method::Receipt | Method::Error
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_resolve_to_their_method() {
        for m in Method::ALL {
            assert_eq!(Method::from_bytes(m.as_str().as_bytes()), Some(m));
        }
        assert_eq!(Method::from_bytes(b"send"), None);
        assert_eq!(Method::from_bytes(b"PUBLISH"), None);
    }

    #[test]
    fn escaping_exemptions() {
        assert!(!Method::Connect.escapes_headers());
        assert!(!Method::Connected.escapes_headers());
        assert!(Method::Message.escapes_headers());
        assert!(Method::Send.has_body());
        assert!(!Method::Subscribe.has_body());
    }
}
