//! Identifier minting for subscriptions, receipts and messages.
//!
//! Ids look like `<seq><tag><connection>@<anchor>`, all numbers in
//! lower-case hex. The anchor is the number of minutes between 2020-01-01
//! and the moment the [`Epoch`] was taken, so ids stay unique across
//! process restarts as well as across reconnects.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 2020-01-01T00:00:00Z in minutes since the Unix epoch.
const ANCHOR_BASE_MINUTES: u64 = 1_577_836_800 / 60;

/// Process-level time anchor shared by every id a connection mints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epoch {
    anchor: String,
}

impl Epoch {
    pub fn now() -> Self {
        Self::at(SystemTime::now())
    }

    pub fn at(time: SystemTime) -> Self {
        let minutes = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
            / 60;
        Self {
            anchor: format!("{:x}", minutes.saturating_sub(ANCHOR_BASE_MINUTES)),
        }
    }

    /// A fixed anchor, mostly for tests.
    pub fn fixed(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
        }
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Subscription,
    Receipt,
    Message,
}

impl IdKind {
    const fn tag(self) -> char {
        match self {
            IdKind::Subscription => 'S',
            IdKind::Receipt => 'R',
            IdKind::Message => 'M',
        }
    }
}

/// Per-connection id source.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    epoch: Epoch,
    connection: u64,
    seq: u64,
}

impl IdGenerator {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            connection: 0,
            seq: 0,
        }
    }

    /// Start a new connection epoch. Called each time the transport
    /// connects.
    pub fn next_connection(&mut self) -> u64 {
        self.connection += 1;
        self.connection
    }

    pub fn connection(&self) -> u64 {
        self.connection
    }

    pub fn next(&mut self, kind: IdKind) -> String {
        self.seq += 1;
        format!(
            "{:x}{}{:x}@{}",
            self.seq,
            kind.tag(),
            self.connection,
            self.epoch.anchor()
        )
    }

    pub fn subscription(&mut self) -> String {
        self.next(IdKind::Subscription)
    }

    pub fn receipt(&mut self) -> String {
        self.next(IdKind::Receipt)
    }

    pub fn message(&mut self) -> String {
        self.next(IdKind::Message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_counts_minutes_since_2020() {
        let t = UNIX_EPOCH + Duration::from_secs(1_577_836_800 + 255 * 60 + 59);
        assert_eq!(Epoch::at(t).anchor(), "ff");
        assert_eq!(Epoch::at(UNIX_EPOCH).anchor(), "0");
    }

    #[test]
    fn ids_carry_kind_connection_and_anchor() {
        let mut ids = IdGenerator::new(Epoch::fixed("1a"));
        ids.next_connection();
        assert_eq!(ids.receipt(), "1R1@1a");
        assert_eq!(ids.subscription(), "2S1@1a");
        ids.next_connection();
        assert_eq!(ids.message(), "3M2@1a");
    }

    #[test]
    fn ids_are_unique() {
        let mut ids = IdGenerator::new(Epoch::fixed("0"));
        let mut seen = std::collections::HashSet::new();
        for i in 0..500 {
            if i % 100 == 0 {
                ids.next_connection();
            }
            assert!(seen.insert(ids.receipt()));
        }
    }
}
