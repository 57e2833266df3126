//! Publish scope and provenance
//!
//! `Visibility` decides how far a published value travels; `Origin` records
//! whether it came from the server itself or from a connected peer.

/// How far a publish reaches
///
/// Ordered by wire value: `ClientOnly < ServerOnly < All`. Only `All`
/// is relayed over the wire to other connected peers; the two lower
/// scopes reach in-process subscribers only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Visibility {
    /// Reserved scope, delivered like `ServerOnly`
    ClientOnly = 0,
    /// In-process subscribers only
    #[default]
    ServerOnly = 1,
    /// In-process subscribers and every other connected peer
    All = 2,
}

impl Visibility {
    /// Convert from the numeric wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Visibility::ClientOnly),
            1 => Some(Visibility::ServerOnly),
            2 => Some(Visibility::All),
            _ => None,
        }
    }

    /// Convert from the ASCII digit used in publish frames
    pub fn from_digit(c: char) -> Option<Self> {
        c.to_digit(10)
            .and_then(|d| u8::try_from(d).ok())
            .and_then(Self::from_u8)
    }

    /// Numeric wire value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// ASCII digit used in publish frames
    pub fn as_digit(self) -> char {
        char::from(b'0' + self.as_u8())
    }

    /// Whether events with this scope are relayed to remote peers
    pub fn crosses_wire(self) -> bool {
        self > Visibility::ServerOnly
    }
}

/// Who published an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Server-side code (no connection involved)
    Server,
    /// A connected peer
    Connection,
}

impl Origin {
    /// Short lowercase label, used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Server => "server",
            Origin::Connection => "client",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Visibility::ClientOnly < Visibility::ServerOnly);
        assert!(Visibility::ServerOnly < Visibility::All);
    }

    #[test]
    fn test_digits() {
        assert_eq!(Visibility::from_digit('0'), Some(Visibility::ClientOnly));
        assert_eq!(Visibility::from_digit('1'), Some(Visibility::ServerOnly));
        assert_eq!(Visibility::from_digit('2'), Some(Visibility::All));
        assert_eq!(Visibility::from_digit('3'), None);
        assert_eq!(Visibility::from_digit('x'), None);

        assert_eq!(Visibility::All.as_digit(), '2');
        assert_eq!(Visibility::ClientOnly.as_digit(), '0');
    }

    #[test]
    fn test_only_all_crosses_wire() {
        assert!(!Visibility::ClientOnly.crosses_wire());
        assert!(!Visibility::ServerOnly.crosses_wire());
        assert!(Visibility::All.crosses_wire());
    }

    #[test]
    fn test_default_is_server_only() {
        assert_eq!(Visibility::default(), Visibility::ServerOnly);
    }

    #[test]
    fn test_origin_labels() {
        assert_eq!(Origin::Server.as_str(), "server");
        assert_eq!(Origin::Connection.to_string(), "client");
    }
}
