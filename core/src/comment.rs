//! On-chain payment comment grammar.
//!
//! Inbound: `<KIND>_<SHORT_ID>_<TIMESTAMP>` where `KIND` is `GD` (game
//! deposit) or `LB` (lobby bet), `SHORT_ID` is 6-8 chars of
//! `[A-Za-z0-9]` and `TIMESTAMP` is base-10 epoch seconds. The parser
//! is lenient: a missing third segment makes the whole remainder the
//! short id. Outbound withdrawals carry `WD_<txid>`.

use uuid::Uuid;

use crate::types::is_valid_short_id;

pub const MAX_COMMENT_BYTES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    GameDeposit,
    LobbyBet,
}

impl CommentKind {
    fn tag(&self) -> &'static str {
        match self {
            CommentKind::GameDeposit => "GD",
            CommentKind::LobbyBet => "LB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentComment {
    pub kind: CommentKind,
    pub short_id: String,
    pub timestamp: Option<u64>,
}

impl PaymentComment {
    pub fn new(kind: CommentKind, short_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            kind,
            short_id: short_id.into(),
            timestamp: Some(timestamp),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        if s.len() > MAX_COMMENT_BYTES {
            return None;
        }
        let (tag, rest) = s.split_once('_')?;
        let kind = match tag {
            "GD" => CommentKind::GameDeposit,
            "LB" => CommentKind::LobbyBet,
            _ => return None,
        };
        let (short_id, timestamp) = match rest.split_once('_') {
            Some((short, ts)) => match ts.parse::<u64>() {
                Ok(ts) => (short, Some(ts)),
                // Lenient: an unparsable tail folds into the short id,
                // which then fails the charset check below.
                Err(_) => (rest, None),
            },
            None => (rest, None),
        };
        if !is_valid_short_id(short_id) {
            return None;
        }
        Some(Self {
            kind,
            short_id: short_id.to_string(),
            timestamp,
        })
    }

    pub fn encode(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{}_{}_{}", self.kind.tag(), self.short_id, ts),
            None => format!("{}_{}", self.kind.tag(), self.short_id),
        }
    }
}

/// Comment attached to an outbound withdrawal; the reconciler matches
/// it back to finalize the row.
pub fn withdraw_comment(tx_id: &Uuid) -> String {
    format!("WD_{}", tx_id.simple())
}

pub fn is_withdraw_comment(s: &str) -> bool {
    s.strip_prefix("WD_")
        .map(|rest| Uuid::parse_str(rest).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let c = PaymentComment::parse("GD_ABCDEF_1700000000").unwrap();
        assert_eq!(c.kind, CommentKind::GameDeposit);
        assert_eq!(c.short_id, "ABCDEF");
        assert_eq!(c.timestamp, Some(1700000000));

        let c = PaymentComment::parse("LB_a1B2c3D4_1").unwrap();
        assert_eq!(c.kind, CommentKind::LobbyBet);
        assert_eq!(c.short_id, "a1B2c3D4");
    }

    #[test]
    fn test_parse_lenient_missing_timestamp() {
        let c = PaymentComment::parse("LB_ABCDEF").unwrap();
        assert_eq!(c.short_id, "ABCDEF");
        assert_eq!(c.timestamp, None);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(PaymentComment::parse("").is_none());
        assert!(PaymentComment::parse("hello there").is_none());
        assert!(PaymentComment::parse("XX_ABCDEF_1700000000").is_none());
        assert!(PaymentComment::parse("GD_abc_1700000000").is_none()); // short id too short
        assert!(PaymentComment::parse("GD_ABC-EF_1700000000").is_none());
        assert!(PaymentComment::parse("GD_ABCDEF_notanumber").is_none());
        let long = format!("GD_ABCDEF_{}", "9".repeat(120));
        assert!(PaymentComment::parse(&long).is_none());
    }

    #[test]
    fn test_encode_round_trip() {
        let c = PaymentComment::new(CommentKind::LobbyBet, "ABCDEF", 1700000100);
        assert_eq!(c.encode(), "LB_ABCDEF_1700000100");
        assert_eq!(PaymentComment::parse(&c.encode()).unwrap(), c);
    }

    #[test]
    fn test_withdraw_comment() {
        let id = Uuid::new_v4();
        let c = withdraw_comment(&id);
        assert!(c.starts_with("WD_"));
        assert!(is_withdraw_comment(&c));
        assert!(!is_withdraw_comment("WD_nope"));
        assert!(!is_withdraw_comment("GD_ABCDEF"));
    }
}
