//! Domain entities. Entities hold ids, not pointers; cross-entity
//! relationships are resolved through the ledger store.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::{Error, Result};

/// External platform account id of a user.
pub type UserId = u64;

/// Sentinel user for inbound funds that could not be routed to anyone.
pub const UNMATCHED_USER: UserId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Ton,
    Usdt,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ton => "ton",
            Currency::Usdt => "usdt",
        }
    }
}

impl TryFrom<&str> for Currency {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "ton" => Ok(Currency::Ton),
            "usdt" => Ok(Currency::Usdt),
            _ => Err(Error::UnsupportedCurrency(value.into())),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alphabet a game's words are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ru,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    /// Whether a normalized (lowercased, NFC) character belongs to this
    /// language's alphabet.
    pub fn allows(&self, c: char) -> bool {
        match self {
            Language::En => c.is_ascii_lowercase(),
            Language::Ru => ('а'..='я').contains(&c) || c == 'ё',
        }
    }

    pub fn matches(&self, word: &str) -> bool {
        !word.is_empty() && word.chars().all(|c| self.allows(c))
    }
}

impl TryFrom<&str> for Language {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "en" => Ok(Language::En),
            "ru" => Ok(Language::Ru),
            _ => Err(Error::InvalidWord(format!("unknown language: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Pending,
    Active,
    Inactive,
    Closed,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Pending => "pending",
            GameStatus::Active => "active",
            GameStatus::Inactive => "inactive",
            GameStatus::Closed => "closed",
        }
    }
}

impl TryFrom<&str> for GameStatus {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(GameStatus::Pending),
            "active" => Ok(GameStatus::Active),
            "inactive" => Ok(GameStatus::Inactive),
            "closed" => Ok(GameStatus::Closed),
            _ => Err(Error::StorageError(format!("bad game status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    Pending,
    Active,
    Won,
    Lost,
    Expired,
    Refunded,
}

impl LobbyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LobbyStatus::Pending => "pending",
            LobbyStatus::Active => "active",
            LobbyStatus::Won => "won",
            LobbyStatus::Lost => "lost",
            LobbyStatus::Expired => "expired",
            LobbyStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LobbyStatus::Won | LobbyStatus::Lost | LobbyStatus::Expired | LobbyStatus::Refunded
        )
    }
}

impl TryFrom<&str> for LobbyStatus {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(LobbyStatus::Pending),
            "active" => Ok(LobbyStatus::Active),
            "won" => Ok(LobbyStatus::Won),
            "lost" => Ok(LobbyStatus::Lost),
            "expired" => Ok(LobbyStatus::Expired),
            "refunded" => Ok(LobbyStatus::Refunded),
            _ => Err(Error::StorageError(format!("bad lobby status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdraw,
    Bet,
    Reward,
    Commission,
    Refund,
    GameDeposit,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Deposit => "deposit",
            TxKind::Withdraw => "withdraw",
            TxKind::Bet => "bet",
            TxKind::Reward => "reward",
            TxKind::Commission => "commission",
            TxKind::Refund => "refund",
            TxKind::GameDeposit => "game_deposit",
        }
    }
}

impl TryFrom<&str> for TxKind {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "deposit" => Ok(TxKind::Deposit),
            "withdraw" => Ok(TxKind::Withdraw),
            "bet" => Ok(TxKind::Bet),
            "reward" => Ok(TxKind::Reward),
            "commission" => Ok(TxKind::Commission),
            "refund" => Ok(TxKind::Refund),
            "game_deposit" => Ok(TxKind::GameDeposit),
            _ => Err(Error::StorageError(format!("bad tx kind: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirming,
    Completed,
    Failed,
    Canceled,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirming => "confirming",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
            TxStatus::Canceled => "canceled",
        }
    }
}

impl TryFrom<&str> for TxStatus {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(TxStatus::Pending),
            "confirming" => Ok(TxStatus::Confirming),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            "canceled" => Ok(TxStatus::Canceled),
            _ => Err(Error::StorageError(format!("bad tx status: {value}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub nick: String,
    pub wallet_addr: Option<String>,
    pub wins: u32,
    pub losses: u32,
    pub withdraw_locked_until: Option<u64>,
    pub created_at: u64,
}

/// Per-currency funds of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub available: Amount,
    pub pending_withdraw: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub short_id: String,
    pub creator_id: UserId,
    pub secret_word: String,
    pub word_len: u32,
    pub language: Language,
    pub max_tries: u32,
    pub multiplier_bps: u32,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub currency: Currency,
    pub pool: Amount,
    pub reserved: Amount,
    pub required_deposit: Amount,
    pub deposited: Amount,
    pub time_limit_secs: u64,
    pub status: GameStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Public projection of a game; never exposes the secret word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    pub id: Uuid,
    pub short_id: String,
    pub creator_id: UserId,
    pub word_len: u32,
    pub language: Language,
    pub max_tries: u32,
    pub multiplier_bps: u32,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub currency: Currency,
    pub pool: Amount,
    pub reserved: Amount,
    pub time_limit_secs: u64,
    pub status: GameStatus,
}

impl From<&Game> for GameView {
    fn from(g: &Game) -> Self {
        Self {
            id: g.id,
            short_id: g.short_id.clone(),
            creator_id: g.creator_id,
            word_len: g.word_len,
            language: g.language,
            max_tries: g.max_tries,
            multiplier_bps: g.multiplier_bps,
            min_bet: g.min_bet,
            max_bet: g.max_bet,
            currency: g.currency,
            pool: g.pool,
            reserved: g.reserved,
            time_limit_secs: g.time_limit_secs,
            status: g.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: Uuid,
    pub game_id: Uuid,
    pub user_id: UserId,
    pub bet: Amount,
    pub potential_reward: Amount,
    pub max_tries: u32,
    pub tries_used: u32,
    pub status: LobbyStatus,
    pub deposit_hash: String,
    pub currency: Currency,
    pub started_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LetterMark {
    Miss,
    Present,
    Hit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub lobby_id: Uuid,
    pub word: String,
    pub marks: Vec<LetterMark>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: TxKind,
    pub amount: Amount,
    pub fee: Amount,
    pub currency: Currency,
    pub status: TxStatus,
    pub tx_hash: Option<String>,
    pub lt: Option<u64>,
    pub from_addr: Option<String>,
    pub to_addr: Option<String>,
    pub comment: Option<String>,
    pub game_id: Option<Uuid>,
    pub lobby_id: Option<Uuid>,
    pub submit_attempts: u32,
    pub submission_id: Option<String>,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    PlayerWin,
    CreatorWin,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::PlayerWin => "player_win",
            HistoryKind::CreatorWin => "creator_win",
        }
    }
}

impl TryFrom<&str> for HistoryKind {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "player_win" => Ok(HistoryKind::PlayerWin),
            "creator_win" => Ok(HistoryKind::CreatorWin),
            _ => Err(Error::StorageError(format!("bad history kind: {value}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: Uuid,
    pub game_id: Uuid,
    pub lobby_id: Uuid,
    pub user_id: UserId,
    pub kind: HistoryKind,
    pub amount: Amount,
    pub currency: Currency,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPaymentStatus {
    Pending,
    Completed,
    Expired,
    Canceled,
}

impl PendingPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingPaymentStatus::Pending => "pending",
            PendingPaymentStatus::Completed => "completed",
            PendingPaymentStatus::Expired => "expired",
            PendingPaymentStatus::Canceled => "canceled",
        }
    }
}

impl TryFrom<&str> for PendingPaymentStatus {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(PendingPaymentStatus::Pending),
            "completed" => Ok(PendingPaymentStatus::Completed),
            "expired" => Ok(PendingPaymentStatus::Expired),
            "canceled" => Ok(PendingPaymentStatus::Canceled),
            _ => Err(Error::StorageError(format!("bad payment status: {value}"))),
        }
    }
}

/// An inbound payment the UI is waiting for. Lets a deep link be shown
/// before the transfer lands; swept once the deadline passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub id: Uuid,
    pub comment: String,
    pub user_id: UserId,
    pub game_id: Uuid,
    pub status: PendingPaymentStatus,
    pub created_at: u64,
    pub expires_at: u64,
}

/// Short ids route on-chain comments to games: 6-8 chars of `[A-Za-z0-9]`.
pub const SHORT_ID_LEN: usize = 6;

pub fn random_short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_ID_LEN)
        .map(char::from)
        .collect()
}

pub fn is_valid_short_id(s: &str) -> bool {
    (6..=8).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric())
}
