//! The ledger store contract. One store, transactional operations: all
//! double-sided money updates happen inside a single store transaction
//! behind these methods.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::chain::ChainTx;
use crate::error::Result;
use crate::types::{
    Attempt, BalanceView, Currency, Game, GameStatus, HistoryEvent, LedgerEntry, LetterMark,
    Lobby, PendingPayment, User, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditDepositParams {
    pub game_id: Uuid,
    pub currency: Currency,
    pub amount: Amount,
    pub tx_hash: String,
    pub lt: u64,
    pub from_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositOutcome {
    pub game: Game,
    /// False when the hash had been applied before (idempotent replay).
    pub applied: bool,
    pub activated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenLobbyParams {
    pub game_id: Uuid,
    pub user_id: UserId,
    /// Raw inbound amount; bets over `max_bet` are capped and the
    /// excess is credited to the user's balance.
    pub amount: Amount,
    pub currency: Currency,
    pub tx_hash: String,
    pub lt: u64,
    pub now: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAttemptParams {
    pub lobby_id: Uuid,
    pub user_id: UserId,
    pub word: String,
    pub marks: Vec<LetterMark>,
    pub now: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "payout")]
pub enum GuessVerdict {
    InProgress,
    /// Net amount credited to the player after commission.
    Won(Amount),
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub attempt: Attempt,
    pub lobby: Lobby,
    pub verdict: GuessVerdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryResolution {
    /// No attempts were made: the bet went back to the player.
    Refunded(Amount),
    /// At least one attempt was made: treated as a loss.
    Forfeited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredLobby {
    pub lobby: Lobby,
    pub resolution: ExpiryResolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestWithdrawParams {
    pub user_id: UserId,
    pub amount: Amount,
    pub fee: Amount,
    pub to_addr: String,
    pub currency: Currency,
    pub now: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawRelease {
    pub attempts: u32,
    /// True when the attempt bound was hit and the row was failed and
    /// refunded instead of being released back to pending.
    pub failed: bool,
}

#[async_trait]
pub trait LedgerT: Send + Sync {
    // ---- users ----------------------------------------------------

    /// Create the user row if missing, refresh the nick otherwise.
    async fn ensure_user(&self, id: UserId, nick: &str) -> Result<User>;

    async fn get_user(&self, id: UserId) -> Result<User>;

    async fn set_wallet_addr(&self, id: UserId, addr: &str) -> Result<()>;

    async fn find_user_by_wallet(&self, addr: &str) -> Result<Option<User>>;

    async fn balance(&self, id: UserId, currency: Currency) -> Result<BalanceView>;

    // ---- games ----------------------------------------------------

    async fn insert_game(&self, game: &Game) -> Result<()>;

    async fn get_game(&self, id: Uuid) -> Result<Game>;

    async fn get_game_by_short_id(&self, short_id: &str) -> Result<Game>;

    async fn short_id_taken(&self, short_id: &str) -> Result<bool>;

    async fn list_active_games(&self, limit: usize) -> Result<Vec<Game>>;

    /// Creator-driven pause/resume. Only `active -> inactive` and
    /// `inactive -> active` are allowed.
    async fn set_game_status(&self, id: Uuid, creator: UserId, to: GameStatus) -> Result<Game>;

    /// Close a game with no open lobbies and credit the remaining pool
    /// back to the creator. Returns the refunded remainder.
    async fn close_game(&self, id: Uuid, creator: UserId) -> Result<Amount>;

    // ---- inbound application (reconciler) -------------------------

    async fn tx_seen(&self, tx_hash: &str) -> Result<bool>;

    /// Idempotent by `tx_hash`. Adds to the pool; flips the game
    /// `pending -> active` once the cumulative deposit covers the
    /// required amount.
    async fn credit_game_deposit(&self, params: CreditDepositParams) -> Result<DepositOutcome>;

    /// Creates an active lobby funded by an inbound bet, reserving
    /// `bet * multiplier` out of the pool.
    async fn open_lobby(&self, params: OpenLobbyParams) -> Result<Lobby>;

    /// Comment-less inbound transfer routed to a user by wallet address.
    async fn record_user_deposit(&self, user_id: UserId, tx: &ChainTx) -> Result<()>;

    /// Inbound transfer that could not be routed; kept at
    /// `status=pending` under the sentinel user for manual adjudication.
    async fn record_unmatched(&self, tx: &ChainTx, note: &str) -> Result<()>;

    // ---- game play ------------------------------------------------

    async fn get_lobby(&self, id: Uuid) -> Result<Lobby>;

    /// Appends an attempt and settles terminal outcomes (win on
    /// all-hit, loss on the last failed try) in the same transaction.
    /// Expiry is re-checked here: writes against an expired lobby are
    /// rejected even before the sweeper has run.
    async fn record_attempt(&self, params: RecordAttemptParams) -> Result<AttemptOutcome>;

    /// Expire one active lobby: refund when no attempts were made,
    /// forfeit otherwise.
    async fn expire_lobby(&self, lobby_id: Uuid, now: u64) -> Result<ExpiredLobby>;

    async fn expired_active_lobbies(&self, now: u64, limit: usize) -> Result<Vec<Lobby>>;

    // ---- withdrawals ----------------------------------------------

    /// Moves `amount` from available to pending withdrawal and writes a
    /// pending `withdraw` row carrying the outbound comment.
    async fn request_withdraw(&self, params: RequestWithdrawParams) -> Result<LedgerEntry>;

    /// Select-and-flip `pending -> confirming` in one transaction;
    /// the claim is the at-most-once pickup for submission.
    async fn claim_pending_withdrawals(&self, limit: usize) -> Result<Vec<LedgerEntry>>;

    async fn record_withdraw_submission(&self, tx_id: Uuid, submission_id: &str) -> Result<()>;

    /// Compensate a failed submission: `confirming -> pending` with the
    /// attempt counter bumped, or fail-and-refund once `max_attempts`
    /// is reached.
    async fn release_withdrawal(
        &self,
        tx_id: Uuid,
        max_attempts: u32,
        error: &str,
    ) -> Result<WithdrawRelease>;

    async fn fail_withdraw(&self, tx_id: Uuid, error: &str) -> Result<()>;

    /// Complete a confirming withdrawal matched by its outbound
    /// comment. Returns false when no row matched.
    async fn finalize_withdraw(&self, comment: &str, tx_hash: &str, lt: u64) -> Result<bool>;

    // ---- pending payments -----------------------------------------

    async fn insert_pending_payment(&self, payment: &PendingPayment) -> Result<()>;

    async fn complete_pending_payment(&self, comment: &str) -> Result<()>;

    async fn expire_pending_payments(&self, now: u64) -> Result<usize>;

    // ---- chain watermark ------------------------------------------

    async fn last_lt(&self, chain: &str) -> Result<u64>;

    /// Monotonic: regressions are ignored.
    async fn advance_last_lt(&self, chain: &str, lt: u64) -> Result<()>;

    // ---- reads ----------------------------------------------------

    async fn lobbies_by_user(&self, user: UserId, limit: usize) -> Result<Vec<Lobby>>;

    async fn attempts_by_lobby(&self, lobby: Uuid) -> Result<Vec<Attempt>>;

    async fn history_by_user(&self, user: UserId, limit: usize) -> Result<Vec<HistoryEvent>>;

    async fn transactions_by_user(&self, user: UserId, limit: usize)
        -> Result<Vec<LedgerEntry>>;
}
