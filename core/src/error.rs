use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    #[error("Invalid word: {0}")]
    InvalidWord(String),

    #[error("Word length mismatch, expected: {0}, got: {1}")]
    WordLengthMismatch(usize, usize),

    #[error("Word contains characters outside the game alphabet")]
    AlphabetMismatch,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid bet range")]
    InvalidBetRange,

    #[error("Invalid reward multiplier")]
    InvalidMultiplier,

    #[error("Invalid number of tries")]
    InvalidMaxTries,

    #[error("Deposit does not cover the maximum payout")]
    DepositTooSmall,

    #[error("Invalid time limit")]
    InvalidTimeLimit,

    #[error("Amount below the withdrawal minimum")]
    BelowMinWithdraw,

    #[error("User not found: {0}")]
    UserNotFound(u64),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Lobby not found: {0}")]
    LobbyNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Game is not accepting deposits")]
    GameNotPending,

    #[error("Game is not active")]
    GameNotActive,

    #[error("Game still has open lobbies")]
    GameHasOpenLobbies,

    #[error("Not the game creator")]
    NotGameCreator,

    #[error("Invalid game status transition")]
    InvalidGameTransition,

    #[error("Lobby is not active")]
    LobbyNotActive,

    #[error("Lobby expired")]
    LobbyExpired,

    #[error("An open lobby already exists in this game")]
    LobbyAlreadyOpen,

    #[error("Not the lobby owner")]
    NotLobbyOwner,

    #[error("No tries left")]
    TriesExhausted,

    #[error("Currency mismatch")]
    CurrencyMismatch,

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Withdrawal is not in the expected status")]
    InvalidWithdrawStatus,

    #[error("Withdrawals are locked until {0}")]
    WithdrawLocked(u64),

    #[error("Short id space exhausted")]
    ShortIdExhausted,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Pool cannot cover the potential reward")]
    InsufficientPool,

    #[error("Rpc error: {0}")]
    RpcError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Balance underflow for user {0}")]
    BalanceUnderflow(u64),

    #[error("Reserve underflow for game {0}")]
    ReserveUnderflow(String),

    #[error("Pool underflow for game {0}")]
    PoolUnderflow(String),

    #[error("Math overflow")]
    MathOverflow,
}

/// Coarse classification used by the service boundary and the retry
/// policy of the background workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InsufficientFunds,
    Transient,
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            InvalidWord(_) | WordLengthMismatch(..) | AlphabetMismatch | InvalidAddress(_)
            | UnsupportedCurrency(_) | UnsupportedChain(_) | InvalidAmount | InvalidBetRange
            | InvalidMultiplier | InvalidMaxTries | DepositTooSmall | InvalidTimeLimit
            | BelowMinWithdraw => ErrorKind::Validation,

            UserNotFound(_) | GameNotFound(_) | LobbyNotFound(_) | TransactionNotFound(_) => {
                ErrorKind::NotFound
            }

            GameNotPending | GameNotActive | GameHasOpenLobbies | NotGameCreator
            | InvalidGameTransition | LobbyNotActive | LobbyExpired | LobbyAlreadyOpen
            | NotLobbyOwner | TriesExhausted | CurrencyMismatch | DuplicateTransaction(_)
            | InvalidWithdrawStatus | WithdrawLocked(_) | ShortIdExhausted => ErrorKind::Conflict,

            InsufficientBalance | InsufficientPool => ErrorKind::InsufficientFunds,

            RpcError(_) | StorageError(_) => ErrorKind::Transient,

            BalanceUnderflow(_) | ReserveUnderflow(_) | PoolUnderflow(_) | MathOverflow => {
                ErrorKind::Fatal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Errors that should quarantine the offending row instead of being
    /// retried: an invariant was violated and a retry cannot help.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type Result<T> = std::result::Result<T, Error>;
