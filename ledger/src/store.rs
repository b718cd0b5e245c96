//! The sqlite-backed ledger. Every transactional operation locks the
//! connection, runs inside one rusqlite transaction and commits at the
//! end; an early return rolls back. Checked arithmetic everywhere a
//! balance, pool or reservation moves; an underflow is an invariant
//! violation and surfaces as a fatal error.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use wordpool_core::amount::{mul_bps, Amount};
use wordpool_core::chain::ChainTx;
use wordpool_core::comment::withdraw_comment;
use wordpool_core::engine::is_all_hit;
use wordpool_core::error::{Error, Result};
use wordpool_core::now_secs;
use wordpool_core::store::{
    AttemptOutcome, CreditDepositParams, DepositOutcome, ExpiredLobby, ExpiryResolution,
    GuessVerdict, LedgerT, OpenLobbyParams, RecordAttemptParams, RequestWithdrawParams,
    WithdrawRelease,
};
use wordpool_core::types::{
    Attempt, BalanceView, Currency, Game, GameStatus, HistoryEvent, HistoryKind, Language,
    LedgerEntry, Lobby, LobbyStatus, PendingPayment, TxKind, TxStatus, User, UserId,
    UNMATCHED_USER,
};

use crate::schema::init_tables;

pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    commission_rate_bps: u32,
}

impl SqliteLedger {
    pub fn try_new(db_path: &str, commission_rate_bps: u32) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        init_tables(&conn).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            commission_rate_bps,
        })
    }

    pub fn try_new_mem(commission_rate_bps: u32) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        init_tables(&conn).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            commission_rate_bps,
        })
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::StorageError(e.to_string())
}

/// Lift a domain conversion error into a rusqlite row-mapping error.
fn conv<T>(res: Result<T>) -> rusqlite::Result<T> {
    res.map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ---- row mappers --------------------------------------------------

const GAME_COLS: &str = "id, short_id, creator_id, secret_word, word_len, language, max_tries, \
     multiplier_bps, min_bet, max_bet, currency, pool, reserved, required_deposit, deposited, \
     time_limit_secs, status, created_at, updated_at";

fn game_from_row(row: &Row) -> rusqlite::Result<Game> {
    Ok(Game {
        id: parse_uuid(row.get(0)?)?,
        short_id: row.get(1)?,
        creator_id: row.get(2)?,
        secret_word: row.get(3)?,
        word_len: row.get(4)?,
        language: conv(Language::try_from(row.get::<_, String>(5)?.as_str()))?,
        max_tries: row.get(6)?,
        multiplier_bps: row.get(7)?,
        min_bet: row.get(8)?,
        max_bet: row.get(9)?,
        currency: conv(Currency::try_from(row.get::<_, String>(10)?.as_str()))?,
        pool: row.get(11)?,
        reserved: row.get(12)?,
        required_deposit: row.get(13)?,
        deposited: row.get(14)?,
        time_limit_secs: row.get(15)?,
        status: conv(GameStatus::try_from(row.get::<_, String>(16)?.as_str()))?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

const LOBBY_COLS: &str = "id, game_id, user_id, bet, potential_reward, max_tries, tries_used, \
     status, deposit_hash, currency, started_at, expires_at";

fn lobby_from_row(row: &Row) -> rusqlite::Result<Lobby> {
    Ok(Lobby {
        id: parse_uuid(row.get(0)?)?,
        game_id: parse_uuid(row.get(1)?)?,
        user_id: row.get(2)?,
        bet: row.get(3)?,
        potential_reward: row.get(4)?,
        max_tries: row.get(5)?,
        tries_used: row.get(6)?,
        status: conv(LobbyStatus::try_from(row.get::<_, String>(7)?.as_str()))?,
        deposit_hash: row.get(8)?,
        currency: conv(Currency::try_from(row.get::<_, String>(9)?.as_str()))?,
        started_at: row.get(10)?,
        expires_at: row.get(11)?,
    })
}

const ENTRY_COLS: &str = "id, user_id, kind, amount, fee, currency, status, tx_hash, lt, \
     from_addr, to_addr, comment, game_id, lobby_id, submit_attempts, submission_id, error, \
     created_at, updated_at";

fn entry_from_row(row: &Row) -> rusqlite::Result<LedgerEntry> {
    let game_id: Option<String> = row.get(12)?;
    let lobby_id: Option<String> = row.get(13)?;
    Ok(LedgerEntry {
        id: parse_uuid(row.get(0)?)?,
        user_id: row.get(1)?,
        kind: conv(TxKind::try_from(row.get::<_, String>(2)?.as_str()))?,
        amount: row.get(3)?,
        fee: row.get(4)?,
        currency: conv(Currency::try_from(row.get::<_, String>(5)?.as_str()))?,
        status: conv(TxStatus::try_from(row.get::<_, String>(6)?.as_str()))?,
        tx_hash: row.get(7)?,
        lt: row.get(8)?,
        from_addr: row.get(9)?,
        to_addr: row.get(10)?,
        comment: row.get(11)?,
        game_id: game_id.map(parse_uuid).transpose()?,
        lobby_id: lobby_id.map(parse_uuid).transpose()?,
        submit_attempts: row.get(14)?,
        submission_id: row.get(15)?,
        error: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        nick: row.get(1)?,
        wallet_addr: row.get(2)?,
        wins: row.get(3)?,
        losses: row.get(4)?,
        withdraw_locked_until: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn attempt_from_row(row: &Row) -> rusqlite::Result<Attempt> {
    let marks: String = row.get(3)?;
    Ok(Attempt {
        id: parse_uuid(row.get(0)?)?,
        lobby_id: parse_uuid(row.get(1)?)?,
        word: row.get(2)?,
        marks: serde_json::from_str(&marks).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: row.get(4)?,
    })
}

// ---- balance helpers ----------------------------------------------

fn ensure_balance_row(conn: &Connection, user: UserId, currency: Currency) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO balances (user_id, currency, available, pending_withdraw)
         VALUES (?1, ?2, 0, 0)",
        params![user, currency.as_str()],
    )
    .map_err(db_err)?;
    Ok(())
}

fn read_balance(conn: &Connection, user: UserId, currency: Currency) -> Result<BalanceView> {
    let view = conn
        .query_row(
            "SELECT available, pending_withdraw FROM balances
             WHERE user_id = ?1 AND currency = ?2",
            params![user, currency.as_str()],
            |row| {
                Ok(BalanceView {
                    available: row.get(0)?,
                    pending_withdraw: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(db_err)?;
    Ok(view.unwrap_or_default())
}

fn write_balance(
    conn: &Connection,
    user: UserId,
    currency: Currency,
    view: BalanceView,
) -> Result<()> {
    ensure_balance_row(conn, user, currency)?;
    conn.execute(
        "UPDATE balances SET available = ?3, pending_withdraw = ?4
         WHERE user_id = ?1 AND currency = ?2",
        params![user, currency.as_str(), view.available, view.pending_withdraw],
    )
    .map_err(db_err)?;
    Ok(())
}

fn add_available(conn: &Connection, user: UserId, currency: Currency, amount: Amount) -> Result<()> {
    let mut view = read_balance(conn, user, currency)?;
    view.available = view.available.checked_add(amount).ok_or(Error::MathOverflow)?;
    write_balance(conn, user, currency, view)
}

fn sub_available(
    conn: &Connection,
    user: UserId,
    currency: Currency,
    amount: Amount,
) -> Result<()> {
    let mut view = read_balance(conn, user, currency)?;
    view.available = view
        .available
        .checked_sub(amount)
        .ok_or(Error::InsufficientBalance)?;
    write_balance(conn, user, currency, view)
}

fn add_pending(conn: &Connection, user: UserId, currency: Currency, amount: Amount) -> Result<()> {
    let mut view = read_balance(conn, user, currency)?;
    view.pending_withdraw = view
        .pending_withdraw
        .checked_add(amount)
        .ok_or(Error::MathOverflow)?;
    write_balance(conn, user, currency, view)
}

/// Pending withdrawal funds were committed earlier; running out here
/// means the books are broken.
fn sub_pending(conn: &Connection, user: UserId, currency: Currency, amount: Amount) -> Result<()> {
    let mut view = read_balance(conn, user, currency)?;
    view.pending_withdraw = view
        .pending_withdraw
        .checked_sub(amount)
        .ok_or(Error::BalanceUnderflow(user))?;
    write_balance(conn, user, currency, view)
}

// ---- entity helpers -----------------------------------------------

fn fetch_game(conn: &Connection, id: Uuid) -> Result<Game> {
    conn.query_row(
        &format!("SELECT {GAME_COLS} FROM games WHERE id = ?1"),
        params![id.to_string()],
        game_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| Error::GameNotFound(id.to_string()))
}

fn fetch_game_by_short_id(conn: &Connection, short_id: &str) -> Result<Game> {
    conn.query_row(
        &format!("SELECT {GAME_COLS} FROM games WHERE short_id = ?1"),
        params![short_id],
        game_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| Error::GameNotFound(short_id.into()))
}

fn store_game_money(conn: &Connection, game: &Game) -> Result<()> {
    conn.execute(
        "UPDATE games SET pool = ?2, reserved = ?3, deposited = ?4, status = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            game.id.to_string(),
            game.pool,
            game.reserved,
            game.deposited,
            game.status.as_str(),
            game.updated_at,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn fetch_lobby(conn: &Connection, id: Uuid) -> Result<Lobby> {
    conn.query_row(
        &format!("SELECT {LOBBY_COLS} FROM lobbies WHERE id = ?1"),
        params![id.to_string()],
        lobby_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| Error::LobbyNotFound(id.to_string()))
}

fn store_lobby_state(conn: &Connection, lobby: &Lobby) -> Result<()> {
    conn.execute(
        "UPDATE lobbies SET tries_used = ?2, status = ?3 WHERE id = ?1",
        params![
            lobby.id.to_string(),
            lobby.tries_used,
            lobby.status.as_str()
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn open_lobby_exists(conn: &Connection, game_id: Uuid, user: UserId) -> Result<bool> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM lobbies
             WHERE game_id = ?1 AND user_id = ?2 AND status = 'active'",
            params![game_id.to_string(), user],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

fn count_open_lobbies(conn: &Connection, game_id: Uuid) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM lobbies WHERE game_id = ?1 AND status = 'active'",
        params![game_id.to_string()],
        |row| row.get(0),
    )
    .map_err(db_err)
}

fn tx_hash_exists(conn: &Connection, hash: &str) -> Result<bool> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM transactions WHERE tx_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

fn bump_counter(conn: &Connection, user: UserId, column: &str) -> Result<()> {
    conn.execute(
        &format!("UPDATE users SET {column} = {column} + 1 WHERE id = ?1"),
        params![user],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_history(
    conn: &Connection,
    game_id: Uuid,
    lobby_id: Uuid,
    user: UserId,
    kind: HistoryKind,
    amount: Amount,
    currency: Currency,
    now: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO history (id, game_id, lobby_id, user_id, kind, amount, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            Uuid::new_v4().to_string(),
            game_id.to_string(),
            lobby_id.to_string(),
            user,
            kind.as_str(),
            amount,
            currency.as_str(),
            now,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// A ledger row about to be written; optional fields default to NULL.
struct NewEntry {
    id: Uuid,
    user_id: UserId,
    kind: TxKind,
    amount: Amount,
    fee: Amount,
    currency: Currency,
    status: TxStatus,
    tx_hash: Option<String>,
    lt: Option<u64>,
    from_addr: Option<String>,
    to_addr: Option<String>,
    comment: Option<String>,
    game_id: Option<Uuid>,
    lobby_id: Option<Uuid>,
    error: Option<String>,
    now: u64,
}

impl NewEntry {
    fn new(user_id: UserId, kind: TxKind, amount: Amount, currency: Currency, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            fee: 0,
            currency,
            status: TxStatus::Completed,
            tx_hash: None,
            lt: None,
            from_addr: None,
            to_addr: None,
            comment: None,
            game_id: None,
            lobby_id: None,
            error: None,
            now,
        }
    }
}

fn insert_entry(conn: &Connection, e: &NewEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (id, user_id, kind, amount, fee, currency, status, tx_hash, lt,
            from_addr, to_addr, comment, game_id, lobby_id, submit_attempts, submission_id, error,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 0, NULL, ?15,
            ?16, ?16)",
        params![
            e.id.to_string(),
            e.user_id,
            e.kind.as_str(),
            e.amount,
            e.fee,
            e.currency.as_str(),
            e.status.as_str(),
            e.tx_hash,
            e.lt,
            e.from_addr,
            e.to_addr,
            e.comment,
            e.game_id.map(|id| id.to_string()),
            e.lobby_id.map(|id| id.to_string()),
            e.error,
            e.now,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn fetch_withdraw(conn: &Connection, tx_id: Uuid) -> Result<LedgerEntry> {
    let entry = conn
        .query_row(
            &format!("SELECT {ENTRY_COLS} FROM transactions WHERE id = ?1"),
            params![tx_id.to_string()],
            entry_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::TransactionNotFound(tx_id.to_string()))?;
    if entry.kind != TxKind::Withdraw {
        return Err(Error::InvalidWithdrawStatus);
    }
    Ok(entry)
}

// ---- settlement ---------------------------------------------------

/// Pay the lobby out of the pool: the payout and the winning stake both
/// leave the pool, the reservation is released and the player receives
/// the reward net of commission.
fn settle_win(
    conn: &Connection,
    game: &mut Game,
    lobby: &Lobby,
    commission_rate_bps: u32,
    now: u64,
) -> Result<Amount> {
    game.pool = game
        .pool
        .checked_sub(lobby.potential_reward)
        .and_then(|p| p.checked_sub(lobby.bet))
        .ok_or_else(|| Error::PoolUnderflow(game.short_id.clone()))?;
    game.reserved = game
        .reserved
        .checked_sub(lobby.potential_reward)
        .ok_or_else(|| Error::ReserveUnderflow(game.short_id.clone()))?;
    game.updated_at = now;

    let commission = mul_bps(lobby.potential_reward, commission_rate_bps)?;
    let net = lobby
        .potential_reward
        .checked_sub(commission)
        .ok_or(Error::MathOverflow)?;

    add_available(conn, lobby.user_id, lobby.currency, net)?;

    let mut reward = NewEntry::new(lobby.user_id, TxKind::Reward, net, lobby.currency, now);
    reward.game_id = Some(game.id);
    reward.lobby_id = Some(lobby.id);
    insert_entry(conn, &reward)?;

    let mut fee_row = NewEntry::new(
        lobby.user_id,
        TxKind::Commission,
        commission,
        lobby.currency,
        now,
    );
    fee_row.game_id = Some(game.id);
    fee_row.lobby_id = Some(lobby.id);
    insert_entry(conn, &fee_row)?;

    insert_history(
        conn,
        game.id,
        lobby.id,
        lobby.user_id,
        HistoryKind::PlayerWin,
        net,
        lobby.currency,
        now,
    )?;
    bump_counter(conn, lobby.user_id, "wins")?;
    store_game_money(conn, game)?;
    Ok(net)
}

/// The bet stays in the pool; only the reservation is released.
fn settle_loss(conn: &Connection, game: &mut Game, lobby: &Lobby, now: u64) -> Result<()> {
    game.reserved = game
        .reserved
        .checked_sub(lobby.potential_reward)
        .ok_or_else(|| Error::ReserveUnderflow(game.short_id.clone()))?;
    game.updated_at = now;

    insert_history(
        conn,
        game.id,
        lobby.id,
        lobby.user_id,
        HistoryKind::CreatorWin,
        lobby.bet,
        lobby.currency,
        now,
    )?;
    bump_counter(conn, lobby.user_id, "losses")?;
    store_game_money(conn, game)?;
    Ok(())
}

#[async_trait]
impl LedgerT for SqliteLedger {
    // ---- users ----------------------------------------------------

    async fn ensure_user(&self, id: UserId, nick: &str) -> Result<User> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, nick, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET nick = excluded.nick",
            params![id, nick, now_secs()],
        )
        .map_err(db_err)?;
        conn.query_row(
            "SELECT id, nick, wallet_addr, wins, losses, withdraw_locked_until, created_at
             FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .map_err(db_err)
    }

    async fn get_user(&self, id: UserId) -> Result<User> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, nick, wallet_addr, wins, losses, withdraw_locked_until, created_at
             FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or(Error::UserNotFound(id))
    }

    async fn set_wallet_addr(&self, id: UserId, addr: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let n = conn
            .execute(
                "UPDATE users SET wallet_addr = ?2 WHERE id = ?1",
                params![id, addr],
            )
            .map_err(db_err)?;
        if n == 0 {
            return Err(Error::UserNotFound(id));
        }
        Ok(())
    }

    async fn find_user_by_wallet(&self, addr: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, nick, wallet_addr, wins, losses, withdraw_locked_until, created_at
             FROM users WHERE wallet_addr = ?1",
            params![addr],
            user_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn balance(&self, id: UserId, currency: Currency) -> Result<BalanceView> {
        let conn = self.conn.lock().await;
        read_balance(&conn, id, currency)
    }

    // ---- games ----------------------------------------------------

    async fn insert_game(&self, game: &Game) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT INTO games ({GAME_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                 ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                game.id.to_string(),
                game.short_id,
                game.creator_id,
                game.secret_word,
                game.word_len,
                game.language.as_str(),
                game.max_tries,
                game.multiplier_bps,
                game.min_bet,
                game.max_bet,
                game.currency.as_str(),
                game.pool,
                game.reserved,
                game.required_deposit,
                game.deposited,
                game.time_limit_secs,
                game.status.as_str(),
                game.created_at,
                game.updated_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_game(&self, id: Uuid) -> Result<Game> {
        let conn = self.conn.lock().await;
        fetch_game(&conn, id)
    }

    async fn get_game_by_short_id(&self, short_id: &str) -> Result<Game> {
        let conn = self.conn.lock().await;
        fetch_game_by_short_id(&conn, short_id)
    }

    async fn short_id_taken(&self, short_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM games WHERE short_id = ?1",
                params![short_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    async fn list_active_games(&self, limit: usize) -> Result<Vec<Game>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {GAME_COLS} FROM games WHERE status = 'active'
                 ORDER BY created_at DESC LIMIT ?1"
            ))
            .map_err(db_err)?;
        let games = stmt
            .query_map(params![limit as i64], game_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(games)
    }

    async fn set_game_status(&self, id: Uuid, creator: UserId, to: GameStatus) -> Result<Game> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut game = fetch_game(&tx, id)?;
        if game.creator_id != creator {
            return Err(Error::NotGameCreator);
        }
        match (game.status, to) {
            (GameStatus::Active, GameStatus::Inactive)
            | (GameStatus::Inactive, GameStatus::Active) => {}
            _ => return Err(Error::InvalidGameTransition),
        }
        game.status = to;
        game.updated_at = now_secs();
        store_game_money(&tx, &game)?;
        tx.commit().map_err(db_err)?;
        Ok(game)
    }

    async fn close_game(&self, id: Uuid, creator: UserId) -> Result<Amount> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut game = fetch_game(&tx, id)?;
        if game.creator_id != creator {
            return Err(Error::NotGameCreator);
        }
        if game.status == GameStatus::Closed {
            return Err(Error::InvalidGameTransition);
        }
        if count_open_lobbies(&tx, id)? > 0 {
            return Err(Error::GameHasOpenLobbies);
        }
        if game.reserved != 0 {
            return Err(Error::ReserveUnderflow(game.short_id.clone()));
        }
        let now = now_secs();
        let remainder = game.pool;
        if remainder > 0 {
            add_available(&tx, creator, game.currency, remainder)?;
            let mut refund = NewEntry::new(creator, TxKind::Refund, remainder, game.currency, now);
            refund.game_id = Some(game.id);
            refund.comment = Some("game closed".into());
            insert_entry(&tx, &refund)?;
        }
        game.pool = 0;
        game.status = GameStatus::Closed;
        game.updated_at = now;
        store_game_money(&tx, &game)?;
        tx.commit().map_err(db_err)?;
        Ok(remainder)
    }

    // ---- inbound application --------------------------------------

    async fn tx_seen(&self, tx_hash: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        tx_hash_exists(&conn, tx_hash)
    }

    async fn credit_game_deposit(&self, params: CreditDepositParams) -> Result<DepositOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        if tx_hash_exists(&tx, &params.tx_hash)? {
            let game = fetch_game(&tx, params.game_id)?;
            return Ok(DepositOutcome {
                game,
                applied: false,
                activated: false,
            });
        }
        let mut game = fetch_game(&tx, params.game_id)?;
        if params.currency != game.currency {
            return Err(Error::CurrencyMismatch);
        }
        if game.status != GameStatus::Pending {
            return Err(Error::GameNotPending);
        }
        let now = now_secs();
        game.pool = game
            .pool
            .checked_add(params.amount)
            .ok_or(Error::MathOverflow)?;
        game.deposited = game
            .deposited
            .checked_add(params.amount)
            .ok_or(Error::MathOverflow)?;
        let activated = game.deposited >= game.required_deposit;
        if activated {
            game.status = GameStatus::Active;
        }
        game.updated_at = now;

        let mut entry = NewEntry::new(
            game.creator_id,
            TxKind::GameDeposit,
            params.amount,
            game.currency,
            now,
        );
        entry.tx_hash = Some(params.tx_hash);
        entry.lt = Some(params.lt);
        entry.from_addr = Some(params.from_addr);
        entry.game_id = Some(game.id);
        insert_entry(&tx, &entry)?;
        store_game_money(&tx, &game)?;
        tx.commit().map_err(db_err)?;
        Ok(DepositOutcome {
            game,
            applied: true,
            activated,
        })
    }

    async fn open_lobby(&self, params: OpenLobbyParams) -> Result<Lobby> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        if tx_hash_exists(&tx, &params.tx_hash)? {
            return Err(Error::DuplicateTransaction(params.tx_hash));
        }
        let mut game = fetch_game(&tx, params.game_id)?;
        if game.status != GameStatus::Active {
            return Err(Error::GameNotActive);
        }
        if params.currency != game.currency {
            return Err(Error::CurrencyMismatch);
        }
        if params.amount < game.min_bet {
            return Err(Error::InvalidBetRange);
        }
        if open_lobby_exists(&tx, game.id, params.user_id)? {
            return Err(Error::LobbyAlreadyOpen);
        }

        // Inbound bets above max_bet are capped; the excess lands on
        // the player's balance as an implicit deposit.
        let bet = params.amount.min(game.max_bet);
        let excess = params.amount - bet;
        let potential = mul_bps(bet, game.multiplier_bps)?;

        let headroom = game
            .pool
            .checked_sub(game.reserved)
            .ok_or_else(|| Error::ReserveUnderflow(game.short_id.clone()))?;
        if headroom < potential {
            return Err(Error::InsufficientPool);
        }

        game.pool = game.pool.checked_add(bet).ok_or(Error::MathOverflow)?;
        game.reserved = game
            .reserved
            .checked_add(potential)
            .ok_or(Error::MathOverflow)?;
        game.updated_at = params.now;

        let lobby = Lobby {
            id: Uuid::new_v4(),
            game_id: game.id,
            user_id: params.user_id,
            bet,
            potential_reward: potential,
            max_tries: game.max_tries,
            tries_used: 0,
            status: LobbyStatus::Active,
            deposit_hash: params.tx_hash.clone(),
            currency: game.currency,
            started_at: params.now,
            expires_at: params.now + game.time_limit_secs,
        };
        tx.execute(
            &format!(
                "INSERT INTO lobbies ({LOBBY_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                lobby.id.to_string(),
                lobby.game_id.to_string(),
                lobby.user_id,
                lobby.bet,
                lobby.potential_reward,
                lobby.max_tries,
                lobby.tries_used,
                lobby.status.as_str(),
                lobby.deposit_hash,
                lobby.currency.as_str(),
                lobby.started_at,
                lobby.expires_at,
            ],
        )
        .map_err(db_err)?;

        let mut entry = NewEntry::new(params.user_id, TxKind::Bet, bet, game.currency, params.now);
        entry.tx_hash = Some(params.tx_hash.clone());
        entry.lt = Some(params.lt);
        entry.game_id = Some(game.id);
        entry.lobby_id = Some(lobby.id);
        insert_entry(&tx, &entry)?;

        if excess > 0 {
            add_available(&tx, params.user_id, game.currency, excess)?;
            let mut extra =
                NewEntry::new(params.user_id, TxKind::Deposit, excess, game.currency, params.now);
            extra.comment = Some(format!("bet excess over max_bet, tx {}", params.tx_hash));
            extra.game_id = Some(game.id);
            extra.lobby_id = Some(lobby.id);
            insert_entry(&tx, &extra)?;
        }

        store_game_money(&tx, &game)?;
        tx.commit().map_err(db_err)?;
        Ok(lobby)
    }

    async fn record_user_deposit(&self, user_id: UserId, chain_tx: &ChainTx) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        if tx_hash_exists(&tx, &chain_tx.hash)? {
            return Ok(());
        }
        add_available(&tx, user_id, chain_tx.currency, chain_tx.amount)?;
        let mut entry = NewEntry::new(
            user_id,
            TxKind::Deposit,
            chain_tx.amount,
            chain_tx.currency,
            now_secs(),
        );
        entry.tx_hash = Some(chain_tx.hash.clone());
        entry.lt = Some(chain_tx.lt);
        entry.from_addr = Some(chain_tx.from.clone());
        entry.comment = chain_tx.comment.clone();
        insert_entry(&tx, &entry)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    async fn record_unmatched(&self, chain_tx: &ChainTx, note: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        if tx_hash_exists(&tx, &chain_tx.hash)? {
            return Ok(());
        }
        warn!(
            "Quarantine inbound tx {}: {} (from {})",
            chain_tx.hash, note, chain_tx.from
        );
        let mut entry = NewEntry::new(
            UNMATCHED_USER,
            TxKind::Deposit,
            chain_tx.amount,
            chain_tx.currency,
            now_secs(),
        );
        entry.status = TxStatus::Pending;
        entry.tx_hash = Some(chain_tx.hash.clone());
        entry.lt = Some(chain_tx.lt);
        entry.from_addr = Some(chain_tx.from.clone());
        entry.comment = chain_tx.comment.clone();
        entry.error = Some(note.into());
        insert_entry(&tx, &entry)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    // ---- game play ------------------------------------------------

    async fn get_lobby(&self, id: Uuid) -> Result<Lobby> {
        let conn = self.conn.lock().await;
        fetch_lobby(&conn, id)
    }

    async fn record_attempt(&self, params: RecordAttemptParams) -> Result<AttemptOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut lobby = fetch_lobby(&tx, params.lobby_id)?;
        if lobby.user_id != params.user_id {
            return Err(Error::NotLobbyOwner);
        }
        if lobby.status != LobbyStatus::Active {
            return Err(Error::LobbyNotActive);
        }
        if params.now >= lobby.expires_at {
            return Err(Error::LobbyExpired);
        }
        if lobby.tries_used >= lobby.max_tries {
            return Err(Error::TriesExhausted);
        }

        let attempt = Attempt {
            id: Uuid::new_v4(),
            lobby_id: lobby.id,
            word: params.word.clone(),
            marks: params.marks.clone(),
            created_at: params.now,
        };
        tx.execute(
            "INSERT INTO attempts (id, lobby_id, word, marks, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attempt.id.to_string(),
                attempt.lobby_id.to_string(),
                attempt.word,
                serde_json::to_string(&attempt.marks)
                    .map_err(|e| Error::StorageError(e.to_string()))?,
                attempt.created_at,
            ],
        )
        .map_err(db_err)?;
        lobby.tries_used += 1;

        let verdict = if is_all_hit(&params.marks) {
            let mut game = fetch_game(&tx, lobby.game_id)?;
            lobby.status = LobbyStatus::Won;
            let net = settle_win(&tx, &mut game, &lobby, self.commission_rate_bps, params.now)?;
            GuessVerdict::Won(net)
        } else if lobby.tries_used >= lobby.max_tries {
            let mut game = fetch_game(&tx, lobby.game_id)?;
            lobby.status = LobbyStatus::Lost;
            settle_loss(&tx, &mut game, &lobby, params.now)?;
            GuessVerdict::Lost
        } else {
            GuessVerdict::InProgress
        };

        store_lobby_state(&tx, &lobby)?;
        tx.commit().map_err(db_err)?;
        Ok(AttemptOutcome {
            attempt,
            lobby,
            verdict,
        })
    }

    async fn expire_lobby(&self, lobby_id: Uuid, now: u64) -> Result<ExpiredLobby> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut lobby = fetch_lobby(&tx, lobby_id)?;
        if lobby.status != LobbyStatus::Active {
            return Err(Error::LobbyNotActive);
        }
        let mut game = fetch_game(&tx, lobby.game_id)?;

        let resolution = if lobby.tries_used == 0 {
            // Untouched lobby: the bet goes back to the player and out
            // of the pool.
            game.pool = game
                .pool
                .checked_sub(lobby.bet)
                .ok_or_else(|| Error::PoolUnderflow(game.short_id.clone()))?;
            game.reserved = game
                .reserved
                .checked_sub(lobby.potential_reward)
                .ok_or_else(|| Error::ReserveUnderflow(game.short_id.clone()))?;
            game.updated_at = now;
            add_available(&tx, lobby.user_id, lobby.currency, lobby.bet)?;
            let mut entry =
                NewEntry::new(lobby.user_id, TxKind::Refund, lobby.bet, lobby.currency, now);
            entry.game_id = Some(game.id);
            entry.lobby_id = Some(lobby.id);
            entry.comment = Some("lobby expired without attempts".into());
            insert_entry(&tx, &entry)?;
            store_game_money(&tx, &game)?;
            lobby.status = LobbyStatus::Refunded;
            ExpiryResolution::Refunded(lobby.bet)
        } else {
            settle_loss(&tx, &mut game, &lobby, now)?;
            lobby.status = LobbyStatus::Expired;
            ExpiryResolution::Forfeited
        };

        store_lobby_state(&tx, &lobby)?;
        tx.commit().map_err(db_err)?;
        Ok(ExpiredLobby { lobby, resolution })
    }

    async fn expired_active_lobbies(&self, now: u64, limit: usize) -> Result<Vec<Lobby>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOBBY_COLS} FROM lobbies
                 WHERE status = 'active' AND expires_at <= ?1
                 ORDER BY expires_at ASC LIMIT ?2"
            ))
            .map_err(db_err)?;
        let lobbies = stmt
            .query_map(params![now, limit as i64], lobby_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(lobbies)
    }

    // ---- withdrawals ----------------------------------------------

    async fn request_withdraw(&self, params: RequestWithdrawParams) -> Result<LedgerEntry> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let user = tx
            .query_row(
                "SELECT id, nick, wallet_addr, wins, losses, withdraw_locked_until, created_at
                 FROM users WHERE id = ?1",
                params![params.user_id],
                user_from_row,
            )
            .optional()
            .map_err(db_err)?
            .ok_or(Error::UserNotFound(params.user_id))?;
        if let Some(until) = user.withdraw_locked_until {
            if params.now < until {
                return Err(Error::WithdrawLocked(until));
            }
        }
        if params.amount == 0 {
            return Err(Error::InvalidAmount);
        }
        sub_available(&tx, params.user_id, params.currency, params.amount)?;
        add_pending(&tx, params.user_id, params.currency, params.amount)?;

        let id = Uuid::new_v4();
        let mut entry = NewEntry::new(
            params.user_id,
            TxKind::Withdraw,
            params.amount,
            params.currency,
            params.now,
        );
        entry.id = id;
        entry.status = TxStatus::Pending;
        entry.fee = params.fee;
        entry.to_addr = Some(params.to_addr.clone());
        entry.comment = Some(withdraw_comment(&id));
        insert_entry(&tx, &entry)?;
        tx.commit().map_err(db_err)?;
        fetch_withdraw(&conn, id)
    }

    async fn claim_pending_withdrawals(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let mut entries = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {ENTRY_COLS} FROM transactions
                     WHERE kind = 'withdraw' AND status = 'pending'
                     ORDER BY created_at ASC LIMIT ?1"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], entry_from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };
        let now = now_secs();
        for entry in entries.iter_mut() {
            tx.execute(
                "UPDATE transactions SET status = 'confirming', updated_at = ?2 WHERE id = ?1",
                params![entry.id.to_string(), now],
            )
            .map_err(db_err)?;
            entry.status = TxStatus::Confirming;
            entry.updated_at = now;
        }
        tx.commit().map_err(db_err)?;
        Ok(entries)
    }

    async fn record_withdraw_submission(&self, tx_id: Uuid, submission_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let entry = fetch_withdraw(&tx, tx_id)?;
        if entry.status != TxStatus::Confirming {
            return Err(Error::InvalidWithdrawStatus);
        }
        tx.execute(
            "UPDATE transactions SET submission_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![tx_id.to_string(), submission_id, now_secs()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    async fn release_withdrawal(
        &self,
        tx_id: Uuid,
        max_attempts: u32,
        error: &str,
    ) -> Result<WithdrawRelease> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let entry = fetch_withdraw(&tx, tx_id)?;
        if entry.status != TxStatus::Confirming {
            return Err(Error::InvalidWithdrawStatus);
        }
        let attempts = entry.submit_attempts + 1;
        let now = now_secs();
        let failed = attempts >= max_attempts;
        if failed {
            tx.execute(
                "UPDATE transactions SET status = 'failed', submit_attempts = ?2, error = ?3,
                 updated_at = ?4 WHERE id = ?1",
                params![tx_id.to_string(), attempts, error, now],
            )
            .map_err(db_err)?;
            sub_pending(&tx, entry.user_id, entry.currency, entry.amount)?;
            add_available(&tx, entry.user_id, entry.currency, entry.amount)?;
        } else {
            tx.execute(
                "UPDATE transactions SET status = 'pending', submit_attempts = ?2, error = ?3,
                 updated_at = ?4 WHERE id = ?1",
                params![tx_id.to_string(), attempts, error, now],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(WithdrawRelease { attempts, failed })
    }

    async fn fail_withdraw(&self, tx_id: Uuid, error: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let entry = fetch_withdraw(&tx, tx_id)?;
        if !matches!(entry.status, TxStatus::Pending | TxStatus::Confirming) {
            return Err(Error::InvalidWithdrawStatus);
        }
        tx.execute(
            "UPDATE transactions SET status = 'failed', error = ?2, updated_at = ?3 WHERE id = ?1",
            params![tx_id.to_string(), error, now_secs()],
        )
        .map_err(db_err)?;
        sub_pending(&tx, entry.user_id, entry.currency, entry.amount)?;
        add_available(&tx, entry.user_id, entry.currency, entry.amount)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    async fn finalize_withdraw(&self, comment: &str, tx_hash: &str, lt: u64) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(db_err)?;
        let entry = tx
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLS} FROM transactions
                     WHERE kind = 'withdraw' AND status = 'confirming' AND comment = ?1"
                ),
                params![comment],
                entry_from_row,
            )
            .optional()
            .map_err(db_err)?;
        let Some(entry) = entry else {
            return Ok(false);
        };
        tx.execute(
            "UPDATE transactions SET status = 'completed', tx_hash = ?2, lt = ?3, updated_at = ?4
             WHERE id = ?1",
            params![entry.id.to_string(), tx_hash, lt, now_secs()],
        )
        .map_err(db_err)?;
        sub_pending(&tx, entry.user_id, entry.currency, entry.amount)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    // ---- pending payments -----------------------------------------

    async fn insert_pending_payment(&self, payment: &PendingPayment) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pending_payments (id, comment, user_id, game_id, status, created_at,
             expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                payment.id.to_string(),
                payment.comment,
                payment.user_id,
                payment.game_id.to_string(),
                payment.status.as_str(),
                payment.created_at,
                payment.expires_at,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn complete_pending_payment(&self, comment: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE pending_payments SET status = 'completed'
             WHERE comment = ?1 AND status = 'pending'",
            params![comment],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn expire_pending_payments(&self, now: u64) -> Result<usize> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE pending_payments SET status = 'expired'
             WHERE status = 'pending' AND expires_at <= ?1",
            params![now],
        )
        .map_err(db_err)
    }

    // ---- chain watermark ------------------------------------------

    async fn last_lt(&self, chain: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let lt = conn
            .query_row(
                "SELECT last_lt FROM chain_state WHERE chain = ?1",
                params![chain],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(lt.unwrap_or(0))
    }

    async fn advance_last_lt(&self, chain: &str, lt: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chain_state (chain, last_lt) VALUES (?1, ?2)
             ON CONFLICT(chain) DO UPDATE SET last_lt = MAX(last_lt, excluded.last_lt)",
            params![chain, lt],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ---- reads ----------------------------------------------------

    async fn lobbies_by_user(&self, user: UserId, limit: usize) -> Result<Vec<Lobby>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOBBY_COLS} FROM lobbies WHERE user_id = ?1
                 ORDER BY started_at DESC LIMIT ?2"
            ))
            .map_err(db_err)?;
        let lobbies = stmt
            .query_map(params![user, limit as i64], lobby_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(lobbies)
    }

    async fn attempts_by_lobby(&self, lobby: Uuid) -> Result<Vec<Attempt>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, lobby_id, word, marks, created_at FROM attempts
                 WHERE lobby_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let attempts = stmt
            .query_map(params![lobby.to_string()], attempt_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(attempts)
    }

    async fn history_by_user(&self, user: UserId, limit: usize) -> Result<Vec<HistoryEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, game_id, lobby_id, user_id, kind, amount, currency, created_at
                 FROM history WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let events = stmt
            .query_map(params![user, limit as i64], |row| {
                Ok(HistoryEvent {
                    id: parse_uuid(row.get(0)?)?,
                    game_id: parse_uuid(row.get(1)?)?,
                    lobby_id: parse_uuid(row.get(2)?)?,
                    user_id: row.get(3)?,
                    kind: conv(HistoryKind::try_from(row.get::<_, String>(4)?.as_str()))?,
                    amount: row.get(5)?,
                    currency: conv(Currency::try_from(row.get::<_, String>(6)?.as_str()))?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(events)
    }

    async fn transactions_by_user(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLS} FROM transactions WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2"
            ))
            .map_err(db_err)?;
        let entries = stmt
            .query_map(params![user, limit as i64], entry_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordpool_core::amount::NANO;
    use wordpool_core::engine::{evaluate, normalize};
    use wordpool_core::types::PendingPaymentStatus;

    const COMMISSION_BPS: u32 = 500;

    fn ledger() -> SqliteLedger {
        SqliteLedger::try_new_mem(COMMISSION_BPS).unwrap()
    }

    fn sample_game(creator: UserId) -> Game {
        Game {
            id: Uuid::new_v4(),
            short_id: "ABCDEF".into(),
            creator_id: creator,
            secret_word: normalize("APPLE"),
            word_len: 5,
            language: Language::En,
            max_tries: 6,
            multiplier_bps: 20_000,
            min_bet: NANO,
            max_bet: 5 * NANO,
            currency: Currency::Ton,
            pool: 0,
            reserved: 0,
            required_deposit: 10 * NANO,
            deposited: 0,
            time_limit_secs: 1800,
            status: GameStatus::Pending,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
        }
    }

    async fn activated_game(ledger: &SqliteLedger) -> Game {
        ledger.ensure_user(1001, "creator").await.unwrap();
        let game = sample_game(1001);
        ledger.insert_game(&game).await.unwrap();
        let outcome = ledger
            .credit_game_deposit(CreditDepositParams {
                game_id: game.id,
                currency: Currency::Ton,
                amount: 10 * NANO,
                tx_hash: "H1".into(),
                lt: 100,
                from_addr: "creator_wallet".into(),
            })
            .await
            .unwrap();
        assert!(outcome.activated);
        outcome.game
    }

    async fn open_bet(
        ledger: &SqliteLedger,
        game: &Game,
        user: UserId,
        amount: Amount,
        hash: &str,
        lt: u64,
    ) -> Lobby {
        ledger.ensure_user(user, "player").await.unwrap();
        ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: user,
                amount,
                currency: Currency::Ton,
                tx_hash: hash.into(),
                lt,
                now: 1_700_000_100,
            })
            .await
            .unwrap()
    }

    async fn guess(
        ledger: &SqliteLedger,
        lobby: &Lobby,
        user: UserId,
        secret: &str,
        word: &str,
        now: u64,
    ) -> AttemptOutcome {
        let word = normalize(word);
        let marks = evaluate(&normalize(secret), &word).unwrap();
        ledger
            .record_attempt(RecordAttemptParams {
                lobby_id: lobby.id,
                user_id: user,
                word,
                marks,
                now,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_game_activation() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        assert_eq!(game.status, GameStatus::Active);
        assert_eq!(game.pool, 10 * NANO);
        assert_eq!(game.reserved, 0);
        assert_eq!(game.deposited, 10 * NANO);

        // Replaying the same hash changes nothing.
        let replay = ledger
            .credit_game_deposit(CreditDepositParams {
                game_id: game.id,
                currency: Currency::Ton,
                amount: 10 * NANO,
                tx_hash: "H1".into(),
                lt: 100,
                from_addr: "creator_wallet".into(),
            })
            .await
            .unwrap();
        assert!(!replay.applied);
        assert_eq!(replay.game.pool, 10 * NANO);
    }

    #[tokio::test]
    async fn test_partial_deposits_accumulate() {
        let ledger = ledger();
        ledger.ensure_user(1001, "creator").await.unwrap();
        let game = sample_game(1001);
        ledger.insert_game(&game).await.unwrap();
        let first = ledger
            .credit_game_deposit(CreditDepositParams {
                game_id: game.id,
                currency: Currency::Ton,
                amount: 4 * NANO,
                tx_hash: "P1".into(),
                lt: 10,
                from_addr: "w".into(),
            })
            .await
            .unwrap();
        assert!(!first.activated);
        assert_eq!(first.game.status, GameStatus::Pending);
        let second = ledger
            .credit_game_deposit(CreditDepositParams {
                game_id: game.id,
                currency: Currency::Ton,
                amount: 6 * NANO,
                tx_hash: "P2".into(),
                lt: 20,
                from_addr: "w".into(),
            })
            .await
            .unwrap();
        assert!(second.activated);
        assert_eq!(second.game.pool, 10 * NANO);
    }

    #[tokio::test]
    async fn test_join_and_win() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let lobby = open_bet(&ledger, &game, 2002, 3 * NANO, "H2", 110).await;
        assert_eq!(lobby.bet, 3 * NANO);
        assert_eq!(lobby.potential_reward, 6 * NANO);
        assert_eq!(lobby.status, LobbyStatus::Active);

        let game = ledger.get_game(game.id).await.unwrap();
        assert_eq!(game.pool, 13 * NANO);
        assert_eq!(game.reserved, 6 * NANO);

        let now = 1_700_000_200;
        let o1 = guess(&ledger, &lobby, 2002, "APPLE", "PEARS", now).await;
        assert_eq!(o1.verdict, GuessVerdict::InProgress);
        let o2 = guess(&ledger, &lobby, 2002, "APPLE", "PLATE", now + 1).await;
        assert_eq!(o2.verdict, GuessVerdict::InProgress);
        let o3 = guess(&ledger, &lobby, 2002, "APPLE", "APPLE", now + 2).await;

        // 6.0 * (1 - 0.05) = 5.7 credited, 0.3 commission.
        assert_eq!(o3.verdict, GuessVerdict::Won(5_700_000_000));
        assert_eq!(o3.lobby.status, LobbyStatus::Won);

        let balance = ledger.balance(2002, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 5_700_000_000);

        let game = ledger.get_game(game.id).await.unwrap();
        assert_eq!(game.pool, 4 * NANO);
        assert_eq!(game.reserved, 0);

        let user = ledger.get_user(2002).await.unwrap();
        assert_eq!(user.wins, 1);

        let history = ledger.history_by_user(2002, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, HistoryKind::PlayerWin);
        assert_eq!(history[0].amount, 5_700_000_000);

        let entries = ledger.transactions_by_user(2002, 10).await.unwrap();
        let commission: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == TxKind::Commission)
            .collect();
        assert_eq!(commission.len(), 1);
        assert_eq!(commission[0].amount, 300_000_000);
    }

    #[tokio::test]
    async fn test_loss_by_attempts() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let lobby = open_bet(&ledger, &game, 2003, 2 * NANO, "H3", 120).await;
        assert_eq!(lobby.potential_reward, 4 * NANO);

        let before = ledger.get_game(game.id).await.unwrap();
        assert_eq!(before.pool, 12 * NANO);
        assert_eq!(before.reserved, 4 * NANO);

        let now = 1_700_000_300;
        for i in 0..5 {
            let o = guess(&ledger, &lobby, 2003, "APPLE", "WRONG", now + i).await;
            assert_eq!(o.verdict, GuessVerdict::InProgress);
        }
        let last = guess(&ledger, &lobby, 2003, "APPLE", "WRONG", now + 5).await;
        assert_eq!(last.verdict, GuessVerdict::Lost);
        assert_eq!(last.lobby.status, LobbyStatus::Lost);
        assert_eq!(last.lobby.tries_used, 6);

        // The bet stays in the pool; only the reservation is released.
        let after = ledger.get_game(game.id).await.unwrap();
        assert_eq!(after.pool, 12 * NANO);
        assert_eq!(after.reserved, 0);

        let user = ledger.get_user(2003).await.unwrap();
        assert_eq!(user.losses, 1);
        let history = ledger.history_by_user(2003, 10).await.unwrap();
        assert_eq!(history[0].kind, HistoryKind::CreatorWin);
        assert_eq!(history[0].amount, 2 * NANO);
    }

    #[tokio::test]
    async fn test_win_on_last_attempt() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let lobby = open_bet(&ledger, &game, 2005, NANO, "H5", 140).await;
        let now = 1_700_000_400;
        for i in 0..5 {
            guess(&ledger, &lobby, 2005, "APPLE", "WRONG", now + i).await;
        }
        let last = guess(&ledger, &lobby, 2005, "APPLE", "APPLE", now + 5).await;
        assert_eq!(last.verdict, GuessVerdict::Won(1_900_000_000));
        assert_eq!(last.lobby.status, LobbyStatus::Won);
    }

    #[tokio::test]
    async fn test_expiry_refund_restores_state() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let before = ledger.get_game(game.id).await.unwrap();
        let lobby = open_bet(&ledger, &game, 2004, NANO, "H4", 130).await;

        let expired = ledger
            .expire_lobby(lobby.id, lobby.expires_at + 1)
            .await
            .unwrap();
        assert_eq!(expired.resolution, ExpiryResolution::Refunded(NANO));
        assert_eq!(expired.lobby.status, LobbyStatus::Refunded);

        let balance = ledger.balance(2004, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, NANO);

        // Pool and reservation return to their pre-open values.
        let after = ledger.get_game(game.id).await.unwrap();
        assert_eq!(after.pool, before.pool);
        assert_eq!(after.reserved, before.reserved);

        let entries = ledger.transactions_by_user(2004, 10).await.unwrap();
        assert!(entries.iter().any(|e| e.kind == TxKind::Refund));

        // A settled lobby cannot expire twice.
        let err = ledger
            .expire_lobby(lobby.id, lobby.expires_at + 2)
            .await
            .unwrap_err();
        assert_eq!(err, Error::LobbyNotActive);
    }

    #[tokio::test]
    async fn test_expiry_with_attempts_forfeits() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let lobby = open_bet(&ledger, &game, 2006, 2 * NANO, "H6", 150).await;
        guess(&ledger, &lobby, 2006, "APPLE", "WRONG", 1_700_000_200).await;

        let expired = ledger
            .expire_lobby(lobby.id, lobby.expires_at + 1)
            .await
            .unwrap();
        assert_eq!(expired.resolution, ExpiryResolution::Forfeited);
        assert_eq!(expired.lobby.status, LobbyStatus::Expired);

        let balance = ledger.balance(2006, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 0);
        let after = ledger.get_game(game.id).await.unwrap();
        assert_eq!(after.reserved, 0);
        // Bet remains in the pool.
        assert_eq!(after.pool, 12 * NANO);
        let user = ledger.get_user(2006).await.unwrap();
        assert_eq!(user.losses, 1);
    }

    #[tokio::test]
    async fn test_open_lobby_boundaries() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        ledger.ensure_user(3001, "p").await.unwrap();

        // min_bet - 1 rejected.
        let err = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 3001,
                amount: NANO - 1,
                currency: Currency::Ton,
                tx_hash: "B1".into(),
                lt: 200,
                now: 1_700_000_100,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidBetRange);

        // Exactly min_bet accepted.
        let lobby = open_bet(&ledger, &game, 3001, NANO, "B2", 210).await;
        assert_eq!(lobby.bet, NANO);

        // A second open lobby in the same game is rejected.
        let err = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 3001,
                amount: NANO,
                currency: Currency::Ton,
                tx_hash: "B3".into(),
                lt: 220,
                now: 1_700_000_100,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::LobbyAlreadyOpen);
    }

    #[tokio::test]
    async fn test_open_lobby_caps_bet_and_credits_excess() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        ledger.ensure_user(3002, "whale").await.unwrap();
        let lobby = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 3002,
                amount: 7 * NANO,
                currency: Currency::Ton,
                tx_hash: "B4".into(),
                lt: 230,
                now: 1_700_000_100,
            })
            .await
            .unwrap();
        assert_eq!(lobby.bet, 5 * NANO);
        assert_eq!(lobby.potential_reward, 10 * NANO);
        let balance = ledger.balance(3002, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 2 * NANO);
        // Pool took the capped bet only.
        let after = ledger.get_game(game.id).await.unwrap();
        assert_eq!(after.pool, 15 * NANO);
    }

    #[tokio::test]
    async fn test_open_lobby_insufficient_pool() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        // First whale reserves the whole pool.
        open_bet(&ledger, &game, 3003, 5 * NANO, "B5", 240).await;
        ledger.ensure_user(3004, "late").await.unwrap();
        let err = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 3004,
                amount: 3 * NANO,
                currency: Currency::Ton,
                tx_hash: "B6".into(),
                lt: 250,
                now: 1_700_000_100,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::InsufficientPool);
    }

    #[tokio::test]
    async fn test_record_attempt_rejections() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let lobby = open_bet(&ledger, &game, 4001, NANO, "C1", 300).await;

        let marks = evaluate("apple", "wrong").unwrap();
        // Not the owner.
        let err = ledger
            .record_attempt(RecordAttemptParams {
                lobby_id: lobby.id,
                user_id: 4002,
                word: "wrong".into(),
                marks: marks.clone(),
                now: 1_700_000_200,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotLobbyOwner);

        // Writes re-check the deadline even before the sweeper runs.
        let err = ledger
            .record_attempt(RecordAttemptParams {
                lobby_id: lobby.id,
                user_id: 4001,
                word: "wrong".into(),
                marks,
                now: lobby.expires_at,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::LobbyExpired);
    }

    #[tokio::test]
    async fn test_withdraw_lifecycle() {
        let ledger = ledger();
        ledger.ensure_user(2002, "winner").await.unwrap();
        // Seed 5.7 available, as after the win scenario.
        let seed = ChainTx {
            hash: "SEED".into(),
            lt: 400,
            from: "w".into(),
            to: "master".into(),
            amount: 5_700_000_000,
            currency: Currency::Ton,
            comment: None,
            timestamp: 0,
            is_incoming: true,
            fee: 0,
        };
        ledger.record_user_deposit(2002, &seed).await.unwrap();

        let entry = ledger
            .request_withdraw(RequestWithdrawParams {
                user_id: 2002,
                amount: 5 * NANO,
                fee: 50_000_000,
                to_addr: "A_valid".into(),
                currency: Currency::Ton,
                now: 1_700_001_000,
            })
            .await
            .unwrap();
        assert_eq!(entry.status, TxStatus::Pending);
        assert_eq!(entry.fee, 50_000_000);
        let comment = entry.comment.clone().unwrap();

        let balance = ledger.balance(2002, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 700_000_000);
        assert_eq!(balance.pending_withdraw, 5 * NANO);

        // Claim flips to confirming; a second claim finds nothing.
        let claimed = ledger.claim_pending_withdrawals(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, TxStatus::Confirming);
        assert!(ledger.claim_pending_withdrawals(10).await.unwrap().is_empty());

        ledger
            .record_withdraw_submission(entry.id, "sub-1")
            .await
            .unwrap();

        // The reconciler later matches the outbound comment.
        assert!(ledger.finalize_withdraw(&comment, "HOUT", 500).await.unwrap());
        let balance = ledger.balance(2002, Currency::Ton).await.unwrap();
        assert_eq!(balance.pending_withdraw, 0);
        assert_eq!(balance.available, 700_000_000);

        // Finalizing again is a no-op.
        assert!(!ledger.finalize_withdraw(&comment, "HOUT", 500).await.unwrap());
    }

    #[tokio::test]
    async fn test_withdraw_release_bound_fails_and_refunds() {
        let ledger = ledger();
        ledger.ensure_user(5001, "u").await.unwrap();
        let seed = ChainTx {
            hash: "SEED2".into(),
            lt: 410,
            from: "w".into(),
            to: "master".into(),
            amount: 3 * NANO,
            currency: Currency::Ton,
            comment: None,
            timestamp: 0,
            is_incoming: true,
            fee: 0,
        };
        ledger.record_user_deposit(5001, &seed).await.unwrap();
        let entry = ledger
            .request_withdraw(RequestWithdrawParams {
                user_id: 5001,
                amount: 2 * NANO,
                fee: 50_000_000,
                to_addr: "A_valid".into(),
                currency: Currency::Ton,
                now: 1_700_001_000,
            })
            .await
            .unwrap();

        for attempt in 1..=2 {
            let claimed = ledger.claim_pending_withdrawals(10).await.unwrap();
            assert_eq!(claimed.len(), 1);
            let release = ledger
                .release_withdrawal(entry.id, 3, "node unavailable")
                .await
                .unwrap();
            assert_eq!(release.attempts, attempt);
            assert!(!release.failed);
        }
        let claimed = ledger.claim_pending_withdrawals(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let release = ledger
            .release_withdrawal(entry.id, 3, "node unavailable")
            .await
            .unwrap();
        assert!(release.failed);

        // The bound was hit: funds are back on the balance.
        let balance = ledger.balance(5001, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 3 * NANO);
        assert_eq!(balance.pending_withdraw, 0);
        assert!(ledger.claim_pending_withdrawals(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_balance() {
        let ledger = ledger();
        ledger.ensure_user(5002, "poor").await.unwrap();
        let err = ledger
            .request_withdraw(RequestWithdrawParams {
                user_id: 5002,
                amount: NANO,
                fee: 0,
                to_addr: "A_valid".into(),
                currency: Currency::Ton,
                now: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::InsufficientBalance);
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let ledger = ledger();
        assert_eq!(ledger.last_lt("ton").await.unwrap(), 0);
        ledger.advance_last_lt("ton", 100).await.unwrap();
        assert_eq!(ledger.last_lt("ton").await.unwrap(), 100);
        ledger.advance_last_lt("ton", 90).await.unwrap();
        assert_eq!(ledger.last_lt("ton").await.unwrap(), 100);
        ledger.advance_last_lt("ton", 130).await.unwrap();
        assert_eq!(ledger.last_lt("ton").await.unwrap(), 130);
    }

    #[tokio::test]
    async fn test_unmatched_and_user_deposits_are_idempotent() {
        let ledger = ledger();
        ledger.ensure_user(6001, "u").await.unwrap();
        let tx = ChainTx {
            hash: "D1".into(),
            lt: 600,
            from: "somewallet".into(),
            to: "master".into(),
            amount: NANO,
            currency: Currency::Ton,
            comment: Some("hello".into()),
            timestamp: 0,
            is_incoming: true,
            fee: 0,
        };
        ledger.record_user_deposit(6001, &tx).await.unwrap();
        ledger.record_user_deposit(6001, &tx).await.unwrap();
        let balance = ledger.balance(6001, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, NANO);

        let stray = ChainTx {
            hash: "D2".into(),
            lt: 610,
            ..tx.clone()
        };
        ledger.record_unmatched(&stray, "no matching wallet").await.unwrap();
        ledger.record_unmatched(&stray, "no matching wallet").await.unwrap();
        let rows = ledger.transactions_by_user(UNMATCHED_USER, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TxStatus::Pending);
        assert_eq!(rows[0].error.as_deref(), Some("no matching wallet"));
    }

    #[tokio::test]
    async fn test_pause_resume_and_close() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;

        // Only the creator may pause.
        let err = ledger
            .set_game_status(game.id, 9, GameStatus::Inactive)
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotGameCreator);

        let paused = ledger
            .set_game_status(game.id, 1001, GameStatus::Inactive)
            .await
            .unwrap();
        assert_eq!(paused.status, GameStatus::Inactive);

        // A paused game accepts no bets.
        ledger.ensure_user(7001, "p").await.unwrap();
        let err = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 7001,
                amount: NANO,
                currency: Currency::Ton,
                tx_hash: "Z1".into(),
                lt: 700,
                now: 1_700_000_100,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::GameNotActive);

        let resumed = ledger
            .set_game_status(game.id, 1001, GameStatus::Active)
            .await
            .unwrap();
        assert_eq!(resumed.status, GameStatus::Active);

        // Close refunds the unreserved pool to the creator.
        let remainder = ledger.close_game(game.id, 1001).await.unwrap();
        assert_eq!(remainder, 10 * NANO);
        let balance = ledger.balance(1001, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 10 * NANO);
        let closed = ledger.get_game(game.id).await.unwrap();
        assert_eq!(closed.status, GameStatus::Closed);
        assert_eq!(closed.pool, 0);
    }

    #[tokio::test]
    async fn test_close_game_with_open_lobby_rejected() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        open_bet(&ledger, &game, 7002, NANO, "Z2", 710).await;
        let err = ledger.close_game(game.id, 1001).await.unwrap_err();
        assert_eq!(err, Error::GameHasOpenLobbies);
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        ledger.ensure_user(7003, "p").await.unwrap();
        let err = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 7003,
                amount: NANO,
                currency: Currency::Usdt,
                tx_hash: "Z3".into(),
                lt: 720,
                now: 1_700_000_100,
            })
            .await
            .unwrap_err();
        assert_eq!(err, Error::CurrencyMismatch);
    }

    #[tokio::test]
    async fn test_pending_payments_expire() {
        let ledger = ledger();
        let game = activated_game(&ledger).await;
        let payment = PendingPayment {
            id: Uuid::new_v4(),
            comment: "LB_ABCDEF_1700000100".into(),
            user_id: 2002,
            game_id: game.id,
            status: PendingPaymentStatus::Pending,
            created_at: 1_700_000_100,
            expires_at: 1_700_001_000,
        };
        ledger.insert_pending_payment(&payment).await.unwrap();
        assert_eq!(ledger.expire_pending_payments(1_700_000_500).await.unwrap(), 0);
        assert_eq!(ledger.expire_pending_payments(1_700_001_000).await.unwrap(), 1);
        // Already expired rows are not touched again.
        assert_eq!(ledger.expire_pending_payments(1_700_002_000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wallet_registration() {
        let ledger = ledger();
        ledger.ensure_user(8001, "u").await.unwrap();
        ledger.set_wallet_addr(8001, "EQCwallet").await.unwrap();
        let user = ledger.find_user_by_wallet("EQCwallet").await.unwrap().unwrap();
        assert_eq!(user.id, 8001);
        assert!(ledger.find_user_by_wallet("unknown").await.unwrap().is_none());
        assert_eq!(
            ledger.set_wallet_addr(9999, "x").await.unwrap_err(),
            Error::UserNotFound(9999)
        );
    }
}
