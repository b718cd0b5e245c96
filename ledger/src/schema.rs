//! Relational schema. Money columns hold integer nano units; uuids and
//! enums are stored as text.

use rusqlite::Connection;

pub fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            nick TEXT NOT NULL,
            wallet_addr TEXT UNIQUE,
            wins INTEGER NOT NULL DEFAULT 0,
            losses INTEGER NOT NULL DEFAULT 0,
            withdraw_locked_until INTEGER,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS balances (
            user_id INTEGER NOT NULL,
            currency TEXT NOT NULL,
            available INTEGER NOT NULL DEFAULT 0,
            pending_withdraw INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, currency)
        );

        CREATE TABLE IF NOT EXISTS games (
            id TEXT PRIMARY KEY,
            short_id TEXT NOT NULL UNIQUE,
            creator_id INTEGER NOT NULL,
            secret_word TEXT NOT NULL,
            word_len INTEGER NOT NULL,
            language TEXT NOT NULL,
            max_tries INTEGER NOT NULL,
            multiplier_bps INTEGER NOT NULL,
            min_bet INTEGER NOT NULL,
            max_bet INTEGER NOT NULL,
            currency TEXT NOT NULL,
            pool INTEGER NOT NULL DEFAULT 0,
            reserved INTEGER NOT NULL DEFAULT 0,
            required_deposit INTEGER NOT NULL,
            deposited INTEGER NOT NULL DEFAULT 0,
            time_limit_secs INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lobbies (
            id TEXT PRIMARY KEY,
            game_id TEXT NOT NULL REFERENCES games(id),
            user_id INTEGER NOT NULL,
            bet INTEGER NOT NULL,
            potential_reward INTEGER NOT NULL,
            max_tries INTEGER NOT NULL,
            tries_used INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            deposit_hash TEXT NOT NULL,
            currency TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS lobbies_game_user
            ON lobbies (game_id, user_id, status);
        CREATE INDEX IF NOT EXISTS lobbies_expiry
            ON lobbies (status, expires_at);

        CREATE TABLE IF NOT EXISTS attempts (
            id TEXT PRIMARY KEY,
            lobby_id TEXT NOT NULL REFERENCES lobbies(id),
            word TEXT NOT NULL,
            marks TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS attempts_lobby ON attempts (lobby_id);

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            amount INTEGER NOT NULL,
            fee INTEGER NOT NULL DEFAULT 0,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            tx_hash TEXT,
            lt INTEGER,
            from_addr TEXT,
            to_addr TEXT,
            comment TEXT,
            game_id TEXT,
            lobby_id TEXT,
            submit_attempts INTEGER NOT NULL DEFAULT 0,
            submission_id TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS transactions_hash
            ON transactions (tx_hash) WHERE tx_hash IS NOT NULL;
        CREATE INDEX IF NOT EXISTS transactions_user ON transactions (user_id);
        CREATE INDEX IF NOT EXISTS transactions_kind_status
            ON transactions (kind, status);

        CREATE TABLE IF NOT EXISTS history (
            id TEXT PRIMARY KEY,
            game_id TEXT NOT NULL,
            lobby_id TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            amount INTEGER NOT NULL,
            currency TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS history_user ON history (user_id);

        CREATE TABLE IF NOT EXISTS pending_payments (
            id TEXT PRIMARY KEY,
            comment TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            game_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS pending_payments_expiry
            ON pending_payments (status, expires_at);

        CREATE TABLE IF NOT EXISTS chain_state (
            chain TEXT PRIMARY KEY,
            last_lt INTEGER NOT NULL DEFAULT 0
        );",
    )
}
