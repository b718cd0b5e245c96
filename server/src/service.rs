//! The service boundary: synchronous domain operations consumed by the
//! RPC layer. Authentication is the HTTP collaborator's concern; every
//! operation takes the already-authenticated user id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use wordpool_core::amount::{mul_bps, Amount, BPS_SCALE};
use wordpool_core::chain::ChainT;
use wordpool_core::comment::{CommentKind, PaymentComment};
use wordpool_core::engine::{check_guess, evaluate, normalize};
use wordpool_core::error::{Error, Result};
use wordpool_core::now_secs;
use wordpool_core::store::{
    AttemptOutcome, GuessVerdict, LedgerT, RecordAttemptParams, RequestWithdrawParams,
};
use wordpool_core::types::{
    random_short_id, Attempt, Currency, Game, GameStatus, GameView, HistoryEvent, Language,
    LedgerEntry, Lobby, PendingPayment, PendingPaymentStatus, UserId,
};
use wordpool_worker::{EventBus, WorkerFrame};

const MIN_WORD_LEN: usize = 3;
const MAX_WORD_LEN: usize = 12;
const MAX_TRIES_LIMIT: u32 = 12;
const MIN_TIME_LIMIT_SECS: u64 = 60;
const MAX_TIME_LIMIT_SECS: u64 = 86_400;
const SHORT_ID_ATTEMPTS: usize = 8;
/// How long a join invoice stays valid before the sweeper expires it.
const JOIN_PAYMENT_TTL_SECS: u64 = 900;
const LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGameParams {
    pub word: String,
    pub language: Language,
    pub max_tries: u32,
    pub multiplier_bps: u32,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub currency: Currency,
    pub required_deposit: Amount,
    pub time_limit_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameInvoice {
    pub game: GameView,
    pub comment: String,
    pub deep_link: String,
    pub required_deposit: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinInvoice {
    pub game: GameView,
    pub comment: String,
    pub deep_link: String,
    pub min_bet: Amount,
    pub max_bet: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuessOutcome {
    pub marks: Vec<wordpool_core::types::LetterMark>,
    pub verdict: GuessVerdict,
    pub lobby: Lobby,
}

pub struct GameService {
    ledger: Arc<dyn LedgerT>,
    chain: Arc<dyn ChainT>,
    bus: Arc<EventBus>,
    master_wallet: String,
}

impl GameService {
    pub fn new(
        ledger: Arc<dyn LedgerT>,
        chain: Arc<dyn ChainT>,
        bus: Arc<EventBus>,
        master_wallet: String,
    ) -> Self {
        Self {
            ledger,
            chain,
            bus,
            master_wallet,
        }
    }

    fn deep_link(&self, amount: Option<Amount>, comment: &str) -> String {
        match amount {
            Some(amount) => format!(
                "ton://transfer/{}?amount={}&text={}",
                self.master_wallet, amount, comment
            ),
            None => format!("ton://transfer/{}?text={}", self.master_wallet, comment),
        }
    }

    fn check_currency(&self, currency: Currency) -> Result<()> {
        if !self.chain.supported_currencies().contains(&currency) {
            return Err(Error::UnsupportedCurrency(currency.to_string()));
        }
        Ok(())
    }

    pub async fn create_game(
        &self,
        creator: UserId,
        nick: &str,
        params: CreateGameParams,
    ) -> Result<GameInvoice> {
        let word = normalize(&params.word);
        if !params.language.matches(&word) {
            return Err(Error::AlphabetMismatch);
        }
        let word_len = word.chars().count();
        if !(MIN_WORD_LEN..=MAX_WORD_LEN).contains(&word_len) {
            return Err(Error::InvalidWord(format!(
                "word length must be {MIN_WORD_LEN}..={MAX_WORD_LEN}"
            )));
        }
        if params.max_tries == 0 || params.max_tries > MAX_TRIES_LIMIT {
            return Err(Error::InvalidMaxTries);
        }
        if params.multiplier_bps < BPS_SCALE {
            return Err(Error::InvalidMultiplier);
        }
        if params.min_bet == 0 || params.min_bet > params.max_bet {
            return Err(Error::InvalidBetRange);
        }
        self.check_currency(params.currency)?;
        if mul_bps(params.max_bet, params.multiplier_bps)? > params.required_deposit {
            return Err(Error::DepositTooSmall);
        }
        if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&params.time_limit_secs) {
            return Err(Error::InvalidTimeLimit);
        }

        self.ledger.ensure_user(creator, nick).await?;

        let mut short_id = None;
        for _ in 0..SHORT_ID_ATTEMPTS {
            let candidate = random_short_id();
            if !self.ledger.short_id_taken(&candidate).await? {
                short_id = Some(candidate);
                break;
            }
        }
        let short_id = short_id.ok_or(Error::ShortIdExhausted)?;

        let now = now_secs();
        let game = Game {
            id: Uuid::new_v4(),
            short_id: short_id.clone(),
            creator_id: creator,
            secret_word: word.clone(),
            word_len: word_len as u32,
            language: params.language,
            max_tries: params.max_tries,
            multiplier_bps: params.multiplier_bps,
            min_bet: params.min_bet,
            max_bet: params.max_bet,
            currency: params.currency,
            pool: 0,
            reserved: 0,
            required_deposit: params.required_deposit,
            deposited: 0,
            time_limit_secs: params.time_limit_secs,
            status: GameStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.ledger.insert_game(&game).await?;
        info!("Game {} created by {}, short id {}", game.id, creator, short_id);

        let comment = PaymentComment::new(CommentKind::GameDeposit, short_id, now).encode();
        Ok(GameInvoice {
            deep_link: self.deep_link(Some(params.required_deposit), &comment),
            game: GameView::from(&game),
            comment,
            required_deposit: params.required_deposit,
        })
    }

    /// Returns payment info for joining; the lobby itself is created by
    /// the reconciler once the bet lands on chain.
    pub async fn request_join(
        &self,
        short_id: &str,
        user: UserId,
        nick: &str,
    ) -> Result<JoinInvoice> {
        let game = self.ledger.get_game_by_short_id(short_id).await?;
        if game.status != GameStatus::Active {
            return Err(Error::GameNotActive);
        }
        self.ledger.ensure_user(user, nick).await?;

        let now = now_secs();
        let comment = PaymentComment::new(CommentKind::LobbyBet, short_id, now).encode();
        self.ledger
            .insert_pending_payment(&PendingPayment {
                id: Uuid::new_v4(),
                comment: comment.clone(),
                user_id: user,
                game_id: game.id,
                status: PendingPaymentStatus::Pending,
                created_at: now,
                expires_at: now + JOIN_PAYMENT_TTL_SECS,
            })
            .await?;

        Ok(JoinInvoice {
            deep_link: self.deep_link(None, &comment),
            min_bet: game.min_bet,
            max_bet: game.max_bet,
            game: GameView::from(&game),
            comment,
        })
    }

    pub async fn submit_guess(
        &self,
        lobby_id: Uuid,
        user: UserId,
        word: &str,
    ) -> Result<GuessOutcome> {
        let lobby = self.ledger.get_lobby(lobby_id).await?;
        if lobby.user_id != user {
            return Err(Error::NotLobbyOwner);
        }
        let game = self.ledger.get_game(lobby.game_id).await?;
        let word = normalize(word);
        check_guess(&word, game.language, game.word_len as usize)?;
        let marks = evaluate(&game.secret_word, &word)?;

        let AttemptOutcome {
            attempt: _,
            lobby,
            verdict,
        } = self
            .ledger
            .record_attempt(RecordAttemptParams {
                lobby_id,
                user_id: user,
                word,
                marks: marks.clone(),
                now: now_secs(),
            })
            .await?;

        Ok(GuessOutcome {
            marks,
            verdict,
            lobby,
        })
    }

    pub async fn request_withdraw(
        &self,
        user: UserId,
        amount: Amount,
        to_address: Option<String>,
        currency: Currency,
    ) -> Result<Uuid> {
        let user_row = self.ledger.get_user(user).await?;
        let to_addr = to_address
            .or(user_row.wallet_addr)
            .ok_or_else(|| Error::InvalidAddress("no withdrawal address on file".into()))?;
        if !self.chain.validate_address(&to_addr) {
            return Err(Error::InvalidAddress(to_addr));
        }
        self.check_currency(currency)?;
        let fee = self.chain.fee(currency, amount);
        let floor = self
            .chain
            .min_withdraw(currency)
            .checked_add(fee)
            .ok_or(Error::MathOverflow)?;
        if amount < floor {
            return Err(Error::BelowMinWithdraw);
        }

        let entry = self
            .ledger
            .request_withdraw(RequestWithdrawParams {
                user_id: user,
                amount,
                fee,
                to_addr,
                currency,
                now: now_secs(),
            })
            .await?;
        info!("Withdrawal {} queued for user {}", entry.id, user);
        self.bus.send(WorkerFrame::WithdrawQueued).await;
        Ok(entry.id)
    }

    pub async fn register_wallet(&self, user: UserId, address: &str) -> Result<()> {
        if !self.chain.validate_address(address) {
            return Err(Error::InvalidAddress(address.into()));
        }
        self.ledger.set_wallet_addr(user, address).await
    }

    pub async fn pause_game(&self, short_id: &str, user: UserId) -> Result<GameView> {
        let game = self.ledger.get_game_by_short_id(short_id).await?;
        let game = self
            .ledger
            .set_game_status(game.id, user, GameStatus::Inactive)
            .await?;
        Ok(GameView::from(&game))
    }

    pub async fn resume_game(&self, short_id: &str, user: UserId) -> Result<GameView> {
        let game = self.ledger.get_game_by_short_id(short_id).await?;
        let game = self
            .ledger
            .set_game_status(game.id, user, GameStatus::Active)
            .await?;
        Ok(GameView::from(&game))
    }

    /// Close the game and pay the unreserved pool back to the creator.
    pub async fn close_game(&self, short_id: &str, user: UserId) -> Result<Amount> {
        let game = self.ledger.get_game_by_short_id(short_id).await?;
        self.ledger.close_game(game.id, user).await
    }

    // ---- reads ----------------------------------------------------

    pub async fn list_active_games(&self) -> Result<Vec<GameView>> {
        let games = self.ledger.list_active_games(LIST_LIMIT).await?;
        Ok(games.iter().map(GameView::from).collect())
    }

    pub async fn game_by_short_id(&self, short_id: &str) -> Result<GameView> {
        let game = self.ledger.get_game_by_short_id(short_id).await?;
        Ok(GameView::from(&game))
    }

    pub async fn my_lobbies(&self, user: UserId) -> Result<Vec<Lobby>> {
        self.ledger.lobbies_by_user(user, LIST_LIMIT).await
    }

    pub async fn lobby_attempts(&self, lobby_id: Uuid, user: UserId) -> Result<Vec<Attempt>> {
        let lobby = self.ledger.get_lobby(lobby_id).await?;
        if lobby.user_id != user {
            return Err(Error::NotLobbyOwner);
        }
        self.ledger.attempts_by_lobby(lobby_id).await
    }

    pub async fn my_history(&self, user: UserId) -> Result<Vec<HistoryEvent>> {
        self.ledger.history_by_user(user, LIST_LIMIT).await
    }

    pub async fn my_transactions(&self, user: UserId) -> Result<Vec<LedgerEntry>> {
        self.ledger.transactions_by_user(user, LIST_LIMIT).await
    }

    pub async fn my_balance(
        &self,
        user: UserId,
        currency: Currency,
    ) -> Result<wordpool_core::types::BalanceView> {
        self.ledger.balance(user, currency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordpool_chain::MockChain;
    use wordpool_core::amount::NANO;
    use wordpool_core::store::{CreditDepositParams, OpenLobbyParams};
    use wordpool_core::types::LetterMark;
    use wordpool_ledger::SqliteLedger;

    fn service() -> (GameService, Arc<MockChain>, Arc<dyn LedgerT>) {
        let chain = Arc::new(MockChain::default());
        let ledger: Arc<dyn LedgerT> = Arc::new(SqliteLedger::try_new_mem(500).unwrap());
        let bus = Arc::new(EventBus::new());
        let service = GameService::new(
            ledger.clone(),
            chain.clone() as Arc<dyn ChainT>,
            bus,
            "EQCmaster".into(),
        );
        (service, chain, ledger)
    }

    fn params() -> CreateGameParams {
        CreateGameParams {
            word: "APPLE".into(),
            language: Language::En,
            max_tries: 6,
            multiplier_bps: 20_000,
            min_bet: NANO,
            max_bet: 5 * NANO,
            currency: Currency::Ton,
            required_deposit: 10 * NANO,
            time_limit_secs: 1800,
        }
    }

    #[tokio::test]
    async fn test_create_game_returns_invoice() {
        let (service, _, ledger) = service();
        let invoice = service.create_game(1001, "creator", params()).await.unwrap();
        assert_eq!(invoice.game.status, GameStatus::Pending);
        assert_eq!(invoice.game.word_len, 5);
        assert!(invoice.comment.starts_with("GD_"));
        assert!(invoice
            .deep_link
            .starts_with("ton://transfer/EQCmaster?amount=10000000000&text=GD_"));

        // The secret word is stored normalized but never exposed.
        let game = ledger
            .get_game_by_short_id(&invoice.game.short_id)
            .await
            .unwrap();
        assert_eq!(game.secret_word, "apple");
        let comment = PaymentComment::parse(&invoice.comment).unwrap();
        assert_eq!(comment.short_id, invoice.game.short_id);
    }

    #[tokio::test]
    async fn test_create_game_validation() {
        let (service, _, _) = service();

        let mut p = params();
        p.word = "app le".into();
        assert_eq!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::AlphabetMismatch
        );

        let mut p = params();
        p.word = "ab".into();
        assert!(matches!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::InvalidWord(_)
        ));

        let mut p = params();
        p.multiplier_bps = 9_000;
        assert_eq!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::InvalidMultiplier
        );

        let mut p = params();
        p.min_bet = 6 * NANO;
        assert_eq!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::InvalidBetRange
        );

        // 5.0 max bet at 2x requires at least a 10.0 deposit.
        let mut p = params();
        p.required_deposit = 9 * NANO;
        assert_eq!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::DepositTooSmall
        );

        let mut p = params();
        p.time_limit_secs = 30;
        assert_eq!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::InvalidTimeLimit
        );

        let mut p = params();
        p.max_tries = 0;
        assert_eq!(
            service.create_game(1, "u", p).await.unwrap_err(),
            Error::InvalidMaxTries
        );
    }

    async fn activated(service: &GameService, ledger: &Arc<dyn LedgerT>) -> GameView {
        let invoice = service.create_game(1001, "creator", params()).await.unwrap();
        ledger
            .credit_game_deposit(CreditDepositParams {
                game_id: invoice.game.id,
                currency: Currency::Ton,
                amount: 10 * NANO,
                tx_hash: "H1".into(),
                lt: 100,
                from_addr: "creator_wallet".into(),
            })
            .await
            .unwrap();
        service.game_by_short_id(&invoice.game.short_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_join_flow_and_guessing() {
        let (service, _, ledger) = service();
        let game = activated(&service, &ledger).await;
        assert_eq!(game.status, GameStatus::Active);

        let join = service
            .request_join(&game.short_id, 2002, "player")
            .await
            .unwrap();
        assert!(join.comment.starts_with("LB_"));
        assert_eq!(join.min_bet, NANO);

        // The bet lands on chain; the reconciler opens the lobby.
        let lobby = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 2002,
                amount: 3 * NANO,
                currency: Currency::Ton,
                tx_hash: "H2".into(),
                lt: 110,
                now: now_secs(),
            })
            .await
            .unwrap();

        // Guessing someone else's lobby is rejected.
        assert_eq!(
            service.submit_guess(lobby.id, 9999, "plate").await.unwrap_err(),
            Error::NotLobbyOwner
        );

        // Wrong length surfaces as validation before any state change.
        assert!(matches!(
            service.submit_guess(lobby.id, 2002, "pear").await.unwrap_err(),
            Error::WordLengthMismatch(5, 4)
        ));

        let o = service.submit_guess(lobby.id, 2002, "PLATE").await.unwrap();
        assert_eq!(o.verdict, GuessVerdict::InProgress);
        assert_eq!(o.lobby.tries_used, 1);

        let o = service.submit_guess(lobby.id, 2002, "apple").await.unwrap();
        assert_eq!(o.verdict, GuessVerdict::Won(5_700_000_000));
        assert!(o.marks.iter().all(|m| *m == LetterMark::Hit));

        let attempts = service.lobby_attempts(lobby.id, 2002).await.unwrap();
        assert_eq!(attempts.len(), 2);
        let history = service.my_history(2002).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_join_requires_active_game() {
        let (service, _, _) = service();
        let invoice = service.create_game(1001, "creator", params()).await.unwrap();
        assert_eq!(
            service
                .request_join(&invoice.game.short_id, 2002, "p")
                .await
                .unwrap_err(),
            Error::GameNotActive
        );
        assert!(matches!(
            service.request_join("NOSUCH", 2002, "p").await.unwrap_err(),
            Error::GameNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_request_withdraw_validation_and_queue() {
        let (service, chain, ledger) = service();
        let game = activated(&service, &ledger).await;
        let lobby = ledger
            .open_lobby(OpenLobbyParams {
                game_id: game.id,
                user_id: 2002,
                amount: 3 * NANO,
                currency: Currency::Ton,
                tx_hash: "H2".into(),
                lt: 110,
                now: now_secs(),
            })
            .await
            .unwrap();
        service.submit_guess(lobby.id, 2002, "apple").await.unwrap();

        // Bad address.
        assert!(matches!(
            service
                .request_withdraw(2002, 5 * NANO, Some("!bogus".into()), Currency::Ton)
                .await
                .unwrap_err(),
            Error::InvalidAddress(_)
        ));
        // No address on file and none given.
        assert!(matches!(
            service
                .request_withdraw(2002, 5 * NANO, None, Currency::Ton)
                .await
                .unwrap_err(),
            Error::InvalidAddress(_)
        ));
        // Below minimum + fee.
        assert_eq!(
            service
                .request_withdraw(2002, NANO, Some("A_valid".into()), Currency::Ton)
                .await
                .unwrap_err(),
            Error::BelowMinWithdraw
        );

        let tx_id = service
            .request_withdraw(2002, 5 * NANO, Some("A_valid".into()), Currency::Ton)
            .await
            .unwrap();
        let balance = service.my_balance(2002, Currency::Ton).await.unwrap();
        assert_eq!(balance.available, 700_000_000);
        assert_eq!(balance.pending_withdraw, 5 * NANO);

        // The fee was taken from the chain adapter.
        let rows = service.my_transactions(2002).await.unwrap();
        let row = rows.iter().find(|r| r.id == tx_id).unwrap();
        assert_eq!(row.fee, chain.fee(Currency::Ton, 5 * NANO));
    }

    #[tokio::test]
    async fn test_wallet_registration_validates_address() {
        let (service, _, ledger) = service();
        ledger.ensure_user(2002, "p").await.unwrap();
        assert!(matches!(
            service.register_wallet(2002, "!bad").await.unwrap_err(),
            Error::InvalidAddress(_)
        ));
        service.register_wallet(2002, "w2002").await.unwrap();
        let user = ledger.find_user_by_wallet("w2002").await.unwrap().unwrap();
        assert_eq!(user.id, 2002);
    }

    #[tokio::test]
    async fn test_pause_resume_close() {
        let (service, _, ledger) = service();
        let game = activated(&service, &ledger).await;
        let paused = service.pause_game(&game.short_id, 1001).await.unwrap();
        assert_eq!(paused.status, GameStatus::Inactive);
        assert!(service.list_active_games().await.unwrap().is_empty());
        let resumed = service.resume_game(&game.short_id, 1001).await.unwrap();
        assert_eq!(resumed.status, GameStatus::Active);
        assert_eq!(service.list_active_games().await.unwrap().len(), 1);
        let remainder = service.close_game(&game.short_id, 1001).await.unwrap();
        assert_eq!(remainder, 10 * NANO);
    }
}
