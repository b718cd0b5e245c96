//! JSON-RPC surface over the service boundary. Auth, rate limits and
//! human-facing routing belong to the HTTP collaborator in front of
//! this server; methods take the authenticated user id as a parameter.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::Method;
use jsonrpsee::core::Error as RpcError;
use jsonrpsee::server::{AllowHosts, ServerBuilder};
use jsonrpsee::types::error::{CallError, ErrorObject};
use jsonrpsee::types::Params;
use jsonrpsee::RpcModule;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use wordpool_core::amount::Amount;
use wordpool_core::error::{Error, ErrorKind};
use wordpool_core::types::{Currency, UserId};

use crate::context::ApplicationContext;
use crate::service::{CreateGameParams, GameService};

/// Owned context handed to the RPC module; jsonrpsee wraps it in an
/// `Arc` itself.
pub struct RpcContext {
    service: Arc<GameService>,
}

fn to_rpc_error(e: Error) -> RpcError {
    let code = match e.kind() {
        ErrorKind::Validation => -32001,
        ErrorKind::NotFound => -32002,
        ErrorKind::Conflict => -32003,
        ErrorKind::InsufficientFunds => -32004,
        ErrorKind::Transient => -32005,
        ErrorKind::Fatal => -32006,
    };
    RpcError::Call(CallError::Custom(ErrorObject::owned(
        code,
        e.to_string(),
        None::<()>,
    )))
}

#[derive(Deserialize)]
struct CreateGameRequest {
    user_id: UserId,
    nick: String,
    #[serde(flatten)]
    params: CreateGameParams,
}

#[derive(Deserialize)]
struct JoinRequest {
    user_id: UserId,
    nick: String,
    short_id: String,
}

#[derive(Deserialize)]
struct GuessRequest {
    user_id: UserId,
    lobby_id: Uuid,
    word: String,
}

#[derive(Deserialize)]
struct WithdrawRequest {
    user_id: UserId,
    amount: Amount,
    to_address: Option<String>,
    currency: Currency,
}

#[derive(Deserialize)]
struct WalletRequest {
    user_id: UserId,
    address: String,
}

#[derive(Deserialize)]
struct GameRefRequest {
    user_id: UserId,
    short_id: String,
}

#[derive(Deserialize)]
struct ShortIdRequest {
    short_id: String,
}

#[derive(Deserialize)]
struct UserRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
struct LobbyRequest {
    user_id: UserId,
    lobby_id: Uuid,
}

#[derive(Deserialize)]
struct BalanceRequest {
    user_id: UserId,
    currency: Currency,
}

async fn create_game(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<crate::service::GameInvoice, RpcError> {
    let req: CreateGameRequest = params.parse()?;
    context
        .service
        .create_game(req.user_id, &req.nick, req.params)
        .await
        .map_err(to_rpc_error)
}

async fn request_join(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<crate::service::JoinInvoice, RpcError> {
    let req: JoinRequest = params.parse()?;
    context
        .service
        .request_join(&req.short_id, req.user_id, &req.nick)
        .await
        .map_err(to_rpc_error)
}

async fn submit_guess(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<crate::service::GuessOutcome, RpcError> {
    let req: GuessRequest = params.parse()?;
    context
        .service
        .submit_guess(req.lobby_id, req.user_id, &req.word)
        .await
        .map_err(to_rpc_error)
}

async fn request_withdraw(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Uuid, RpcError> {
    let req: WithdrawRequest = params.parse()?;
    context
        .service
        .request_withdraw(req.user_id, req.amount, req.to_address, req.currency)
        .await
        .map_err(to_rpc_error)
}

async fn register_wallet(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<(), RpcError> {
    let req: WalletRequest = params.parse()?;
    context
        .service
        .register_wallet(req.user_id, &req.address)
        .await
        .map_err(to_rpc_error)
}

async fn pause_game(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<wordpool_core::types::GameView, RpcError> {
    let req: GameRefRequest = params.parse()?;
    context
        .service
        .pause_game(&req.short_id, req.user_id)
        .await
        .map_err(to_rpc_error)
}

async fn resume_game(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<wordpool_core::types::GameView, RpcError> {
    let req: GameRefRequest = params.parse()?;
    context
        .service
        .resume_game(&req.short_id, req.user_id)
        .await
        .map_err(to_rpc_error)
}

async fn close_game(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Amount, RpcError> {
    let req: GameRefRequest = params.parse()?;
    context
        .service
        .close_game(&req.short_id, req.user_id)
        .await
        .map_err(to_rpc_error)
}

async fn list_games(
    _params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Vec<wordpool_core::types::GameView>, RpcError> {
    context.service.list_active_games().await.map_err(to_rpc_error)
}

async fn get_game(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<wordpool_core::types::GameView, RpcError> {
    let req: ShortIdRequest = params.parse()?;
    context
        .service
        .game_by_short_id(&req.short_id)
        .await
        .map_err(to_rpc_error)
}

async fn my_lobbies(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Vec<wordpool_core::types::Lobby>, RpcError> {
    let req: UserRequest = params.parse()?;
    context.service.my_lobbies(req.user_id).await.map_err(to_rpc_error)
}

async fn lobby_attempts(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Vec<wordpool_core::types::Attempt>, RpcError> {
    let req: LobbyRequest = params.parse()?;
    context
        .service
        .lobby_attempts(req.lobby_id, req.user_id)
        .await
        .map_err(to_rpc_error)
}

async fn my_history(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Vec<wordpool_core::types::HistoryEvent>, RpcError> {
    let req: UserRequest = params.parse()?;
    context.service.my_history(req.user_id).await.map_err(to_rpc_error)
}

async fn my_transactions(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<Vec<wordpool_core::types::LedgerEntry>, RpcError> {
    let req: UserRequest = params.parse()?;
    context
        .service
        .my_transactions(req.user_id)
        .await
        .map_err(to_rpc_error)
}

async fn my_balance(
    params: Params<'_>,
    context: Arc<RpcContext>,
) -> Result<wordpool_core::types::BalanceView, RpcError> {
    let req: BalanceRequest = params.parse()?;
    context
        .service
        .my_balance(req.user_id, req.currency)
        .await
        .map_err(to_rpc_error)
}

pub async fn run_server(context: Arc<ApplicationContext>) -> anyhow::Result<()> {
    let rpc_context = RpcContext {
        service: context.service.clone(),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::POST])
        .allow_origin(Any)
        .allow_headers([hyper::header::CONTENT_TYPE]);

    let middleware = ServiceBuilder::new().layer(cors);

    let host = format!("0.0.0.0:{}", context.config.server.port);

    let server = ServerBuilder::default()
        .set_host_filtering(AllowHosts::Any)
        .set_middleware(middleware)
        .build(host.parse::<SocketAddr>()?)
        .await?;

    let mut module = RpcModule::new(rpc_context);
    module.register_async_method("create_game", create_game)?;
    module.register_async_method("request_join", request_join)?;
    module.register_async_method("submit_guess", submit_guess)?;
    module.register_async_method("request_withdraw", request_withdraw)?;
    module.register_async_method("register_wallet", register_wallet)?;
    module.register_async_method("pause_game", pause_game)?;
    module.register_async_method("resume_game", resume_game)?;
    module.register_async_method("close_game", close_game)?;
    module.register_async_method("list_games", list_games)?;
    module.register_async_method("get_game", get_game)?;
    module.register_async_method("my_lobbies", my_lobbies)?;
    module.register_async_method("lobby_attempts", lobby_attempts)?;
    module.register_async_method("my_history", my_history)?;
    module.register_async_method("my_transactions", my_transactions)?;
    module.register_async_method("my_balance", my_balance)?;

    let handle = server.start(module)?;
    info!("Server started at {:?}", host);
    handle.stopped().await;
    Ok(())
}
