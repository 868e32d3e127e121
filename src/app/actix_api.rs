use crate::{
    Result,
    app::{
        executor::ExecuteRequest,
        preparer::PreparedTransaction,
        query_api::{
            ExecuteQuery,
            PrepareQuery,
            Query,
            QueryAPI,
            RecoverQuery,
            SettleQuery,
        },
        recovery::RecoveryTarget,
    },
    error::ServiceError,
    model::{
        Caller,
        Intent,
    },
};
use actix_web::{
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    error::ErrorInternalServerError,
    http::StatusCode,
    web,
};
use anyhow::{
    Context,
    anyhow,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::TcpListener,
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};

const CRON_SECRET_HEADER: &str = "x-cron-secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareDto {
    user_id: String,
    address: String,
    intent: Intent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct PreparedDto {
    transaction_bytes: String,
    nonce: String,
    expires_at: DateTime<Utc>,
}

impl From<PreparedTransaction> for PreparedDto {
    fn from(prepared: PreparedTransaction) -> Self {
        Self {
            transaction_bytes: hex::encode(prepared.transaction_bytes),
            nonce: prepared.nonce,
            expires_at: prepared.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteDto {
    user_id: String,
    address: String,
    transaction_bytes: String,
    signature: String,
    nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoverDto {
    target: RecoverTargetDto,
    id: String,
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum RecoverTargetDto {
    RoundCreate,
    RoundFinalize,
    BetPlacement,
    BetClaim,
}

impl RecoverDto {
    fn into_target(self) -> (RecoveryTarget, Option<String>) {
        let target = match self.target {
            RecoverTargetDto::RoundCreate => RecoveryTarget::RoundCreate(self.id),
            RecoverTargetDto::RoundFinalize => RecoveryTarget::RoundFinalize(self.id),
            RecoverTargetDto::BetPlacement => RecoveryTarget::BetPlacement(self.id),
            RecoverTargetDto::BetClaim => RecoveryTarget::BetClaim(self.id),
        };
        (target, self.digest)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoveredDto {
    updated: bool,
    digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleDto {
    round_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ErrorDto {
    code: String,
    message: String,
}

#[derive(Clone)]
struct CronSecret(Option<String>);

/// HTTP front for the app loop. Handlers forward queries over a channel and
/// wait for the loop's response; the server itself holds no service state.
pub struct ActixApi {
    receiver: mpsc::Receiver<Query>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixApi {
    pub async fn new(port: Option<u16>, cron_secret: Option<String>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(16);

        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for the API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("API listening on {}", base_url);

        let server_sender = sender.clone();
        let secret = CronSecret(cron_secret);
        let server = HttpServer::new(move || {
            let sender = server_sender.clone();
            App::new()
                .app_data(web::Data::new(sender))
                .app_data(web::Data::new(secret.clone()))
                .route("/tx/prepare", web::post().to(handle_prepare))
                .route("/tx/execute", web::post().to(handle_execute))
                .route("/recovery/run", web::post().to(handle_recover))
                .route("/backfill/run", web::post().to(handle_backfill))
                .route("/settlement/run", web::post().to(handle_settlement))
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl QueryAPI for ActixApi {
    async fn query(&mut self) -> Result<Query> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("query server closed"))
    }
}

impl Drop for ActixApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

fn error_status(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        ServiceError::NonceExpired | ServiceError::NonceInvalid => StatusCode::CONFLICT,
        ServiceError::ChainExecutionFailed(_) | ServiceError::ChainTxFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Pending(_) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::DeprecatedJob => StatusCode::GONE,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: Result<T, ServiceError>) -> HttpResponse {
    match result {
        Ok(value) => HttpResponse::Ok().json(value),
        Err(error) => HttpResponse::build(error_status(&error)).json(ErrorDto {
            code: error.code().to_string(),
            message: error.to_string(),
        }),
    }
}

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorDto {
        code: "VALIDATION_ERROR".to_string(),
        message: message.to_string(),
    })
}

fn cron_guard(req: &HttpRequest, secret: &CronSecret) -> Option<HttpResponse> {
    let Some(expected) = &secret.0 else {
        return None;
    };
    let supplied = req
        .headers()
        .get(CRON_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if supplied == Some(expected.as_str()) {
        None
    } else {
        Some(HttpResponse::Unauthorized().json(ErrorDto {
            code: "VALIDATION_ERROR".to_string(),
            message: "missing or wrong cron secret".to_string(),
        }))
    }
}

async fn handle_prepare(
    sender: web::Data<mpsc::Sender<Query>>,
    body: web::Json<PrepareDto>,
) -> actix_web::Result<HttpResponse> {
    let dto = body.into_inner();
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::Prepare(PrepareQuery {
        caller: Caller {
            user_id: dto.user_id,
            address: dto.address,
        },
        intent: dto.intent,
        responder: response_sender,
    });

    sender
        .get_ref()
        .clone()
        .send(query)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward prepare query"))?;
    let result = response_receiver
        .await
        .map_err(|_| ErrorInternalServerError("prepare responder dropped"))?;

    Ok(respond(result.map(PreparedDto::from)))
}

async fn handle_execute(
    sender: web::Data<mpsc::Sender<Query>>,
    body: web::Json<ExecuteDto>,
) -> actix_web::Result<HttpResponse> {
    let dto = body.into_inner();
    let Ok(transaction_bytes) = hex::decode(&dto.transaction_bytes) else {
        return Ok(bad_request("transactionBytes is not valid hex"));
    };
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::Execute(ExecuteQuery {
        caller: Caller {
            user_id: dto.user_id,
            address: dto.address,
        },
        request: ExecuteRequest {
            transaction_bytes,
            signature: dto.signature,
            nonce: dto.nonce,
        },
        responder: response_sender,
    });

    sender
        .get_ref()
        .clone()
        .send(query)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward execute query"))?;
    let result = response_receiver
        .await
        .map_err(|_| ErrorInternalServerError("execute responder dropped"))?;

    Ok(respond(result))
}

async fn handle_recover(
    sender: web::Data<mpsc::Sender<Query>>,
    body: web::Json<RecoverDto>,
) -> actix_web::Result<HttpResponse> {
    let (target, digest) = body.into_inner().into_target();
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::Recover(RecoverQuery {
        target,
        digest,
        responder: response_sender,
    });

    sender
        .get_ref()
        .clone()
        .send(query)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward recovery query"))?;
    let result = response_receiver
        .await
        .map_err(|_| ErrorInternalServerError("recovery responder dropped"))?;

    Ok(respond(result.map(|outcome| RecoveredDto {
        updated: outcome.updated,
        digest: outcome.digest,
    })))
}

async fn handle_backfill(
    req: HttpRequest,
    sender: web::Data<mpsc::Sender<Query>>,
    secret: web::Data<CronSecret>,
) -> actix_web::Result<HttpResponse> {
    if let Some(rejection) = cron_guard(&req, secret.get_ref()) {
        return Ok(rejection);
    }
    let (response_sender, response_receiver) = oneshot::channel();

    sender
        .get_ref()
        .clone()
        .send(Query::Backfill(response_sender))
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward backfill query"))?;
    let result = response_receiver
        .await
        .map_err(|_| ErrorInternalServerError("backfill responder dropped"))?;

    Ok(respond(result))
}

async fn handle_settlement(
    req: HttpRequest,
    sender: web::Data<mpsc::Sender<Query>>,
    secret: web::Data<CronSecret>,
    body: web::Json<SettleDto>,
) -> actix_web::Result<HttpResponse> {
    if let Some(rejection) = cron_guard(&req, secret.get_ref()) {
        return Ok(rejection);
    }
    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::Settle(SettleQuery {
        round_id: body.into_inner().round_id,
        responder: response_sender,
    });

    sender
        .get_ref()
        .clone()
        .send(query)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward settlement query"))?;
    let result = response_receiver
        .await
        .map_err(|_| ErrorInternalServerError("settlement responder dropped"))?;

    Ok(respond(result))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::model::Side;
    use chrono::TimeZone;

    #[tokio::test]
    async fn query__prepare_request_reaches_the_loop_and_response_flows_back() {
        // given
        let mut api = ActixApi::new(None, None).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/tx/prepare", api.base_url());
        let expected_prepared = PreparedTransaction {
            transaction_bytes: b"payload".to_vec(),
            nonce: "nonce-1".to_string(),
            expires_at: Utc.with_ymd_and_hms(2026, 1, 10, 12, 5, 0).unwrap(),
        };
        let expected_dto = PreparedDto::from(expected_prepared.clone());

        let client_task = tokio::spawn(async move {
            let response = client
                .post(url)
                .json(&serde_json::json!({
                    "userId": "user-1",
                    "address": "0xaddr",
                    "intent": {
                        "kind": "placeBet",
                        "roundId": "round-1",
                        "side": "Up",
                        "amount": 100,
                        "currency": "CRYSTAL"
                    }
                }))
                .send()
                .await
                .unwrap();
            response.json::<PreparedDto>().await.unwrap()
        });

        // when
        let query = api.query().await.unwrap();
        let Query::Prepare(prepare) = query else {
            panic!("expected prepare query");
        };
        assert_eq!(prepare.caller.user_id, "user-1");
        assert_eq!(
            prepare.intent,
            Intent::PlaceBet {
                round_id: "round-1".to_string(),
                side: Side::Up,
                amount: 100,
                currency: "CRYSTAL".to_string(),
            }
        );
        prepare.responder.send(Ok(expected_prepared)).unwrap();

        // then
        let response = client_task.await.unwrap();
        assert_eq!(response, expected_dto);
    }

    #[tokio::test]
    async fn query__settlement_tombstone_maps_to_410_gone() {
        // given
        let mut api = ActixApi::new(None, None).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/settlement/run", api.base_url());

        let client_task = tokio::spawn(async move {
            let response = client
                .post(url)
                .json(&serde_json::json!({"roundId": "round-1"}))
                .send()
                .await
                .unwrap();
            (response.status().as_u16(), response.json::<ErrorDto>().await.unwrap())
        });

        // when
        let query = api.query().await.unwrap();
        let Query::Settle(settle) = query else {
            panic!("expected settle query");
        };
        assert_eq!(settle.round_id, "round-1");
        settle.responder.send(Err(ServiceError::DeprecatedJob)).unwrap();

        // then
        let (status, error) = client_task.await.unwrap();
        assert_eq!(status, 410);
        assert_eq!(error.code, "DEPRECATED_JOB");
    }

    #[tokio::test]
    async fn query__backfill_without_cron_secret_is_rejected() {
        // given
        let api = ActixApi::new(None, Some("sesame".to_string())).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/backfill/run", api.base_url());

        // when: no query interception needed, the guard rejects upfront
        let response = client.post(url).send().await.unwrap();

        // then
        assert_eq!(response.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn query__execute_with_malformed_hex_is_a_bad_request() {
        // given
        let api = ActixApi::new(None, None).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/tx/execute", api.base_url());

        // when
        let response = client
            .post(url)
            .json(&serde_json::json!({
                "userId": "user-1",
                "address": "0xaddr",
                "transactionBytes": "zz-not-hex",
                "signature": "sig",
                "nonce": "nonce-1"
            }))
            .send()
            .await
            .unwrap();

        // then
        assert_eq!(response.status().as_u16(), 400);
        let error = response.json::<ErrorDto>().await.unwrap();
        assert_eq!(error.code, "VALIDATION_ERROR");
    }
}
