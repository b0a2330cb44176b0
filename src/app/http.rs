// ==========================================
// 订单产能管控 - HTTP 接口
// ==========================================
// 职责: axum 路由、请求/响应 DTO（意大利语字段名）、错误映射
// 约束: 仓储调用均为阻塞 IO，统一放入 spawn_blocking
// ==========================================

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::api::limit_api::LimitAvailability;
use crate::app::state::AppState;
use crate::domain::action_log::ActionLog;
use crate::domain::admission::{AdmissionResult, CapacityFinding};
use crate::domain::limit::{CapacityConstraint, LimitPatch, NewProductionLimit, ProductionLimit};
use crate::domain::order::{OrderLineItem, OrderReservation};
use crate::engine::override_gate::{RemainingCapacity, ReservationOutcome};

/// 操作人请求头
pub const ACTOR_HEADER: &str = "x-operatore";
const DEFAULT_ACTOR: &str = "api";

type SharedState = Arc<AppState>;

// ==========================================
// 路由
// ==========================================

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/limiti", get(list_limits).post(create_limit))
        .route("/limiti/bulk", post(bulk_create_limits))
        .route("/limiti/verifica", post(verify_order))
        .route("/limiti/vendita-diretta", post(direct_sale))
        .route("/limiti/disponibilita", get(availability))
        .route("/limiti/audit", get(recent_audit))
        .route("/limiti/:id", put(update_limit).delete(delete_limit))
        .route(
            "/ordini/:id/capacita",
            get(get_order_reservation)
                .post(reserve_order)
                .put(update_order)
                .delete(release_order),
        )
        .route("/ordini/:id/storico", get(order_history))
        .with_state(state)
}

/// 启动 HTTP 服务
pub async fn serve(state: SharedState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("监听地址格式错误: {}", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("无法监听 {}", addr))?;

    tracing::info!(%addr, db_path = %state.db_path, "HTTP 服务已启动");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==========================================
// DTO
// ==========================================

/// 限额记录（响应）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitDto {
    pub id: String,
    pub data: NaiveDate,
    pub prodotto: Option<String>,
    pub categoria: Option<String>,
    pub limite_quantita: f64,
    pub unita_misura: String,
    pub quantita_prenotata: f64,
    pub quantita_disponibile: f64,
    pub attivo: bool,
    pub soglia_allerta: f64,
}

impl From<&ProductionLimit> for LimitDto {
    fn from(limit: &ProductionLimit) -> Self {
        Self {
            id: limit.limit_id.clone(),
            data: limit.date,
            prodotto: limit.scope.product().map(str::to_string),
            categoria: limit.scope.category().map(str::to_string),
            limite_quantita: limit.ceiling,
            unita_misura: limit.unit.to_string(),
            quantita_prenotata: limit.consumed,
            quantita_disponibile: limit.remaining(),
            attivo: limit.active,
            soglia_allerta: limit.warn_threshold_pct,
        }
    }
}

/// 新建限额（请求）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLimitRequest {
    pub data: Option<String>,
    pub prodotto: Option<String>,
    pub categoria: Option<String>,
    pub limite_quantita: Option<f64>,
    pub unita_misura: Option<String>,
    #[serde(alias = "sogliAllerta")]
    pub soglia_allerta: Option<f64>,
}

impl CreateLimitRequest {
    pub fn into_domain(self) -> ApiResult<NewProductionLimit> {
        let date = self.data.as_deref().map(parse_wire_date).transpose()?;
        Ok(NewProductionLimit {
            date,
            product: self.prodotto,
            category: self.categoria,
            ceiling: self.limite_quantita,
            unit: self.unita_misura,
            warn_threshold_pct: self.soglia_allerta,
        })
    }
}

/// 修改限额（请求）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLimitRequest {
    pub limite_quantita: Option<f64>,
    pub unita_misura: Option<String>,
    pub attivo: Option<bool>,
    #[serde(alias = "sogliAllerta")]
    pub soglia_allerta: Option<f64>,
}

impl From<UpdateLimitRequest> for LimitPatch {
    fn from(req: UpdateLimitRequest) -> Self {
        LimitPatch {
            ceiling: req.limite_quantita,
            unit: req.unita_misura,
            active: req.attivo,
            warn_threshold_pct: req.soglia_allerta,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkCreateRequest {
    pub limiti: Vec<CreateLimitRequest>,
}

/// 订单行（请求）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemDto {
    pub nome: String,
    pub quantita: f64,
    #[serde(default, alias = "unitaMisura")]
    pub unita: Option<String>,
    #[serde(default)]
    pub categoria: Option<String>,
    #[serde(default)]
    pub composto: bool,
}

impl From<LineItemDto> for OrderLineItem {
    fn from(dto: LineItemDto) -> Self {
        OrderLineItem {
            name: dto.nome,
            quantity: dto.quantita,
            unit: dto.unita.unwrap_or_else(|| "kg".to_string()),
            category: dto.categoria,
            composite: dto.composto,
        }
    }
}

/// 准入预检 / 订单预占（请求）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCapacityRequest {
    pub data_ritiro: String,
    #[serde(default)]
    pub prodotti: Vec<LineItemDto>,
    #[serde(default)]
    pub force_override: bool,
}

impl OrderCapacityRequest {
    fn into_parts(self) -> ApiResult<(NaiveDate, Vec<OrderLineItem>, bool)> {
        let date = parse_wire_date(&self.data_ritiro)?;
        let items = self.prodotti.into_iter().map(OrderLineItem::from).collect();
        Ok((date, items, self.force_override))
    }
}

/// 直接销售（请求）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectSaleRequest {
    pub data: String,
    pub prodotto: String,
    pub quantita: f64,
    #[serde(default, alias = "unita")]
    pub unita_misura: Option<String>,
    #[serde(default)]
    pub categoria: Option<String>,
    #[serde(default)]
    pub force_override: bool,
}

/// 检查发现（响应）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingDto {
    pub tipo: String,
    pub nome: String,
    pub quantita_richiesta: f64,
    pub quantita_disponibile: f64,
    pub limite: f64,
    pub unita_misura: String,
    pub superato: bool,
}

impl From<&CapacityFinding> for FindingDto {
    fn from(f: &CapacityFinding) -> Self {
        Self {
            tipo: f.scope_kind.wire_name().to_string(),
            nome: f.name.clone(),
            quantita_richiesta: f.requested,
            quantita_disponibile: f.available,
            limite: f.ceiling,
            unita_misura: f.unit.to_string(),
            superato: f.is_blocking(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub ok: bool,
    pub errori: Vec<FindingDto>,
    pub forzato: bool,
}

impl From<&AdmissionResult> for VerifyResponse {
    fn from(result: &AdmissionResult) -> Self {
        Self {
            ok: result.ok,
            errori: result.findings.iter().map(FindingDto::from).collect(),
            forzato: result.overridden,
        }
    }
}

/// 预占后剩余量（响应）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingDto {
    pub id: String,
    pub tipo: String,
    pub nome: String,
    pub limite: f64,
    pub quantita_prenotata: f64,
    pub quantita_rimanente: f64,
    pub unita_misura: String,
}

impl From<&RemainingCapacity> for RemainingDto {
    fn from(r: &RemainingCapacity) -> Self {
        Self {
            id: r.limit_id.clone(),
            tipo: r.scope_kind.wire_name().to_string(),
            nome: r.name.clone(),
            limite: r.ceiling,
            quantita_prenotata: r.consumed,
            quantita_rimanente: r.remaining,
            unita_misura: r.unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub ok: bool,
    pub forzato: bool,
    pub avvisi: Vec<FindingDto>,
    pub disponibilita: Vec<RemainingDto>,
}

impl From<&ReservationOutcome> for ReservationResponse {
    fn from(outcome: &ReservationOutcome) -> Self {
        Self {
            ok: outcome.committed,
            forzato: outcome.admission.overridden,
            avvisi: outcome.admission.warnings().map(FindingDto::from).collect(),
            disponibilita: outcome.remaining.iter().map(RemainingDto::from).collect(),
        }
    }
}

/// 余量视图（响应）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityDto {
    pub id: String,
    pub data: NaiveDate,
    pub tipo: String,
    pub nome: String,
    pub limite: f64,
    pub quantita_prenotata: f64,
    pub quantita_disponibile: f64,
    pub percentuale_utilizzo: f64,
    pub unita_misura: String,
    pub stato: String,
}

impl From<&LimitAvailability> for AvailabilityDto {
    fn from(a: &LimitAvailability) -> Self {
        Self {
            id: a.limit_id.clone(),
            data: a.date,
            tipo: a.scope_kind.wire_name().to_string(),
            nome: a.name.clone(),
            limite: a.ceiling,
            quantita_prenotata: a.consumed,
            quantita_disponibile: a.available,
            percentuale_utilizzo: a.usage_pct,
            unita_misura: a.unit.to_string(),
            stato: a.status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListLimitsQuery {
    pub data: Option<String>,
    pub attivo: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateQuery {
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub schema_version: Option<i64>,
    /// 未知单位按原值透传的累计次数（进程启动以来）
    pub pass_through_count: u64,
}

// ==========================================
// 处理器
// ==========================================

pub async fn healthz(State(state): State<SharedState>) -> Response {
    let pass_through_count = state.gate.checker().normalizer().pass_through_count();
    let result = run_blocking(move || {
        state
            .schema_version()
            .map_err(ApiError::DatabaseConnectionError)
    })
    .await;

    match result {
        Ok(schema_version) => Json(HealthResponse {
            status: "ok".to_string(),
            schema_version,
            pass_through_count,
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: format!("error: {}", e),
                schema_version: None,
                pass_through_count,
            }),
        )
            .into_response(),
    }
}

pub async fn list_limits(
    State(state): State<SharedState>,
    Query(query): Query<ListLimitsQuery>,
) -> Result<Json<Vec<LimitDto>>, ApiError> {
    let date = query.data.as_deref().map(parse_wire_date).transpose()?;
    let limits = run_blocking(move || state.limit_api.list_limits(date, query.attivo)).await?;
    Ok(Json(limits.iter().map(LimitDto::from).collect()))
}

pub async fn create_limit(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<CreateLimitRequest>,
) -> Result<(StatusCode, Json<LimitDto>), ApiError> {
    let actor = actor_from(&headers);
    let new_limit = req.into_domain()?;
    let limit = run_blocking(move || state.limit_api.create_limit(new_limit, &actor)).await?;
    Ok((StatusCode::CREATED, Json(LimitDto::from(&limit))))
}

pub async fn update_limit(
    State(state): State<SharedState>,
    Path(limit_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateLimitRequest>,
) -> Result<Json<LimitDto>, ApiError> {
    let actor = actor_from(&headers);
    let patch = LimitPatch::from(req);
    let limit =
        run_blocking(move || state.limit_api.update_limit(&limit_id, patch, &actor)).await?;
    Ok(Json(LimitDto::from(&limit)))
}

pub async fn delete_limit(
    State(state): State<SharedState>,
    Path(limit_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let actor = actor_from(&headers);
    run_blocking(move || state.limit_api.delete_limit(&limit_id, &actor)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_create_limits(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<BulkCreateRequest>,
) -> Result<(StatusCode, Json<Vec<LimitDto>>), ApiError> {
    let actor = actor_from(&headers);
    let reqs = req
        .limiti
        .into_iter()
        .map(CreateLimitRequest::into_domain)
        .collect::<ApiResult<Vec<_>>>()?;
    let limits = run_blocking(move || state.limit_api.bulk_create(reqs, &actor)).await?;
    Ok((
        StatusCode::CREATED,
        Json(limits.iter().map(LimitDto::from).collect()),
    ))
}

pub async fn verify_order(
    State(state): State<SharedState>,
    Json(req): Json<OrderCapacityRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let (date, items, force) = req.into_parts()?;
    let result = run_blocking(move || state.limit_api.verify(date, &items, force)).await?;
    Ok(Json(VerifyResponse::from(&result)))
}

pub async fn direct_sale(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<DirectSaleRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let actor = actor_from(&headers);
    let date = parse_wire_date(&req.data)?;
    let item = OrderLineItem {
        name: req.prodotto,
        quantity: req.quantita,
        unit: req.unita_misura.unwrap_or_else(|| "kg".to_string()),
        category: req.categoria,
        composite: false,
    };
    let force = req.force_override;
    let outcome =
        run_blocking(move || state.limit_api.direct_sale(date, item, force, &actor)).await?;
    Ok(Json(ReservationResponse::from(&outcome)))
}

pub async fn availability(
    State(state): State<SharedState>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<AvailabilityDto>>, ApiError> {
    let date = parse_wire_date(&query.data)?;
    let view = run_blocking(move || state.limit_api.availability(date)).await?;
    Ok(Json(view.iter().map(AvailabilityDto::from).collect()))
}

pub async fn recent_audit(
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<ActionLog>>, ApiError> {
    let logs = run_blocking(move || state.limit_api.recent_audit(query.limit)).await?;
    Ok(Json(logs))
}

pub async fn get_order_reservation(
    State(state): State<SharedState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderReservation>, ApiError> {
    let reservation =
        run_blocking(move || state.order_capacity_api.get_reservation(&order_id)).await?;
    Ok(Json(reservation))
}

pub async fn reserve_order(
    State(state): State<SharedState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<OrderCapacityRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let actor = actor_from(&headers);
    let (date, items, force) = req.into_parts()?;
    let outcome = run_blocking(move || {
        state
            .order_capacity_api
            .reserve(&order_id, date, &items, force, &actor)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ReservationResponse::from(&outcome)),
    ))
}

pub async fn update_order(
    State(state): State<SharedState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<OrderCapacityRequest>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let actor = actor_from(&headers);
    let (date, items, force) = req.into_parts()?;
    let outcome = run_blocking(move || {
        state
            .order_capacity_api
            .update(&order_id, date, &items, force, &actor)
    })
    .await?;
    Ok(Json(ReservationResponse::from(&outcome)))
}

pub async fn release_order(
    State(state): State<SharedState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor_from(&headers);
    let released =
        run_blocking(move || state.order_capacity_api.release(&order_id, &actor)).await?;
    Ok(Json(json!({ "rilasciato": released })))
}

pub async fn order_history(
    State(state): State<SharedState>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<ActionLog>>, ApiError> {
    let logs = run_blocking(move || state.order_capacity_api.order_history(&order_id)).await?;
    Ok(Json(logs))
}

// ==========================================
// 错误映射
// ==========================================

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_)
            | ApiError::ValidationError(_)
            | ApiError::AdmissionBlocked { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::DatabaseBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_)
            | ApiError::DatabaseConnectionError(_)
            | ApiError::DatabaseTransactionError(_)
            | ApiError::InternalError(_)
            | ApiError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let ApiError::AdmissionBlocked { findings } = &self {
            let errors: Vec<FindingDto> = findings.iter().map(FindingDto::from).collect();
            return (
                status,
                Json(json!({
                    "superaLimiti": true,
                    "erroriLimiti": errors,
                    "messaggio": self.to_string(),
                })),
            )
                .into_response();
        }

        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "请求处理失败");
        }

        (
            status,
            Json(json!({ "code": self.code(), "message": self.to_string() })),
        )
            .into_response()
    }
}

// ==========================================
// 工具函数
// ==========================================

/// 解析对外日期：YYYY-MM-DD，或 RFC3339 时间戳（按本地日历取日期）
pub fn parse_wire_date(raw: &str) -> ApiResult<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Local).date_naive())
        .map_err(|e| {
            ApiError::InvalidInput(format!(
                "日期格式错误（应为YYYY-MM-DD或RFC3339）: {} ({})",
                raw, e
            ))
        })
}

fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_string()
}

async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::InternalError(format!("任务执行失败: {}", e)))?
}
