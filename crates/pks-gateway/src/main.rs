use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result as AnyResult};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use pks_core::{
    Account, AccountFilter, Actor, CoreError, DomainEvent, DomainEventKind, ItemRequest,
    JournalEntry, OpeningBalance, Page, PksChartTemplate, Role, StockBalance, StockDocument,
    StockLedgerEntry, StockLedgerQuery, SystemAccountKey, SystemAccountMapping, TicketFilter,
    WeighbridgeTicket,
};
use pks_finance::{
    AccountBalance, AccountLedger, AccountNode, AccountPatch, BalanceRow, BalanceSheet,
    FinanceService, IncomeStatement, NewAccount, NewJournalEntry, SystemAccountAssignment,
    TemplateInstall, TrialBalance,
};
use pks_inventory::{
    FulfilItemRequest, GoodsIssueInput, GoodsReceiptInput, LoanIssueInput, LoanReturnInput,
    NewItemRequest, StockCountInput, WarehouseService,
};
use pks_platform::{
    AccountListQuery, ApiError, AsOfQuery, CompanyQuery, DateRangeQuery, DecisionRequest,
    EntryNumberQuery, EntryNumberResponse, PgLedgerStore, PostTicketRequest, RedisBus,
    ServiceConfig, SetOpeningBalanceRequest, StockBalanceQuery, StockMovementQuery,
    TicketListQuery, TicketNumberQuery, TicketNumberResponse, ValuationQuery, ValuationResponse,
    apply_schema, connect_database,
};
use pks_weighbridge::{
    ApprovalOutcome, ApproveTicket, NewTicket, TicketPosting, TicketPricing, WeighbridgeService,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

const USER_HEADER: &str = "x-user-id";
const ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
struct AppState {
    finance: FinanceService<PgLedgerStore>,
    warehouse: WarehouseService<PgLedgerStore>,
    weighbridge: WeighbridgeService<PgLedgerStore>,
    redis: Option<RedisBus>,
}

type ApiRejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, ApiRejection>;

#[derive(Debug, Serialize)]
struct FulfilResponse {
    request: ItemRequest,
    goods_issue: StockDocument,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "pks_gateway=info,pks_finance=info,pks_inventory=info,pks_weighbridge=info,\
             pks_platform=info"
                .to_string()
        }))
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config).await?;
    apply_schema(&pool).await?;
    let store = Arc::new(PgLedgerStore::new(pool, config.lock_timeout));

    let redis = match config.redis_url.as_deref() {
        Some(url) => Some(RedisBus::connect(url)?),
        None => {
            warn!("REDIS_URL not set, domain events will not be published");
            None
        }
    };

    let state = AppState {
        finance: FinanceService::new(Arc::clone(&store)),
        warehouse: WarehouseService::new(Arc::clone(&store)),
        weighbridge: WeighbridgeService::new(store),
        redis,
    };

    for company_id in &config.company_ids {
        state
            .finance
            .validate_system_accounts(*company_id)
            .await
            .with_context(|| format!("system account map of company {company_id} is incomplete"))?;
        info!(%company_id, "system account map validated");
    }

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/accounts", get(list_accounts).post(create_account))
        .route("/accounts/tree", get(account_tree))
        .route(
            "/accounts/{account_id}",
            axum::routing::patch(update_account).delete(delete_account),
        )
        .route("/accounts/{account_id}/balance", get(account_balance))
        .route("/accounts/{account_id}/ledger", get(account_ledger))
        .route(
            "/system-accounts",
            get(list_system_accounts).put(set_system_accounts),
        )
        .route("/system-accounts/{key}", get(get_system_account))
        .route("/system-accounts/validate", post(validate_system_accounts))
        .route("/system-accounts/template", post(install_template))
        .route("/journal/entries", post(post_manual_entry))
        .route("/journal/entries/{entry_id}", get(get_entry))
        .route("/journal/entries/{entry_id}/post", post(post_draft_entry))
        .route("/journal/entries/{entry_id}/void", post(void_entry))
        .route("/journal/drafts", post(create_draft_entry))
        .route("/journal/entry-number", get(generate_entry_number))
        .route("/journal/opening-balances", post(set_opening_balance))
        .route("/reports/balances", get(all_account_balances))
        .route("/reports/trial-balance", get(trial_balance))
        .route("/reports/balance-sheet", get(balance_sheet))
        .route("/reports/income-statement", get(income_statement))
        .route("/stock/balance", get(stock_balance))
        .route("/stock/movements", get(stock_movements))
        .route("/stock/valuation", get(stock_valuation))
        .route("/warehouse/goods-receipts", post(goods_receipt))
        .route("/warehouse/goods-issues", post(goods_issue))
        .route("/warehouse/loan-issues", post(loan_issue))
        .route("/warehouse/loan-returns", post(loan_return))
        .route("/warehouse/stock-adjustments", post(stock_adjustment))
        .route("/warehouse/documents/{document_id}", get(get_document))
        .route(
            "/warehouse/documents/{document_id}/cancel",
            post(cancel_document),
        )
        .route("/warehouse/item-requests", post(create_item_request))
        .route("/warehouse/item-requests/{request_id}", get(get_item_request))
        .route(
            "/warehouse/item-requests/{request_id}/submit",
            post(submit_item_request),
        )
        .route(
            "/warehouse/item-requests/{request_id}/approve",
            post(approve_item_request),
        )
        .route(
            "/warehouse/item-requests/{request_id}/reject",
            post(reject_item_request),
        )
        .route(
            "/warehouse/item-requests/{request_id}/fulfil",
            post(fulfil_item_request),
        )
        .route(
            "/weighbridge/tickets",
            get(list_tickets).post(bulk_create_tickets),
        )
        .route("/weighbridge/tickets/{ticket_id}", get(get_ticket))
        .route("/weighbridge/tickets/{ticket_id}/pricing", put(update_pricing))
        .route("/weighbridge/tickets/{ticket_id}/approve", post(approve_ticket))
        .route("/weighbridge/tickets/{ticket_id}/post", post(post_ticket))
        .route("/weighbridge/no-seri", get(generate_no_seri))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

fn error_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::Validation(_) => "VALIDATION",
        CoreError::UnbalancedEntry { .. } => "UNBALANCED_ENTRY",
        CoreError::UnmappedSystemKey { .. } => "UNMAPPED_SYSTEM_KEY",
        CoreError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
        CoreError::DuplicateCode(_) => "DUPLICATE_CODE",
        CoreError::DuplicateEntryNumber(_) => "DUPLICATE_ENTRY_NUMBER",
        CoreError::DuplicateTicketNumber(_) => "DUPLICATE_TICKET_NUMBER",
        CoreError::AlreadyPosted(_) => "ALREADY_POSTED",
        CoreError::HasChildren(_) => "HAS_CHILDREN",
        CoreError::HasDependents { .. } => "HAS_DEPENDENTS",
        CoreError::NotFound { .. } => "NOT_FOUND",
        CoreError::InvalidState(_) => "INVALID_STATE",
        CoreError::Forbidden(_) => "FORBIDDEN",
        CoreError::LockTimeout => "LOCK_TIMEOUT",
        CoreError::Storage(_) => "STORAGE",
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_)
        | CoreError::UnbalancedEntry { .. }
        | CoreError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::DuplicateCode(_)
        | CoreError::DuplicateEntryNumber(_)
        | CoreError::DuplicateTicketNumber(_)
        | CoreError::AlreadyPosted(_)
        | CoreError::HasChildren(_)
        | CoreError::HasDependents { .. }
        | CoreError::InvalidState(_) => StatusCode::CONFLICT,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::LockTimeout => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::UnmappedSystemKey { .. } | CoreError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn reject(err: CoreError) -> ApiRejection {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    let body = ApiError {
        code: error_code(&err).to_string(),
        message: err.to_string(),
        retryable: err.is_retryable(),
    };
    (status, Json(body))
}

fn unauthenticated(message: String) -> ApiRejection {
    let body = ApiError {
        code: "UNAUTHENTICATED".to_string(),
        message,
        retryable: false,
    };
    (StatusCode::UNAUTHORIZED, Json(body))
}

/// The acting user is authenticated upstream and forwarded in headers.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiRejection> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| unauthenticated(format!("{name} header is required")))
    };

    let user_id = Uuid::parse_str(header(USER_HEADER)?)
        .map_err(|err| unauthenticated(format!("invalid {USER_HEADER}: {err}")))?;
    let role: Role = header(ROLE_HEADER)?
        .parse()
        .map_err(|err: CoreError| unauthenticated(err.to_string()))?;
    Ok(Actor::new(user_id, role))
}

/// Publishing happens after commit; a failure is logged and the request
/// still succeeds.
async fn publish(state: &AppState, event: DomainEvent) {
    let Some(bus) = &state.redis else {
        return;
    };
    if let Err(err) = bus.publish_event(&event).await {
        error!(
            error = %err,
            channel = event.kind.channel(),
            aggregate_id = %event.aggregate_id,
            "failed to publish domain event"
        );
    }
}

async fn publish_journal(state: &AppState, kind: DomainEventKind, entry: &JournalEntry) {
    let payload = json!({
        "entry_number": entry.entry_number,
        "date": entry.date,
        "source_type": entry.source_type,
        "source_id": entry.source_id,
        "status": entry.status,
        "total": entry.total_debit(),
    });
    publish(state, DomainEvent::new(kind, entry.company_id, entry.id, payload)).await;
}

async fn publish_document(state: &AppState, kind: DomainEventKind, document: &StockDocument) {
    let payload = json!({
        "kind": document.kind,
        "number": document.number,
        "date": document.date,
        "warehouse_id": document.warehouse_id,
        "status": document.status,
        "journal_entry_id": document.journal_entry_id,
    });
    publish(
        state,
        DomainEvent::new(kind, document.company_id, document.id, payload),
    )
    .await;
}

async fn publish_ticket(state: &AppState, posting: &TicketPosting) {
    let ticket = &posting.ticket;
    let payload = json!({
        "no_seri": ticket.no_seri,
        "tanggal": ticket.tanggal,
        "berat_terima": ticket.berat_terima,
        "total": ticket.total,
        "total_pembayaran_supplier": ticket.total_pembayaran_supplier,
        "purchase_je_id": ticket.purchase_je_id,
        "unload_je_id": ticket.unload_je_id,
    });
    let event = DomainEvent::new(
        DomainEventKind::WeighbridgeTicketPosted,
        ticket.company_id,
        ticket.id,
        payload,
    );
    publish(state, event).await;
}

// accounts

async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<AccountListQuery>,
) -> ApiResult<Page<Account>> {
    let filter = AccountFilter {
        company_id: query.company_id,
        search: query.search,
        class: query.class,
        status: query.status,
        is_posting: query.is_posting,
        page: query.page,
        per_page: query.per_page,
    };
    state.finance.list_accounts(&filter).await.map(Json).map_err(reject)
}

async fn account_tree(
    State(state): State<AppState>,
    Query(query): Query<CompanyQuery>,
) -> ApiResult<Vec<AccountNode>> {
    state
        .finance
        .account_tree(query.company_id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    actor.ensure_accounting("manage accounts").map_err(reject)?;
    let account = state.finance.create_account(payload).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn update_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<Uuid>,
    Json(patch): Json<AccountPatch>,
) -> ApiResult<Account> {
    let actor = actor_from_headers(&headers)?;
    actor.ensure_accounting("manage accounts").map_err(reject)?;
    state
        .finance
        .update_account(account_id, patch)
        .await
        .map(Json)
        .map_err(reject)
}

async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    actor.ensure_accounting("manage accounts").map_err(reject)?;
    state.finance.delete_account(account_id).await.map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn account_balance(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<AccountBalance> {
    state
        .finance
        .account_balance(account_id, range.from, range.to)
        .await
        .map(Json)
        .map_err(reject)
}

async fn account_ledger(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<AccountLedger> {
    state
        .finance
        .account_ledger(account_id, range.from, range.to)
        .await
        .map(Json)
        .map_err(reject)
}

// system account map

async fn list_system_accounts(
    State(state): State<AppState>,
    Query(query): Query<CompanyQuery>,
) -> ApiResult<BTreeMap<SystemAccountKey, Uuid>> {
    state
        .finance
        .system_accounts(query.company_id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn get_system_account(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<CompanyQuery>,
) -> ApiResult<SystemAccountMapping> {
    let key: SystemAccountKey = key.parse().map_err(reject)?;
    let account_id = state
        .finance
        .system_account(query.company_id, key)
        .await
        .map_err(reject)?;
    Ok(Json(SystemAccountMapping {
        company_id: query.company_id,
        key,
        account_id,
    }))
}

async fn set_system_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CompanyQuery>,
    Json(assignments): Json<Vec<SystemAccountAssignment>>,
) -> ApiResult<Vec<SystemAccountMapping>> {
    let actor = actor_from_headers(&headers)?;
    actor.ensure_approver("map system accounts").map_err(reject)?;
    state
        .finance
        .set_system_accounts(query.company_id, &assignments)
        .await
        .map(Json)
        .map_err(reject)
}

async fn validate_system_accounts(
    State(state): State<AppState>,
    Query(query): Query<CompanyQuery>,
) -> Result<StatusCode, ApiRejection> {
    state
        .finance
        .validate_system_accounts(query.company_id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn install_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CompanyQuery>,
) -> ApiResult<TemplateInstall> {
    let actor = actor_from_headers(&headers)?;
    actor.ensure_approver("install the chart of accounts").map_err(reject)?;
    let summary = state
        .finance
        .install_template(query.company_id, &PksChartTemplate)
        .await
        .map_err(reject)?;
    info!(
        company_id = %query.company_id,
        accounts = summary.accounts_created,
        mappings = summary.mappings_set,
        "chart of accounts template installed"
    );
    Ok(Json(summary))
}

// journal

async fn post_manual_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewJournalEntry>,
) -> Result<(StatusCode, Json<JournalEntry>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let entry = state
        .finance
        .post_manual(&actor, payload)
        .await
        .map_err(reject)?;
    publish_journal(&state, DomainEventKind::JournalPosted, &entry).await;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn create_draft_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewJournalEntry>,
) -> Result<(StatusCode, Json<JournalEntry>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let entry = state
        .finance
        .create_draft(&actor, payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn post_draft_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<JournalEntry> {
    let actor = actor_from_headers(&headers)?;
    let entry = state
        .finance
        .post_draft(&actor, entry_id)
        .await
        .map_err(reject)?;
    publish_journal(&state, DomainEventKind::JournalPosted, &entry).await;
    Ok(Json(entry))
}

async fn void_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<JournalEntry> {
    let actor = actor_from_headers(&headers)?;
    let entry = state
        .finance
        .void_entry(&actor, entry_id)
        .await
        .map_err(reject)?;
    publish_journal(&state, DomainEventKind::JournalVoided, &entry).await;
    Ok(Json(entry))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<JournalEntry> {
    state.finance.entry(entry_id).await.map(Json).map_err(reject)
}

async fn generate_entry_number(
    State(state): State<AppState>,
    Query(query): Query<EntryNumberQuery>,
) -> ApiResult<EntryNumberResponse> {
    let entry_number = state
        .finance
        .generate_entry_number(query.company_id, query.source_type, query.date)
        .await
        .map_err(reject)?;
    Ok(Json(EntryNumberResponse { entry_number }))
}

async fn set_opening_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SetOpeningBalanceRequest>,
) -> ApiResult<OpeningBalance> {
    let actor = actor_from_headers(&headers)?;
    state
        .finance
        .set_opening_balance(
            &actor,
            payload.company_id,
            payload.account_id,
            payload.period_start,
            payload.amount,
        )
        .await
        .map(Json)
        .map_err(reject)
}

// reports

async fn all_account_balances(
    State(state): State<AppState>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<Vec<BalanceRow>> {
    state
        .finance
        .all_account_balances(query.company_id, query.as_of)
        .await
        .map(Json)
        .map_err(reject)
}

async fn trial_balance(
    State(state): State<AppState>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<TrialBalance> {
    state
        .finance
        .trial_balance(query.company_id, query.as_of)
        .await
        .map(Json)
        .map_err(reject)
}

async fn balance_sheet(
    State(state): State<AppState>,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<BalanceSheet> {
    state
        .finance
        .balance_sheet(query.company_id, query.as_of)
        .await
        .map(Json)
        .map_err(reject)
}

async fn income_statement(
    State(state): State<AppState>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<IncomeStatement> {
    let company_id = range
        .company_id
        .ok_or_else(|| reject(CoreError::validation("company_id is required")))?;
    state
        .finance
        .income_statement(company_id, range.from, range.to)
        .await
        .map(Json)
        .map_err(reject)
}

// stock ledger

async fn stock_balance(
    State(state): State<AppState>,
    Query(query): Query<StockBalanceQuery>,
) -> ApiResult<StockBalance> {
    state
        .warehouse
        .balance(query.item_id, query.warehouse_id, query.bin_id.as_deref())
        .await
        .map(Json)
        .map_err(reject)
}

async fn stock_movements(
    State(state): State<AppState>,
    Query(query): Query<StockMovementQuery>,
) -> ApiResult<Vec<StockLedgerEntry>> {
    let query = StockLedgerQuery {
        item_id: query.item_id,
        warehouse_id: query.warehouse_id,
        ref_table: query.ref_table,
        ref_id: query.ref_id,
    };
    state
        .warehouse
        .movements(&query)
        .await
        .map(Json)
        .map_err(reject)
}

async fn stock_valuation(
    State(state): State<AppState>,
    Query(query): Query<ValuationQuery>,
) -> ApiResult<ValuationResponse> {
    let value = state
        .warehouse
        .valuation(query.warehouse_id)
        .await
        .map_err(reject)?;
    Ok(Json(ValuationResponse {
        warehouse_id: query.warehouse_id,
        value,
    }))
}

// warehouse documents

async fn created_document(
    state: &AppState,
    result: Result<StockDocument, CoreError>,
) -> Result<(StatusCode, Json<StockDocument>), ApiRejection> {
    let document = result.map_err(reject)?;
    publish_document(state, DomainEventKind::StockDocumentCreated, &document).await;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn goods_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GoodsReceiptInput>,
) -> Result<(StatusCode, Json<StockDocument>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let result = state.warehouse.goods_receipt(&actor, payload).await;
    created_document(&state, result).await
}

async fn goods_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GoodsIssueInput>,
) -> Result<(StatusCode, Json<StockDocument>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let result = state.warehouse.goods_issue(&actor, payload).await;
    created_document(&state, result).await
}

async fn loan_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoanIssueInput>,
) -> Result<(StatusCode, Json<StockDocument>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let result = state.warehouse.loan_issue(&actor, payload).await;
    created_document(&state, result).await
}

async fn loan_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoanReturnInput>,
) -> Result<(StatusCode, Json<StockDocument>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let result = state.warehouse.loan_return(&actor, payload).await;
    created_document(&state, result).await
}

async fn stock_adjustment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StockCountInput>,
) -> Result<(StatusCode, Json<StockDocument>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let result = state.warehouse.stock_adjustment(&actor, payload).await;
    created_document(&state, result).await
}

async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> ApiResult<StockDocument> {
    state
        .warehouse
        .document(document_id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn cancel_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(document_id): Path<Uuid>,
) -> ApiResult<StockDocument> {
    let actor = actor_from_headers(&headers)?;
    let document = state
        .warehouse
        .cancel_document(&actor, document_id)
        .await
        .map_err(reject)?;
    publish_document(&state, DomainEventKind::StockDocumentCancelled, &document).await;
    Ok(Json(document))
}

// item requests

async fn create_item_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewItemRequest>,
) -> Result<(StatusCode, Json<ItemRequest>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let request = state
        .warehouse
        .create_item_request(&actor, payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn get_item_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<ItemRequest> {
    state
        .warehouse
        .item_request(request_id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn submit_item_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
) -> ApiResult<ItemRequest> {
    let actor = actor_from_headers(&headers)?;
    state
        .warehouse
        .submit_item_request(&actor, request_id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn approve_item_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(decision): Json<DecisionRequest>,
) -> ApiResult<ItemRequest> {
    let actor = actor_from_headers(&headers)?;
    state
        .warehouse
        .approve_item_request(&actor, request_id, decision.note)
        .await
        .map(Json)
        .map_err(reject)
}

async fn reject_item_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(decision): Json<DecisionRequest>,
) -> ApiResult<ItemRequest> {
    let actor = actor_from_headers(&headers)?;
    state
        .warehouse
        .reject_item_request(&actor, request_id, decision.note)
        .await
        .map(Json)
        .map_err(reject)
}

async fn fulfil_item_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<FulfilItemRequest>,
) -> ApiResult<FulfilResponse> {
    let actor = actor_from_headers(&headers)?;
    let (request, goods_issue) = state
        .warehouse
        .fulfil_item_request(&actor, request_id, payload)
        .await
        .map_err(reject)?;
    publish_document(&state, DomainEventKind::StockDocumentCreated, &goods_issue).await;
    Ok(Json(FulfilResponse {
        request,
        goods_issue,
    }))
}

// weighbridge

async fn bulk_create_tickets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CompanyQuery>,
    Json(rows): Json<Vec<NewTicket>>,
) -> Result<(StatusCode, Json<Vec<WeighbridgeTicket>>), ApiRejection> {
    let actor = actor_from_headers(&headers)?;
    let created = state
        .weighbridge
        .bulk_create_pb_harian(&actor, query.company_id, rows)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketListQuery>,
) -> ApiResult<Vec<WeighbridgeTicket>> {
    let filter = TicketFilter {
        company_id: query.company_id,
        from: query.from,
        to: query.to,
        status: query.status,
        supplier_id: query.supplier_id,
        limit: query.limit,
    };
    state
        .weighbridge
        .get_list(&filter)
        .await
        .map(Json)
        .map_err(reject)
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> ApiResult<WeighbridgeTicket> {
    state
        .weighbridge
        .get_by_id(ticket_id)
        .await
        .map(Json)
        .map_err(reject)
}

async fn update_pricing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ticket_id): Path<Uuid>,
    Json(pricing): Json<TicketPricing>,
) -> ApiResult<WeighbridgeTicket> {
    let actor = actor_from_headers(&headers)?;
    state
        .weighbridge
        .update_pricing(&actor, ticket_id, pricing)
        .await
        .map(Json)
        .map_err(reject)
}

async fn approve_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ticket_id): Path<Uuid>,
    Json(approval): Json<ApproveTicket>,
) -> ApiResult<ApprovalOutcome> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .weighbridge
        .approve_ticket(&actor, ticket_id, approval)
        .await
        .map_err(reject)?;
    if let Some(posting) = &outcome.posting {
        publish_ticket(&state, posting).await;
    }
    Ok(Json(outcome))
}

async fn post_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(ticket_id): Path<Uuid>,
    Json(payload): Json<PostTicketRequest>,
) -> ApiResult<TicketPosting> {
    let actor = actor_from_headers(&headers)?;
    let posting = state
        .weighbridge
        .post_ticket(&actor, ticket_id, payload.terms)
        .await
        .map_err(reject)?;
    publish_ticket(&state, &posting).await;
    Ok(Json(posting))
}

async fn generate_no_seri(
    State(state): State<AppState>,
    Query(query): Query<TicketNumberQuery>,
) -> ApiResult<TicketNumberResponse> {
    let no_seri = state
        .weighbridge
        .generate_no_seri(query.company_id, query.tanggal)
        .await
        .map_err(reject)?;
    Ok(Json(TicketNumberResponse { no_seri }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn domain_errors_map_to_http_statuses() {
        assert_eq!(
            status_for(&CoreError::validation("bad weight")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&CoreError::AlreadyPosted("ticket".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&CoreError::LockTimeout),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&CoreError::unmapped(Uuid::nil(), SystemAccountKey::CashBank)),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let (status, Json(body)) = reject(CoreError::LockTimeout);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.code, "LOCK_TIMEOUT");
        assert!(body.retryable);
    }

    #[test]
    fn actor_comes_from_forwarded_headers() {
        let user = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(&user.to_string()).unwrap());
        headers.insert(ROLE_HEADER, HeaderValue::from_static("manager"));

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor, Actor::new(user, Role::Manager));

        headers.remove(ROLE_HEADER);
        let (status, _) = actor_from_headers(&headers).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn request_bodies_cannot_name_their_creator() {
        let forged = Uuid::new_v4();
        let entry: NewJournalEntry = serde_json::from_value(json!({
            "company_id": Uuid::new_v4(),
            "date": "2024-06-01",
            "source_id": null,
            "memo": null,
            "lines": [],
            "created_by_id": forged,
        }))
        .unwrap();
        assert_eq!(entry.created_by_id, Uuid::nil());

        let request: NewItemRequest = serde_json::from_value(json!({
            "company_id": Uuid::new_v4(),
            "date": "2024-06-01",
            "warehouse_id": Uuid::new_v4(),
            "department": "MAINTENANCE",
            "lines": [],
            "requested_by_id": forged,
        }))
        .unwrap();
        assert_eq!(request.requested_by_id, Uuid::nil());
    }
}
