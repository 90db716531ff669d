//! Runtime plumbing shared by the PKS binaries: configuration, the Postgres
//! store, the Redis event bus and the HTTP contracts.

pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    AccountListQuery, ApiError, AsOfQuery, CompanyQuery, DateRangeQuery, DecisionRequest,
    EntryNumberQuery, EntryNumberResponse, PostTicketRequest, SetOpeningBalanceRequest,
    StockBalanceQuery, StockMovementQuery, TicketListQuery, TicketNumberQuery,
    TicketNumberResponse, ValuationQuery, ValuationResponse,
};
pub use db::{apply_schema, connect_database};
pub use pg_store::{PgLedgerStore, PgLedgerTx};
pub use redis_bus::RedisBus;
