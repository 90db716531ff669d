//! Domain model, error type and storage seam of the PKS posting core.

pub mod error;
pub mod events;
pub mod models;
pub mod numbering;
pub mod standards;
pub mod stock;
pub mod storage;
pub mod system_accounts;
pub mod valuation;
pub mod weighbridge;

pub use error::{CoreError, CoreResult};
pub use events::{DomainEvent, DomainEventKind};
pub use models::{
    Account, AccountClass, AccountStatus, Actor, JournalEntry, JournalLine, JournalStatus,
    NormalSide, OpeningBalance, PostedLine, Role, SourceType,
};
pub use numbering::NumberSeries;
pub use standards::{ChartTemplate, PksChartTemplate, TemplateAccount};
pub use stock::{
    DocumentKind, DocumentStatus, ItemRequest, ItemRequestLine, ItemRequestStatus, LedgerType,
    NO_BIN, ReceiptSource, StockBalance, StockDocument, StockDocumentLine, StockLedgerEntry,
};
pub use storage::{
    AccountFilter, LedgerStore, LedgerTx, LineQuery, Page, StockLedgerQuery, TicketFilter,
};
pub use system_accounts::{ItemCategory, SystemAccountKey, SystemAccountMapping};
pub use valuation::{extend, new_average_cost, round_cost, round_money};
pub use weighbridge::{
    PricingFigures, SupplierTerms, TicketStatus, WeighbridgeTicket, WeightFigures,
    compute_pricing, compute_weights,
};
