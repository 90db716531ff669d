use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventKind {
    JournalPosted,
    JournalVoided,
    StockDocumentCreated,
    StockDocumentCancelled,
    WeighbridgeTicketPosted,
}

impl DomainEventKind {
    /// Bus channel the event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::JournalPosted | Self::JournalVoided => "journal.posted",
            Self::StockDocumentCreated | Self::StockDocumentCancelled => {
                "warehouse.document.created"
            }
            Self::WeighbridgeTicketPosted => "weighbridge.posted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub company_id: Uuid,
    pub aggregate_id: Uuid,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(
        kind: DomainEventKind,
        company_id: Uuid,
        aggregate_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            aggregate_id,
            kind,
            occurred_at: Utc::now(),
            payload,
        }
    }
}
