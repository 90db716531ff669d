//! Weighbridge ticket processor for daily TBS purchases (PB Harian).
//!
//! `DRAFT -> APPROVED -> POSTED`, one way. Weights are derived at intake,
//! totals whenever pricing changes, and posting moves stock and books the
//! purchase in a single transaction.

pub mod posting;
pub mod tickets;

use std::sync::Arc;

use chrono::NaiveDate;
use pks_core::{
    Actor, CoreError, CoreResult, LedgerStore, LedgerTx, Role, SupplierTerms, TicketFilter,
    WeighbridgeTicket,
};
use uuid::Uuid;

pub use posting::{ApprovalOutcome, ApproveTicket, TICKET_REF_TABLE, TicketPosting};
pub use tickets::{NewTicket, TicketPricing};

/// Operators key in weighings and prices; managers may stand in.
pub fn ensure_operator(actor: &Actor, action: &str) -> CoreResult<()> {
    match actor.role {
        Role::Admin | Role::Manager | Role::WeighbridgeOperator => Ok(()),
        role => Err(CoreError::Forbidden(format!("role {role:?} may not {action}"))),
    }
}

pub struct WeighbridgeService<S> {
    store: Arc<S>,
}

impl<S> Clone for WeighbridgeService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> WeighbridgeService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn bulk_create_pb_harian(
        &self,
        actor: &Actor,
        company_id: Uuid,
        rows: Vec<NewTicket>,
    ) -> CoreResult<Vec<WeighbridgeTicket>> {
        ensure_operator(actor, "record weighings")?;

        let mut tx = self.store.begin().await?;
        let created =
            tickets::bulk_create_pb_harian(&mut tx, company_id, actor.user_id, rows).await?;
        tx.commit().await?;
        Ok(created)
    }

    pub async fn update_pricing(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        pricing: TicketPricing,
    ) -> CoreResult<WeighbridgeTicket> {
        ensure_operator(actor, "price tickets")?;

        let mut tx = self.store.begin().await?;
        let ticket = tickets::update_pricing(&mut tx, ticket_id, pricing).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    pub async fn approve_ticket(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        approval: ApproveTicket,
    ) -> CoreResult<ApprovalOutcome> {
        let mut tx = self.store.begin().await?;
        let outcome = posting::approve_ticket(&mut tx, ticket_id, actor, approval).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn post_ticket(
        &self,
        actor: &Actor,
        ticket_id: Uuid,
        terms: SupplierTerms,
    ) -> CoreResult<TicketPosting> {
        actor.ensure_accounting("post weighbridge tickets")?;

        let mut tx = self.store.begin().await?;
        let posted = posting::post_ticket(&mut tx, ticket_id, actor.user_id, terms).await?;
        tx.commit().await?;
        Ok(posted)
    }

    /// Reserves a serial outside of ticket creation; the value is consumed.
    pub async fn generate_no_seri(
        &self,
        company_id: Uuid,
        tanggal: NaiveDate,
    ) -> CoreResult<String> {
        let mut tx = self.store.begin().await?;
        let no_seri = tickets::generate_no_seri(&mut tx, company_id, tanggal).await?;
        tx.commit().await?;
        Ok(no_seri)
    }

    pub async fn get_by_id(&self, ticket_id: Uuid) -> CoreResult<WeighbridgeTicket> {
        let mut tx = self.store.begin().await?;
        tickets::get_by_id(&mut tx, ticket_id).await
    }

    pub async fn get_list(&self, filter: &TicketFilter) -> CoreResult<Vec<WeighbridgeTicket>> {
        let mut tx = self.store.begin().await?;
        tickets::get_list(&mut tx, filter).await
    }
}
