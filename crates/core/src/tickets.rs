//! Unused license tickets of the marketplace account.
//!
//! Ticket state is shared with anything else using the same account, so
//! nothing here caches: every call re-reads the ledger.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::marketplace::{Marketplace, MarketplaceError, Session, Ticket};

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("no unused ticket at offset {offset} ({available} available)")]
    OffsetOutOfRange { offset: usize, available: usize },

    #[error("marketplace error: {0}")]
    Marketplace(#[from] MarketplaceError),
}

/// Read access to the account's license tickets.
#[derive(Clone)]
pub struct TicketLedger {
    marketplace: Arc<dyn Marketplace>,
}

impl TicketLedger {
    pub fn new(marketplace: Arc<dyn Marketplace>) -> Self {
        Self { marketplace }
    }

    /// Unused tickets in the order the marketplace returns them.
    pub async fn list_unused_tickets(&self, session: &Session) -> Result<Vec<Ticket>, TicketError> {
        let tickets = self.marketplace.licenses(session).await?;
        Ok(tickets.into_iter().filter(Ticket::is_unused).collect())
    }

    pub async fn count_unused(&self, session: &Session) -> Result<usize, TicketError> {
        Ok(self.list_unused_tickets(session).await?.len())
    }

    /// License key of the unused ticket at `offset` in a fresh snapshot.
    ///
    /// Another consumer may still activate the key between this read and the
    /// install that uses it.
    pub async fn ticket_key_at(&self, session: &Session, offset: usize) -> Result<String, TicketError> {
        let unused = self.list_unused_tickets(session).await?;
        let available = unused.len();
        let ticket = unused
            .into_iter()
            .nth(offset)
            .ok_or(TicketError::OffsetOutOfRange { offset, available })?;
        debug!(offset, available, "handing out ticket");
        Ok(ticket.license_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockMarketplace;

    async fn ledger_with(tickets: usize) -> (TicketLedger, Arc<MockMarketplace>, Session) {
        let marketplace = Arc::new(MockMarketplace::new());
        marketplace.add_user("dev@example.com", "pw", "dev").await;
        marketplace.add_tickets(tickets).await;
        let session = marketplace.authenticate("dev@example.com", "pw").await.unwrap();
        (TicketLedger::new(marketplace.clone()), marketplace, session)
    }

    #[tokio::test]
    async fn test_used_tickets_are_filtered() {
        let (ledger, marketplace, session) = ledger_with(3).await;
        marketplace.consume_externally(1).await;

        let unused = ledger.list_unused_tickets(&session).await.unwrap();
        assert_eq!(unused.len(), 2);
        assert!(unused.iter().all(Ticket::is_unused));
        assert_eq!(ledger.count_unused(&session).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ticket_key_at_offsets() {
        let (ledger, _marketplace, session) = ledger_with(3).await;
        let first = ledger.ticket_key_at(&session, 0).await.unwrap();
        let third = ledger.ticket_key_at(&session, 2).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_ticket_key_at_out_of_range() {
        let (ledger, _marketplace, session) = ledger_with(2).await;
        let err = ledger.ticket_key_at(&session, 2).await.unwrap_err();
        assert!(matches!(
            err,
            TicketError::OffsetOutOfRange {
                offset: 2,
                available: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_ticket_key_at_sees_external_consumption() {
        let (ledger, marketplace, session) = ledger_with(2).await;
        assert!(ledger.ticket_key_at(&session, 1).await.is_ok());

        marketplace.consume_externally(1).await;
        assert!(matches!(
            ledger.ticket_key_at(&session, 1).await,
            Err(TicketError::OffsetOutOfRange { available: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_marketplace_errors_propagate() {
        let (ledger, _marketplace, _session) = ledger_with(1).await;
        let stranger = Session {
            token: "forged".to_string(),
            user_login: "mallory".to_string(),
        };
        assert!(matches!(
            ledger.count_unused(&stranger).await,
            Err(TicketError::Marketplace(MarketplaceError::Remote { status: 401, .. }))
        ));
    }
}
