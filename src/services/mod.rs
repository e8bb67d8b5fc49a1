pub mod notifier;
pub mod reconciliation;
pub mod settlement;
pub mod wallet;

pub use notifier::{
    run_notification_worker, LogDispatcher, Notification, NotificationDispatcher, NotificationError,
    NotificationQueue, WebhookDispatcher,
};
pub use reconciliation::{run_reconciler, AuditReport, ReconciliationReport, ReconciliationService};
pub use settlement::{LedgerStatus, NewDonation, SettlementError, SettlementReceipt, SettlementService};
pub use wallet::{LedgerError, LedgerOutcome, WalletService};
