//! Framework-agnostic settlement entities.

pub mod donation;
pub mod party;
pub mod payment;
pub mod split;
pub mod wallet;

pub use donation::{CompletionRecord, Donation, DonationKind, DonationStatus, TransitionOutcome};
pub use party::{Beneficiary, Donor, Organization};
pub use payment::{PaymentConfirmation, PaymentStatus};
pub use split::{split, Split, SplitError};
pub use wallet::{Direction, NewLedgerEntry, ReferenceKind, Wallet, WalletAudit, WalletTransaction};
