//! Concrete implementations of the storage ports.

pub mod memory;
pub mod postgres_donation_repository;
pub mod postgres_ledger_store;

pub use memory::InMemoryStore;
pub use postgres_donation_repository::PostgresDonationRepository;
pub use postgres_ledger_store::PostgresLedgerStore;
