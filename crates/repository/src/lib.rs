//! # Data Repository Layer
//!
//! Repository traits and PostgreSQL implementations for the reservation
//! protocol's five durable aggregates: orders, reservations, products, the
//! stock audit log, and the per-database outbox.
//!
//! Repositories are stateless: every method takes the `&Client` or
//! `&Transaction<'_>` to run against, obtained by the caller from a pool.
//! Mutating operations that participate in the transition function always
//! go through `*_tx` variants so callers can hold a row lock across a
//! read-modify-write.

mod audit;
mod error;
mod orders;
mod outbox;
mod products;
mod reservations;

pub use audit::{PgStockAuditRepository, StockAuditRepository};
pub use error::RepositoryError;
pub use orders::{OrdersRepository, PgOrdersRepository};
pub use outbox::{OutboxRepository, PgOutboxRepository};
pub use products::{PgProductsRepository, ProductsRepository};
pub use reservations::{PgReservationsRepository, ReservationsRepository};
