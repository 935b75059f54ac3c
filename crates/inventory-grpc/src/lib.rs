//! The synchronous RPC boundary between the Order Coordinator and the
//! Inventory Custodian (§6): a tonic server wrapping
//! `inventory_service::InventoryCustodianService`, and a tonic client
//! implementing `order_service::InventoryClient` against it.

mod client;
mod server;

pub use client::GrpcInventoryClient;
pub use server::InventoryGrpcServer;

pub mod proto {
    tonic::include_proto!("inventory");
}
