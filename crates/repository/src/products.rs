use async_trait::async_trait;
use model::Product;
use tokio_postgres::{Client, Row, Transaction};

use crate::RepositoryError;

/// Repository interface for the Inventory Custodian's product catalog.
///
/// `get_by_id_for_update_tx` takes the row lock that makes
/// check-stock-then-decrement atomic under concurrent reservations.
#[async_trait]
pub trait ProductsRepository: Send + Sync {
    async fn get_by_id(&self, db: &Client, product_id: &str) -> Result<Product, RepositoryError>;

    async fn get_by_id_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: &str,
    ) -> Result<Product, RepositoryError>;

    async fn update_stock_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: &str,
        new_stock: i32,
    ) -> Result<(), RepositoryError>;

    async fn list(&self, db: &Client) -> Result<Vec<Product>, RepositoryError>;
}

/// PostgreSQL implementation of [`ProductsRepository`].
#[derive(Default)]
pub struct PgProductsRepository;

impl PgProductsRepository {
    pub fn new() -> Self {
        Self
    }
}

const COLUMNS: &str = "product_id, name, stock, low_stock_threshold";

fn product_from_row(row: &Row) -> Product {
    Product {
        product_id: row.get("product_id"),
        name: row.get("name"),
        stock: row.get("stock"),
        low_stock_threshold: row.get("low_stock_threshold"),
    }
}

#[async_trait]
impl ProductsRepository for PgProductsRepository {
    async fn get_by_id(&self, db: &Client, product_id: &str) -> Result<Product, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM products WHERE product_id = $1");
        let row = db.query_opt(&query, &[&product_id]).await?;
        row.as_ref()
            .map(product_from_row)
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_by_id_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: &str,
    ) -> Result<Product, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM products WHERE product_id = $1 FOR UPDATE");
        let row = tx.query_opt(&query, &[&product_id]).await?;
        row.as_ref()
            .map(product_from_row)
            .ok_or(RepositoryError::NotFound)
    }

    async fn update_stock_tx(
        &self,
        tx: &Transaction<'_>,
        product_id: &str,
        new_stock: i32,
    ) -> Result<(), RepositoryError> {
        let affected = tx
            .execute(
                "UPDATE products SET stock = $2 WHERE product_id = $1",
                &[&product_id, &new_stock],
            )
            .await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, db: &Client) -> Result<Vec<Product>, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM products ORDER BY product_id");
        let rows = db.query(&query, &[]).await?;
        Ok(rows.iter().map(product_from_row).collect())
    }
}
