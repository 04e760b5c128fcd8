//! `GET /`: greet the caller and list the catalog tables.

use async_trait::async_trait;
use axum::http::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::RequestContext;
use crate::db::PooledConnection;
use crate::pipeline::{HandlerError, InputSource, Reply, RouteDescriptor, TypedHandler};
use crate::schema::{ObjectSchema, Schema};

pub const TABLES_QUERY: &str = "SELECT * FROM pg_catalog.pg_tables";

#[derive(Debug, Deserialize)]
pub struct TablesQuery {
    pub name: String,
}

pub struct ListTables;

#[async_trait]
impl TypedHandler for ListTables {
    type Input = TablesQuery;

    async fn handle(
        &self,
        ctx: &RequestContext,
        input: TablesQuery,
        db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError> {
        let db = db.ok_or_else(|| HandlerError::internal("route declared without a connection"))?;
        let rows = db.query(TABLES_QUERY, &[]).await?;

        tracing::debug!(
            connection = ?ctx.connection_id(),
            rows = rows.len(),
            "Listed tables"
        );

        Ok(Reply::ok(json!({
            "message": format!("Hello {}", input.name),
            "rows": rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
        })))
    }
}

/// One `pg_catalog.pg_tables` row. Every column may come back NULL.
pub fn table_row() -> Schema {
    ObjectSchema::new()
        .field("schemaname", Schema::string().nullable())
        .field("tablename", Schema::string().nullable())
        .field("tableowner", Schema::string().nullable())
        .field("tablespace", Schema::string().nullable())
        .field("hasindexes", Schema::boolean().nullable())
        .field("hasrules", Schema::boolean().nullable())
        .field("hastriggers", Schema::boolean().nullable())
        .field("rowsecurity", Schema::boolean().nullable())
        .into()
}

pub fn route() -> RouteDescriptor {

    RouteDescriptor::new(Method::GET, "/", ListTables)
        .summary("Greet the caller and list catalog tables")
        .input(
            InputSource::Query,
            ObjectSchema::new().field("name", Schema::string()).into(),
        )
        .response(
            200,
            ObjectSchema::new()
                .field("message", Schema::string())
                .field("rows", Schema::array(table_row()))
                .into(),
        )
        .with_connection()
}
