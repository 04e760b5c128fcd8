//! Business routes.
//!
//! Each route module exposes a `route()` returning its descriptor; [`routes`]
//! collects them into the table the binder mounts.

pub mod tables;

use crate::pipeline::RouteTable;

pub fn routes() -> RouteTable {
    RouteTable::new().route(tables::route())
}
