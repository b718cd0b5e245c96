mod schema;
mod store;

pub use schema::init_tables;
pub use store::SqliteLedger;
