pub mod schema;

pub use schema::BulkheadsFile;
