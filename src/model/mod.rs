/*!
Data structures that model the Iceberg table format on disk.
*/

pub mod decimal;
pub mod manifest;
pub mod manifest_list;
pub mod metadata;
pub mod partition;
pub mod schema;
pub mod snapshot;
pub mod sort;
pub mod types;
pub mod values;
pub mod view_metadata;
