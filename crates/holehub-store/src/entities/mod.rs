//! SeaORM entities

pub mod kv_entry;

pub use kv_entry::Entity as KvEntry;
