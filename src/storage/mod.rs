pub mod uuid_cache;
