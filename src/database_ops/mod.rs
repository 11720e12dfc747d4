pub mod backfill;
pub mod db;
pub mod nhl;
pub mod records;
pub mod storage;
pub mod sync_engine;
pub mod worker_manager;
