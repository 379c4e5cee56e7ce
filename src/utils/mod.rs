pub mod audit;
pub mod dashboard_cache;
pub mod db_utils;
pub mod pagination;
pub mod soft_delete;
