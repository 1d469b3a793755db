pub mod activity;
pub mod db;
pub mod film;
pub mod query;
pub mod recommendation;
