pub mod aggregator;
pub mod content;
pub mod cronjobs;
pub mod engine;
pub mod matrix;
pub mod memory;
pub mod mssql;
pub mod normalizer;
pub mod similarity;
pub mod top_films;
