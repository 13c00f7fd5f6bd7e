pub mod models;
pub mod registrar;
pub mod repository;
