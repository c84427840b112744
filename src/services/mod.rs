pub mod cache;
pub mod catalog;
pub mod embedding;
pub mod feedback;
pub mod maintenance;
pub mod preference;
pub mod recommendation;
pub mod store;
pub mod vector_db;
