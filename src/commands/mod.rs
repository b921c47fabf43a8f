pub mod db;
pub mod feedback;
pub mod settings;
pub mod store;
pub mod validate;
