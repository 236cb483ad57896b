pub mod link;
pub mod models;
pub mod readings;
pub mod registry;
pub mod scan;
pub mod settings;
