pub mod schema;
pub mod submit;
