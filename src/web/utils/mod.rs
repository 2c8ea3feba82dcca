pub mod errors;
pub mod http_date;
pub mod mime;
pub mod range;
pub mod streaming;
