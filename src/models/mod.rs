pub mod api;
pub mod event;
pub mod image;
pub mod job;
pub mod quote;
