pub mod broadcaster;
pub mod browser;
pub mod export;
pub mod extractor;
pub mod images;
pub mod navigation;
pub mod orchestrator;
pub mod registry;
pub mod selector;
pub mod snapshot;
pub mod storage;
