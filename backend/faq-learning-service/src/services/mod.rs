pub mod ai;
pub mod batch_processor;
pub mod confidence;
pub mod config_service;
pub mod faq_catalog;
pub mod learning;
pub mod normalizer;
pub mod pattern_recognition;
pub mod review;

pub use ai::{FaqAiProvider, FaqAiService};
pub use batch_processor::BatchProcessor;
pub use config_service::LearningConfigService;
pub use faq_catalog::FaqCatalogService;
pub use learning::FaqLearningService;
pub use review::ReviewQueueService;
