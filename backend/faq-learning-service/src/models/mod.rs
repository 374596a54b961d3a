pub mod extracted;
pub mod faq_entry;
pub mod learning_config;
pub mod pattern;

pub use extracted::{
    ConversationMessage, DataSource, DateRange, ExtractedData, ExtractionCriteria, NormalizedItem,
    SenderType, SourceMetadata,
};
pub use faq_entry::{FaqEdits, FaqEntrySource, FaqEntryStatus, LearnedFaqEntry};
pub use learning_config::{
    ConfigDefinition, ConfigSection, ConfigValueType, FaqLearningConfig, LearningSettings,
};
pub use pattern::{LearningPattern, PatternMatch, PatternSource, QuestionAnswerPair};
