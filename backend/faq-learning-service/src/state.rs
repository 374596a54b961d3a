use crate::extractors::DataExtractor;
use crate::repository::Repositories;
use crate::services::{
    BatchProcessor, FaqAiProvider, FaqAiService, FaqCatalogService, FaqLearningService,
    LearningConfigService, ReviewQueueService,
};
use std::sync::Arc;

/// Services shared by every worker
#[derive(Clone)]
pub struct AppState {
    pub learning: Arc<FaqLearningService>,
    pub review: Arc<ReviewQueueService>,
    pub catalog: Arc<FaqCatalogService>,
    pub config: Arc<LearningConfigService>,
    pub ai: Arc<FaqAiService>,
}

impl AppState {
    pub fn new(
        repos: Repositories,
        providers: Vec<Arc<dyn FaqAiProvider>>,
        default_provider: &str,
        chat: Arc<dyn DataExtractor>,
        ticket: Arc<dyn DataExtractor>,
        lease_ttl_secs: i64,
    ) -> Self {
        let config = Arc::new(LearningConfigService::new(repos.config.clone()));
        let ai = Arc::new(FaqAiService::new(
            providers,
            default_provider,
            repos.config.clone(),
        ));
        let review = Arc::new(ReviewQueueService::new(repos.faqs.clone()));
        let catalog = Arc::new(FaqCatalogService::new(repos.faqs.clone()));
        let learning = Arc::new(FaqLearningService::new(
            repos,
            config.clone(),
            ai.clone(),
            BatchProcessor::new(chat, ticket),
            lease_ttl_secs,
        ));

        Self {
            learning,
            review,
            catalog,
            config,
            ai,
        }
    }
}
