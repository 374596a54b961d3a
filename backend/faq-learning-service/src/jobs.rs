// ============================================
// Scheduled learning
// ============================================
//
// Runs the learning pipeline every `processingInterval` seconds. The tunable
// is re-read before each wait, so a config change applies from the next run.
// A run that is refused (already running elsewhere, daily limit) just waits
// for the next one.

use crate::services::FaqLearningService;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info};

pub async fn start_learning_scheduler(learning: Arc<FaqLearningService>) {
    info!("Starting scheduled FAQ learning job");

    loop {
        let wait = learning.scheduling_interval().await;
        debug!(wait_secs = wait.as_secs(), "Next scheduled learning run pending");
        sleep(wait).await;

        if let Some(result) = learning.scheduled_learning().await {
            info!(
                processed = result.processed_items,
                new_faqs = result.new_faqs,
                status = result.status.as_str(),
                "Scheduled learning run finished"
            );
        }
    }
}
