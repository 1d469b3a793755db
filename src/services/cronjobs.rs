use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::config::ScheduleConfig;
use crate::services::engine::RecommendationEngine;

/// Schedules the periodic full recompute: top films first, then
/// recommendations for every subject. The returned scheduler must be kept
/// alive for the job to keep firing.
pub async fn schedule_jobs(
    engine: Arc<RecommendationEngine>,
    schedule: &ScheduleConfig,
) -> Result<JobScheduler, JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    let job = Job::new_async_tz(schedule.cron.as_str(), schedule.timezone, move |_uuid, _l| {
        let engine = engine.clone();
        Box::pin(async move {
            log::info!("Executing scheduled recompute");

            let top = engine.compute_top_items().await;
            if !top.is_ok() {
                // stale top films are still better than none
                log::error!("Top films recompute failed: {}", top.message);
            }

            let recommendations = engine.compute_recommendations_for_all().await;
            if recommendations.is_ok() {
                log::info!("Scheduled recompute done: {}", recommendations.message);
            } else {
                log::error!("Recommendations recompute failed: {}", recommendations.message);
            }
        })
    })?;

    sched.add(job).await?;
    sched.start().await?;
    log::info!(
        "Recompute scheduled with '{}' ({})",
        schedule.cron,
        schedule.timezone
    );

    Ok(sched)
}
