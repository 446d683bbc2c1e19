//! Background job scheduling

pub mod issues_purge;

use std::path::PathBuf;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::db::Database;

/// Initialize and start the job scheduler
pub async fn start_scheduler(db: Database, default_issues_root: PathBuf) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Issues folder purge - run every hour
    let purge_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db.clone();
        let root = default_issues_root.clone();
        Box::pin(async move {
            info!("Running issues folder purge");
            if let Err(e) = issues_purge::run(db, root).await {
                tracing::error!("Issues purge error: {}", e);
            }
        })
    })?;
    scheduler.add(purge_job).await?;

    scheduler.start().await?;

    info!("Job scheduler started");
    Ok(scheduler)
}
