// src/jobs.rs
use crate::workflow::{Event, EventBus};
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Publishes [`Event::SendDailyNews`] on a cron schedule
/// (six fields, seconds first; UTC).
pub struct DailyNewsJob {
    schedule: String,
    events: EventBus,
}

impl DailyNewsJob {
    pub fn new(schedule: &str, events: EventBus) -> Self {
        DailyNewsJob {
            schedule: schedule.to_string(),
            events,
        }
    }

    pub async fn register(self, scheduler: &JobScheduler) -> Result<(), JobSchedulerError> {
        let events = self.events.clone();
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _lock| {
            let events = events.clone();
            Box::pin(async move {
                if let Err(e) = events.publish(Event::SendDailyNews) {
                    error!("Daily news job could not queue its run: {}", e);
                } else {
                    info!("Daily news job queued");
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Daily news job registered ({})", self.schedule);
        Ok(())
    }
}

/// Starts a scheduler carrying the daily news job.
pub async fn start(schedule: &str, events: EventBus) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    DailyNewsJob::new(schedule, events)
        .register(&scheduler)
        .await?;
    scheduler.start().await?;
    Ok(scheduler)
}
