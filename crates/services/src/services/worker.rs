use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Utc;
use db::{
    DbService,
    entities::outbox_email::Model as OutboxRow,
    models::{
        delivery_stats::DeliveryStats,
        ids,
        outbox_email::{OutboxEmail, RenderedContent},
        project::Project,
        project_user::ProjectUser,
    },
    types::{Recipient, SkippedReason},
};
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::watch;
use uuid::Uuid;

use crate::services::{
    capacity,
    categories,
    mailer::{EmailMessage, Mailer, SendError},
    recipient::{self, Resolution},
    renderer::{RenderRequest, TemplateRenderer},
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_interval: Duration,
    /// Base send allowance per hour before history adjustments.
    pub base_hourly_rate: f64,
    pub max_render_batch: u64,
    pub max_send_attempts: i32,
    pub send_retry_backoff_base_ms: u64,
    /// Claims older than this with no finish are considered abandoned.
    pub stuck_claim_age: chrono::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            base_hourly_rate: 10_000.0,
            max_render_batch: 50,
            max_send_attempts: 5,
            send_retry_backoff_base_ms: 20_000,
            stuck_claim_age: chrono::Duration::minutes(20),
        }
    }
}

/// Background process that drives outbox rows through rendering, queuing and
/// sending. All state lives in the database; the worker itself only holds a
/// tick clock, so several instances can run against the same database.
pub struct QueueWorker {
    db: DbService,
    mailer: Arc<dyn Mailer>,
    renderer: Arc<dyn TemplateRenderer>,
    config: WorkerConfig,
    last_tick: Mutex<Option<Instant>>,
}

pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

impl QueueWorker {
    pub fn new(
        db: DbService,
        mailer: Arc<dyn Mailer>,
        renderer: Arc<dyn TemplateRenderer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            mailer,
            renderer,
            config,
            last_tick: Mutex::new(None),
        }
    }

    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let worker = self;
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(worker.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = worker.run_tick().await {
                            tracing::error!("queue worker tick failed: {err}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("queue worker shutting down");
                        break;
                    }
                }
            }
        });
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// One full pass over the queue. Public so tests can drive the worker
    /// deterministically without the timer loop.
    pub async fn run_tick(&self) -> Result<(), db::DatabaseError> {
        let delta_seconds = self.measure_delta();
        let worker_id = Uuid::new_v4();

        let pending_render = db::retry_on_sqlite_busy(|| {
            OutboxEmail::claim_for_rendering(&self.db.conn, worker_id, self.config.max_render_batch)
        })
        .await?;
        let rendered_count = pending_render.len();
        for row in &pending_render {
            if let Err(err) = self.render_row(row, worker_id).await {
                tracing::error!(email = %row.uuid, "rendering pass failed: {err}");
            }
        }

        let stuck_cutoff = Utc::now() - self.config.stuck_claim_age;
        let reset = OutboxEmail::reset_stuck_rendering(&self.db.conn, stuck_cutoff).await?;
        if reset > 0 {
            tracing::warn!("{reset} emails stuck in rendering, reset for retry");
        }

        let queued = OutboxEmail::queue_ready(&self.db.conn, Utc::now()).await?;

        let mut sent_from = 0usize;
        for project_row_id in OutboxEmail::projects_with_queued(&self.db.conn).await? {
            match self.send_project_batch(project_row_id, delta_seconds).await {
                Ok(true) => sent_from += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(project = project_row_id, "send batch failed: {err}");
                }
            }
        }

        for row in OutboxEmail::stuck_sending(&self.db.conn, stuck_cutoff).await? {
            tracing::error!(
                email = %row.uuid,
                started_sending_at = ?row.started_sending_at,
                "email stuck in sending; manual intervention required"
            );
        }

        if rendered_count > 0 || queued > 0 || sent_from > 0 {
            tracing::debug!(
                rendered = rendered_count,
                queued,
                projects_sent = sent_from,
                "queue worker tick"
            );
        }
        Ok(())
    }

    fn measure_delta(&self) -> f64 {
        let mut last = self.last_tick.lock().unwrap();
        let now = Instant::now();
        let delta = match *last {
            Some(previous) => now.duration_since(previous).as_secs_f64(),
            None => self.config.tick_interval.as_secs_f64(),
        };
        *last = Some(now);
        delta
    }

    async fn render_row(&self, row: &OutboxRow, worker_id: Uuid) -> Result<(), db::DatabaseError> {
        let project_name = match ids::project_uuid_by_id(&self.db.conn, row.project_id).await? {
            Some(uuid) => Project::find_by_id(&self.db.conn, uuid)
                .await?
                .map(|p| p.name)
                .unwrap_or_default(),
            None => String::new(),
        };

        let recipient: Option<Recipient> = serde_json::from_value(row.recipient.clone()).ok();
        let user_display_name = match recipient.as_ref().and_then(Recipient::user_id) {
            Some(user_id) => ProjectUser::find_by_id(&self.db.conn, row.project_id, user_id)
                .await?
                .and_then(|user| user.display_name),
            None => None,
        };

        let request = RenderRequest {
            template_source: row.tsx_source.clone(),
            theme_id: row.theme_id,
            variables: row.variables.clone(),
            user_display_name,
            project_display_name: project_name,
        };

        match self.renderer.render(&request).await {
            Ok(output) => {
                // An explicit category on the row wins over whatever the
                // template declares.
                let category = row
                    .override_notification_category_id
                    .and_then(categories::by_id)
                    .or_else(|| {
                        output
                            .notification_category
                            .as_deref()
                            .and_then(categories::by_name)
                    });
                let content = RenderedContent {
                    subject: output.subject.unwrap_or_default(),
                    html: output.html,
                    text: Some(output.text),
                    notification_category_id: category.map(|c| c.id),
                    is_transactional: category.is_some_and(|c| c.name == "Transactional"),
                };
                OutboxEmail::save_rendered(&self.db.conn, row, worker_id, &content).await?;
            }
            Err(err) => {
                tracing::warn!(email = %row.uuid, "render error: {}", err.details);
                OutboxEmail::mark_render_error(
                    &self.db.conn,
                    row,
                    worker_id,
                    &err.external_message,
                    err.details,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Sends as many queued emails of one project as its capacity allows.
    /// Returns whether anything was claimed.
    async fn send_project_batch(
        &self,
        project_row_id: i64,
        delta_seconds: f64,
    ) -> Result<bool, db::DatabaseError> {
        let stats = DeliveryStats::for_project(&self.db.conn, project_row_id).await?;
        let boost_expires_at = match ids::project_uuid_by_id(&self.db.conn, project_row_id).await? {
            Some(uuid) => Project::boost_expires_at(&self.db.conn, uuid).await?,
            None => None,
        };
        let rate = capacity::capacity_rate(
            &stats,
            self.config.base_hourly_rate,
            boost_expires_at,
            Utc::now(),
        );
        let roll = rand::thread_rng().r#gen::<f64>();
        let quota = capacity::stochastic_quota(rate.rate_per_second * delta_seconds, roll);
        if quota == 0 {
            return Ok(false);
        }

        let rows = db::retry_on_sqlite_busy(|| {
            OutboxEmail::claim_for_sending(&self.db.conn, project_row_id, quota)
        })
        .await?;
        if rows.is_empty() {
            return Ok(false);
        }

        for row in rows {
            if let Err(err) = self.process_single(&row).await {
                tracing::error!(email = %row.uuid, "send pass failed: {err}");
            }
        }
        Ok(true)
    }

    /// Suppression is evaluated here, at the moment the row was claimed for
    /// sending, so recipient state changed after queuing is honored.
    async fn process_single(&self, row: &OutboxRow) -> Result<(), db::DatabaseError> {
        let recipient: Recipient = match serde_json::from_value(row.recipient.clone()) {
            Ok(recipient) => recipient,
            Err(err) => {
                OutboxEmail::mark_send_error(
                    &self.db.conn,
                    row.id,
                    row.send_retries,
                    "The email has an invalid recipient payload.",
                    json!({ "error": err.to_string() }),
                    row.send_attempt_errors.clone(),
                )
                .await?;
                return Ok(());
            }
        };

        let resolution = recipient::resolve(
            &self.db.conn,
            row.project_id,
            &recipient,
            row.rendered_notification_category_id
                .or(row.override_notification_category_id),
            row.skip_deliverability_check,
        )
        .await?;

        let emails = match resolution {
            Resolution::Skip { reason, details } => {
                OutboxEmail::mark_skipped(&self.db.conn, row.id, reason, details).await?;
                return Ok(());
            }
            Resolution::Send { emails } => emails,
        };

        let message = EmailMessage {
            to: emails,
            subject: row.rendered_subject.clone().unwrap_or_default(),
            html: row.rendered_html.clone().unwrap_or_default(),
            text: row.rendered_text.clone(),
        };

        match self.mailer.send(&message).await {
            Ok(()) => {
                OutboxEmail::mark_sent(&self.db.conn, row.id, self.mailer.can_have_delivery_info())
                    .await?;
            }
            Err(error) => self.handle_send_failure(row, error).await?,
        }
        Ok(())
    }

    async fn handle_send_failure(
        &self,
        row: &OutboxRow,
        error: SendError,
    ) -> Result<(), db::DatabaseError> {
        let attempt = row.send_retries + 1;
        let exhausted = error.can_retry && attempt >= self.config.max_send_attempts;
        let attempt_errors = append_attempt_error(row.send_attempt_errors.clone(), attempt, &error);

        if error.can_retry && !exhausted {
            let backoff = self.retry_backoff(attempt);
            OutboxEmail::schedule_send_retry(
                &self.db.conn,
                row.id,
                attempt,
                Utc::now() + backoff,
                attempt_errors,
            )
            .await?;
            return Ok(());
        }

        if exhausted {
            tracing::error!(
                email = %row.uuid,
                attempts = attempt,
                "email failed after exhausting all send attempts"
            );
        }
        OutboxEmail::mark_send_error(
            &self.db.conn,
            row.id,
            attempt,
            &error.message,
            json!({ "error_type": error.error_type, "attempt_count": attempt }),
            Some(attempt_errors),
        )
        .await?;
        Ok(())
    }

    fn retry_backoff(&self, attempt: i32) -> chrono::Duration {
        let jitter = rand::thread_rng().r#gen::<f64>() + 0.5;
        let millis = jitter
            * self.config.send_retry_backoff_base_ms as f64
            * 2f64.powi(attempt.min(16));
        chrono::Duration::milliseconds(millis as i64)
    }
}

fn append_attempt_error(existing: Option<Value>, attempt: i32, error: &SendError) -> Value {
    let mut errors = match existing {
        Some(Value::Array(errors)) => errors,
        _ => Vec::new(),
    };
    errors.push(json!({
        "attempt_number": attempt,
        "timestamp": Utc::now().to_rfc3339(),
        "error_type": error.error_type,
        "message": error.message,
    }));
    Value::Array(errors)
}
