//! Background class reminders.
//!
//! Every tick looks for scheduled classes starting within the lead time that
//! have not been reminded yet, emails both participants, writes in-app
//! notifications and flags the class so it is reminded once.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::email::{Mailer, ReminderDetails};
use crate::config::SchedulingConfig;
use crate::db::{ClassSession, Notification, Profile};
use crate::events::{ChangeAction, ChangeEvent, EventBus};
use crate::DbPool;

pub struct ReminderService {
    db: DbPool,
    mailer: Arc<Mailer>,
    events: EventBus,
    lead: Duration,
    interval_seconds: u64,
    public_url: String,
}

impl ReminderService {
    pub fn new(
        db: DbPool,
        mailer: Arc<Mailer>,
        events: EventBus,
        config: &SchedulingConfig,
        public_url: &str,
    ) -> Self {
        Self {
            db,
            mailer,
            events,
            lead: Duration::minutes(config.reminder_lead_minutes.clamp(0, 24 * 60)),
            interval_seconds: config.reminder_interval_seconds.max(1),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Run forever, one tick per interval
    pub async fn run(self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.interval_seconds));
        tracing::info!(
            interval_seconds = self.interval_seconds,
            lead_minutes = self.lead.num_minutes(),
            "Class reminder service started"
        );

        loop {
            interval.tick().await;
            match self.tick(Utc::now()).await {
                Ok(0) => {}
                Ok(sent) => tracing::info!(classes = sent, "Class reminders sent"),
                Err(e) => tracing::error!("Reminder tick failed: {}", e),
            }
        }
    }

    /// Remind every class starting in `(now, now + lead]`. Returns how many
    /// classes were reminded.
    pub async fn tick(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let horizon = now + self.lead;
        let mut dates = vec![now.format("%Y-%m-%d").to_string()];
        let last = horizon.format("%Y-%m-%d").to_string();
        if last != dates[0] {
            dates.push(last);
        }

        let candidates = ClassSession::pending_reminders(&self.db, &dates).await?;
        let mut reminded = 0;

        for class in candidates {
            let Ok(start) = class.starts_at() else {
                tracing::warn!(class_id = %class.id, "Skipping class with unparseable start");
                continue;
            };
            if start <= now || start > horizon {
                continue;
            }

            let student = Profile::find(&self.db, &class.student_id).await?;
            let teacher = Profile::find(&self.db, &class.teacher_id).await?;
            let (Some(student), Some(teacher)) = (student, teacher) else {
                continue;
            };

            // A failed recipient is logged, not retried, so nobody is reminded twice
            for (recipient, other) in [(&student, &teacher), (&teacher, &student)] {
                if let Err(e) = self.remind(&class, recipient, other).await {
                    tracing::warn!(
                        class_id = %class.id,
                        recipient = %recipient.id,
                        "Failed to remind participant: {}",
                        e
                    );
                }
            }

            ClassSession::mark_reminded(&self.db, &class.id).await?;
            reminded += 1;
        }

        Ok(reminded)
    }

    async fn remind(&self, class: &ClassSession, recipient: &Profile, other: &Profile) -> anyhow::Result<()> {
        let class_url = format!("{}/classes/{}", self.public_url, class.id);
        let details = ReminderDetails {
            recipient_name: &recipient.full_name,
            class_title: &class.title,
            other_party: &other.full_name,
            class_date: &class.class_date,
            start_time: &class.start_time,
            duration_minutes: class.duration_minutes,
            class_url: &class_url,
        };

        // Email failures must not block the in-app reminder
        if let Err(e) = self.mailer.send_class_reminder(&recipient.email, &details).await {
            tracing::warn!(
                class_id = %class.id,
                to = %recipient.email,
                "Failed to send reminder email: {}",
                e
            );
        }

        let notification = Notification::create(
            &self.db,
            &recipient.id,
            "class_reminder",
            "تذكير بموعد الحصة",
            &format!(
                "حصة \"{}\" تبدأ في {} الساعة {} (UTC)",
                class.title, class.class_date, class.start_time
            ),
        )
        .await?;

        self.events.publish(
            ChangeEvent::new("notifications", ChangeAction::Insert, &notification.id).to([&recipient.id]),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailConfig, SchedulingConfig};
    use crate::db::profile::fixtures::profile;
    use crate::db::{init_memory, CreateClassRequest, Role};

    fn class_at(student: &str, teacher: &str, date: &str, time: &str) -> CreateClassRequest {
        CreateClassRequest {
            student_id: student.to_string(),
            teacher_id: teacher.to_string(),
            title: "Arabic grammar".to_string(),
            class_date: date.to_string(),
            start_time: time.to_string(),
            duration_minutes: 60,
            meeting_link: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_tick_reminds_once_within_lead() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let teacher = profile(&db, "t@example.com", Role::Teacher).await;

        let now = Utc::now();
        let soon = now + Duration::minutes(30);
        let later = now + Duration::hours(5);

        let due = ClassSession::create(
            &db,
            &class_at(
                &student.id,
                &teacher.id,
                &soon.format("%Y-%m-%d").to_string(),
                &soon.format("%H:%M").to_string(),
            ),
        )
        .await
        .unwrap();
        ClassSession::create(
            &db,
            &class_at(
                &student.id,
                &teacher.id,
                &later.format("%Y-%m-%d").to_string(),
                &later.format("%H:%M").to_string(),
            ),
        )
        .await
        .unwrap();

        let events = EventBus::new();
        let mut rx = events.subscribe();
        let service = ReminderService::new(
            db.clone(),
            Arc::new(Mailer::new(EmailConfig::default())),
            events,
            &SchedulingConfig::default(),
            "https://tutorhub.example/",
        );

        assert_eq!(service.tick(now).await.unwrap(), 1);
        assert_eq!(service.tick(now).await.unwrap(), 0);

        let reloaded = ClassSession::find(&db, &due.id).await.unwrap().unwrap();
        assert_eq!(reloaded.reminder_sent, 1);

        let student_notes = Notification::list_for_user(&db, &student.id, true).await.unwrap();
        let teacher_notes = Notification::list_for_user(&db, &teacher.id, true).await.unwrap();
        assert_eq!(student_notes.len(), 1);
        assert_eq!(teacher_notes.len(), 1);
        assert_eq!(student_notes[0].kind, "class_reminder");

        assert_eq!(rx.recv().await.unwrap().table, "notifications");
    }

    #[tokio::test]
    async fn test_failed_recipient_still_marks_class_reminded() {
        let db = init_memory().await.unwrap();
        let student = profile(&db, "s@example.com", Role::Student).await;
        let teacher = profile(&db, "t@example.com", Role::Teacher).await;

        // Notifications for the teacher cannot be written
        sqlx::query(&format!(
            "CREATE TRIGGER reject_teacher_notes BEFORE INSERT ON notifications \
             WHEN NEW.user_id = '{}' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
            teacher.id
        ))
        .execute(&db)
        .await
        .unwrap();

        let now = Utc::now();
        let soon = now + Duration::minutes(30);
        let due = ClassSession::create(
            &db,
            &class_at(
                &student.id,
                &teacher.id,
                &soon.format("%Y-%m-%d").to_string(),
                &soon.format("%H:%M").to_string(),
            ),
        )
        .await
        .unwrap();

        let service = ReminderService::new(
            db.clone(),
            Arc::new(Mailer::new(EmailConfig::default())),
            EventBus::new(),
            &SchedulingConfig::default(),
            "https://tutorhub.example",
        );

        assert_eq!(service.tick(now).await.unwrap(), 1);
        assert_eq!(service.tick(now).await.unwrap(), 0);

        let reloaded = ClassSession::find(&db, &due.id).await.unwrap().unwrap();
        assert_eq!(reloaded.reminder_sent, 1);
        let student_notes = Notification::list_for_user(&db, &student.id, false).await.unwrap();
        assert_eq!(student_notes.len(), 1);
    }
}
