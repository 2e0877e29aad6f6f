//! Transactional email: password reset links and class reminders.
//!
//! Messages are Arabic-first, rendered right-to-left, and always sent as a
//! multipart alternative with a plain text part.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Rendered email content
#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Details shown in a class reminder
#[derive(Debug, Clone)]
pub struct ReminderDetails<'a> {
    pub recipient_name: &'a str,
    pub class_title: &'a str,
    pub other_party: &'a str,
    pub class_date: &'a str,
    pub start_time: &'a str,
    pub duration_minutes: i64,
    pub class_url: &'a str,
}

/// SMTP sender built from the `[email]` config section
pub struct Mailer {
    config: EmailConfig,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    pub async fn send_password_reset(
        &self,
        to_email: &str,
        full_name: &str,
        reset_url: &str,
        expires_in_minutes: i64,
    ) -> Result<()> {
        let content = render_password_reset(full_name, reset_url, expires_in_minutes);
        self.send(to_email, content).await
    }

    pub async fn send_class_reminder(&self, to_email: &str, details: &ReminderDetails<'_>) -> Result<()> {
        let content = render_class_reminder(details);
        self.send(to_email, content).await
    }

    async fn send(&self, to_email: &str, content: EmailContent) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                to = %to_email,
                subject = %content.subject,
                "Email not configured, skipping"
            );
            return Ok(());
        }

        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(content.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(content.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(content.html),
                    ),
            )?;

        let transport = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let transport = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            transport.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            transport
        };

        transport.build().send(email).await?;

        tracing::info!(to = %to_email, subject = %content.subject, "Email sent");
        Ok(())
    }
}

/// Shared RTL shell around a rendered body
fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ar" dir="rtl">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{ font-family: Tahoma, 'Segoe UI', Arial, sans-serif; margin: 0; padding: 0; background-color: #f5f5f5; direction: rtl; text-align: right; }}
        .container {{ max-width: 560px; margin: 0 auto; padding: 40px 20px; }}
        .card {{ background-color: #ffffff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0, 0, 0, 0.06); overflow: hidden; }}
        .header {{ background: linear-gradient(135deg, #0f766e 0%, #115e59 100%); color: white; padding: 28px 24px; text-align: center; }}
        .header h1 {{ margin: 0; font-size: 22px; font-weight: 600; }}
        .content {{ padding: 28px 24px; }}
        .content p {{ margin: 0 0 16px; color: #374151; line-height: 1.8; }}
        .highlight {{ background-color: #f3f4f6; border-radius: 6px; padding: 16px; margin: 20px 0; }}
        .button-container {{ text-align: center; margin: 28px 0; }}
        .button {{ display: inline-block; background: #0f766e; color: white !important; text-decoration: none; padding: 14px 32px; border-radius: 6px; font-size: 16px; }}
        .note {{ color: #6b7280; font-size: 13px; text-align: center; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header"><h1>{title}</h1></div>
            <div class="content">
{body}
            </div>
        </div>
    </div>
</body>
</html>"#,
        title = html_escape(title),
        body = body,
    )
}

pub fn render_password_reset(full_name: &str, reset_url: &str, expires_in_minutes: i64) -> EmailContent {
    let title = "إعادة تعيين كلمة المرور";

    let body = format!(
        r#"                <p>مرحباً {name}،</p>
                <p>تلقينا طلباً لإعادة تعيين كلمة المرور الخاصة بحسابك.</p>
                <div class="button-container">
                    <a href="{url}" class="button">إعادة تعيين كلمة المرور</a>
                </div>
                <p class="note">ينتهي هذا الرابط خلال {minutes} دقيقة. إذا لم تطلب ذلك يمكنك تجاهل هذه الرسالة.</p>"#,
        name = html_escape(full_name),
        url = html_escape(reset_url),
        minutes = expires_in_minutes,
    );

    let text = format!(
        "{title}\n\nمرحباً {full_name}،\n\nتلقينا طلباً لإعادة تعيين كلمة المرور الخاصة بحسابك.\n\
         لإعادة التعيين افتح الرابط التالي:\n{reset_url}\n\n\
         ينتهي هذا الرابط خلال {expires_in_minutes} دقيقة. إذا لم تطلب ذلك يمكنك تجاهل هذه الرسالة."
    );

    EmailContent {
        subject: title.to_string(),
        html: layout(title, &body),
        text,
    }
}

pub fn render_class_reminder(details: &ReminderDetails<'_>) -> EmailContent {
    let title = "تذكير بموعد الحصة";
    let subject = format!("{}: {}", title, details.class_title);

    let body = format!(
        r#"                <p>مرحباً {name}،</p>
                <p>نذكرك بأن حصتك القادمة ستبدأ قريباً.</p>
                <div class="highlight">
                    <p><strong>الحصة:</strong> {class_title}</p>
                    <p><strong>مع:</strong> {other}</p>
                    <p><strong>التاريخ:</strong> {date}</p>
                    <p><strong>الوقت (UTC):</strong> {time}</p>
                    <p><strong>المدة:</strong> {duration} دقيقة</p>
                </div>
                <div class="button-container">
                    <a href="{url}" class="button">فتح الحصة</a>
                </div>
                <p class="note">يمكنك الانضمام قبل بدء الحصة بدقائق.</p>"#,
        name = html_escape(details.recipient_name),
        class_title = html_escape(details.class_title),
        other = html_escape(details.other_party),
        date = html_escape(details.class_date),
        time = html_escape(details.start_time),
        duration = details.duration_minutes,
        url = html_escape(details.class_url),
    );

    let text = format!(
        "{title}\n\nمرحباً {name}،\n\nنذكرك بأن حصتك القادمة ستبدأ قريباً.\n\n\
         الحصة: {class_title}\nمع: {other}\nالتاريخ: {date}\nالوقت (UTC): {time}\nالمدة: {duration} دقيقة\n\n{url}",
        name = details.recipient_name,
        class_title = details.class_title,
        other = details.other_party,
        date = details.class_date,
        time = details.start_time,
        duration = details.duration_minutes,
        url = details.class_url,
    );

    EmailContent {
        subject,
        html: layout(title, &body),
        text,
    }
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(html_escape("\"quoted\""), "&quot;quoted&quot;");
    }

    #[test]
    fn test_render_password_reset() {
        let content = render_password_reset("ليلى", "https://tutorhub.example/reset-password?token=abc", 60);
        assert_eq!(content.subject, "إعادة تعيين كلمة المرور");
        assert!(content.html.contains(r#"dir="rtl""#));
        assert!(content.html.contains("ليلى"));
        assert!(content.html.contains("token=abc"));
        assert!(content.text.contains("https://tutorhub.example/reset-password?token=abc"));
        assert!(content.text.contains("60"));
    }

    #[test]
    fn test_render_class_reminder_escapes_names() {
        let details = ReminderDetails {
            recipient_name: "<b>Omar</b>",
            class_title: "Tajweed",
            other_party: "Ustadh Ali",
            class_date: "2025-03-10",
            start_time: "16:30",
            duration_minutes: 45,
            class_url: "https://tutorhub.example/classes/1",
        };
        let content = render_class_reminder(&details);
        assert!(content.subject.contains("Tajweed"));
        assert!(content.html.contains("&lt;b&gt;Omar&lt;/b&gt;"));
        assert!(!content.html.contains("<b>Omar</b>"));
        assert!(content.text.contains("16:30"));
        assert!(content.text.contains("45"));
    }

    #[tokio::test]
    async fn test_disabled_mailer_skips() {
        let mailer = Mailer::new(EmailConfig::default());
        assert!(!mailer.is_enabled());
        mailer
            .send_password_reset("user@example.com", "User", "https://x.example/r", 60)
            .await
            .unwrap();
    }
}
