//! Post-completion notification fan-out
//!
//! Runs once per job after a successful finalize. Every channel is
//! best-effort: errors are logged and never raised, and each call is capped
//! at ten seconds so a dead webhook cannot stall the worker.

use std::path::Path;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

use voxflow_profiles::NotificationConfig;

use crate::output::OutputFile;

/// Attachment budget for email; most SMTP relays cap near this.
const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

const CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_NTFY_URL: &str = "https://ntfy.sh";
const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

/// SMTP settings pulled from the environment once at startup.
#[derive(Debug, Clone)]
struct SmtpSettings {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl SmtpSettings {
    fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok().filter(|v| !v.is_empty())?;
        let user = std::env::var("SMTP_USER").ok().filter(|v| !v.is_empty())?;
        let password = std::env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty())?;
        let port = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(587);
        Some(Self {
            host,
            port,
            user,
            password,
        })
    }
}

/// Best-effort dispatcher for all configured channels.
pub struct Notifier {
    http: reqwest::Client,
    smtp: Option<SmtpSettings>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Build the notifier, reading SMTP settings from the environment.
    #[must_use]
    pub fn new() -> Self {
        let smtp = SmtpSettings::from_env();
        if smtp.is_none() {
            info!("SMTP not configured, email notifications disabled");
        }
        Self {
            http: reqwest::Client::new(),
            smtp,
        }
    }

    /// Dispatch to every configured channel. Never fails the job.
    pub async fn send_all(
        &self,
        config: &NotificationConfig,
        profile_id: &str,
        job_name: &str,
        outputs: &[OutputFile],
        total_cost: f64,
    ) {
        let attachables: Vec<&OutputFile> = outputs
            .iter()
            .filter(|o| o.kind == "docx" || o.kind == "html")
            .collect();
        let file_names: Vec<String> = attachables
            .iter()
            .filter_map(|o| o.path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let summary = format!(
            "Pipeline complete: {job_name} ({} files, ${total_cost:.4})",
            file_names.len()
        );

        if let Some(to) = config.email_to.as_deref() {
            self.send_email(to, config.email_cc.as_deref(), job_name, &attachables)
                .await;
        }
        if let Some(topic) = config.ntfy_topic.as_deref() {
            let url = config.ntfy_url.as_deref().unwrap_or(DEFAULT_NTFY_URL);
            self.send_ntfy(url, topic, job_name, &summary).await;
        }
        if let Some(webhook) = config.webhook_url.as_deref() {
            self.send_webhook(webhook, profile_id, job_name, &summary, &file_names, total_cost)
                .await;
        }
        if let (Some(user), Some(token)) =
            (config.pushover_user.as_deref(), config.pushover_token.as_deref())
        {
            self.send_pushover(user, token, job_name, &summary).await;
        }
    }

    async fn send_email(
        &self,
        to: &str,
        cc: Option<&str>,
        job_name: &str,
        attachables: &[&OutputFile],
    ) {
        let Some(smtp) = &self.smtp else {
            warn!("email notification skipped: SMTP not configured");
            return;
        };

        let selected = select_attachments(attachables);
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(format!(
            "Processing of \"{job_name}\" is complete. {} document(s) attached.\n",
            selected.len()
        )));
        for output in &selected {
            match build_attachment(&output.path) {
                Some(part) => multipart = multipart.singlepart(part),
                None => warn!(path = %output.path.display(), "skipping unreadable attachment"),
            }
        }

        let message = Message::builder()
            .from(match smtp.user.parse() {
                Ok(mbox) => mbox,
                Err(e) => {
                    warn!(error = %e, "invalid SMTP from address");
                    return;
                }
            })
            .to(match to.parse() {
                Ok(mbox) => mbox,
                Err(e) => {
                    warn!(to, error = %e, "invalid email recipient");
                    return;
                }
            });
        let message = match cc.and_then(|c| c.parse().ok()) {
            Some(mbox) => message.cc(mbox),
            None => message,
        };
        let message = match message
            .subject(format!("Transcription complete: {job_name}"))
            .multipart(multipart)
        {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "failed to build email");
                return;
            }
        };

        let transport = match AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host) {
            Ok(builder) => builder
                .port(smtp.port)
                .credentials(Credentials::new(smtp.user.clone(), smtp.password.clone()))
                .timeout(Some(CHANNEL_TIMEOUT))
                .build(),
            Err(e) => {
                warn!(host = %smtp.host, error = %e, "failed to build SMTP transport");
                return;
            }
        };

        match transport.send(message).await {
            Ok(_) => info!(to, "email notification sent"),
            Err(e) => warn!(to, error = %e, "email notification failed"),
        }
    }

    async fn send_ntfy(&self, base_url: &str, topic: &str, job_name: &str, summary: &str) {
        let result = self
            .http
            .post(format!("{base_url}/{topic}"))
            .header("Title", format!("Transcription: {job_name}"))
            .header("Priority", "default")
            .header("Tags", "white_check_mark")
            .body(summary.to_string())
            .timeout(CHANNEL_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(_) => info!(topic, "ntfy notification sent"),
            Err(e) => warn!(topic, error = %e, "ntfy notification failed"),
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        profile_id: &str,
        job_name: &str,
        summary: &str,
        file_names: &[String],
        total_cost: f64,
    ) {
        let body = serde_json::json!({
            "content": summary,
            "embeds": [{
                "title": "Transcription Complete",
                "description": format!(
                    "**{job_name}**\nProfile: {profile_id}\nCost: ${total_cost:.4}\nFiles: {}",
                    file_names.join(", ")
                ),
                "color": 3_066_993,
            }],
        });
        let result = self
            .http
            .post(url)
            .json(&body)
            .timeout(CHANNEL_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(_) => info!("webhook notification sent"),
            Err(e) => warn!(error = %e, "webhook notification failed"),
        }
    }

    async fn send_pushover(&self, user: &str, token: &str, job_name: &str, summary: &str) {
        let title = format!("Transcription: {job_name}");
        let params = [
            ("token", token),
            ("user", user),
            ("title", title.as_str()),
            ("message", summary),
        ];
        let result = self
            .http
            .post(PUSHOVER_URL)
            .form(&params)
            .timeout(CHANNEL_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(_) => info!("pushover notification sent"),
            Err(e) => warn!(error = %e, "pushover notification failed"),
        }
    }
}

/// Keep attachments under the size cap. Over the cap, prefer files whose
/// names mark them as cheat sheets or analyses; failing that, the two
/// smallest.
fn select_attachments<'a>(outputs: &[&'a OutputFile]) -> Vec<&'a OutputFile> {
    select_attachments_with_cap(outputs, MAX_ATTACHMENT_BYTES)
}

fn select_attachments_with_cap<'a>(outputs: &[&'a OutputFile], cap: u64) -> Vec<&'a OutputFile> {
    let total: u64 = outputs.iter().map(|o| file_size(&o.path)).sum();
    if total <= cap {
        return outputs.to_vec();
    }

    warn!(
        total_bytes = total,
        cap_bytes = cap,
        "attachments over cap, selecting a subset"
    );
    let mut priority: Vec<&OutputFile> = outputs
        .iter()
        .copied()
        .filter(|o| {
            let name = o.path.file_name().map(|n| n.to_string_lossy().to_lowercase());
            name.map(|n| n.contains("cheatsheet") || n.contains("cheat_sheet") || n.contains("analysis"))
                .unwrap_or(false)
        })
        .collect();
    if priority.is_empty() {
        let mut by_size: Vec<&OutputFile> = outputs.to_vec();
        by_size.sort_by_key(|o| file_size(&o.path));
        priority = by_size.into_iter().take(2).collect();
    }
    priority
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn build_attachment(path: &Path) -> Option<SinglePart> {
    let bytes = std::fs::read(path).ok()?;
    let filename = path.file_name()?.to_string_lossy().into_owned();
    let content_type = if path.extension().and_then(|e| e.to_str()) == Some("html") {
        ContentType::TEXT_HTML
    } else {
        ContentType::parse("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
            .ok()?
    };
    Some(Attachment::new(filename).body(bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn output(dir: &Path, name: &str, size: usize) -> OutputFile {
        let path = dir.join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        OutputFile {
            path,
            kind: "docx".into(),
            stage: "final".into(),
        }
    }

    #[test]
    fn under_cap_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let a = output(dir.path(), "a.docx", 100);
        let b = output(dir.path(), "b.docx", 100);
        let all = [&a, &b];
        assert_eq!(select_attachments_with_cap(&all, 1024).len(), 2);
    }

    #[test]
    fn over_cap_prefers_cheatsheet_and_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = output(dir.path(), "week3_cheatsheet.docx", 100);
        let analysis = output(dir.path(), "week3_analysis.docx", 100);
        let clean = output(dir.path(), "week3_clean.docx", 400);
        let summary = output(dir.path(), "week3_summary.docx", 400);

        let outputs = [&sheet, &analysis, &clean, &summary];
        let selected = select_attachments_with_cap(&outputs, 500);
        let names: Vec<PathBuf> = selected.iter().map(|o| o.path.clone()).collect();
        assert_eq!(selected.len(), 2);
        assert!(names.contains(&sheet.path));
        assert!(names.contains(&analysis.path));
    }

    #[test]
    fn over_cap_without_priority_takes_two_smallest() {
        let dir = tempfile::tempdir().unwrap();
        let small = output(dir.path(), "s.docx", 10);
        let medium = output(dir.path(), "m.docx", 200);
        let large = output(dir.path(), "l.docx", 400);
        let outputs = [&large, &small, &medium];

        let selected = select_attachments_with_cap(&outputs, 300);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().any(|o| o.path == small.path));
        assert!(selected.iter().any(|o| o.path == medium.path));
    }
}
