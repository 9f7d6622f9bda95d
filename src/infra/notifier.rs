use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        email_templates::render_notice,
        ports::notifier::{Notice, Notifier},
    },
    infra::http_client,
};

/// Emails notices through Resend.
#[derive(Clone)]
pub struct ResendNotifier {
    client: Client,
    api_key: SecretString,
    from: String,
    app_origin: String,
}

impl ResendNotifier {
    pub fn new(api_key: SecretString, from: String, app_origin: String) -> Self {
        Self {
            client: http_client::build_client(),
            api_key,
            from,
            app_origin,
        }
    }
}

#[derive(Serialize)]
struct ResendReq<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[async_trait]
impl Notifier for ResendNotifier {
    async fn send(&self, notice: &Notice) -> AppResult<()> {
        let (subject, html) = render_notice(&self.app_origin, notice);
        let body = ResendReq {
            from: &self.from,
            to: [&notice.to],
            subject: &subject,
            html: &html,
        };

        self.client
            .post("https://api.resend.com/emails")
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to send email: {e}")))?
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("Email API error: {e}")))?;

        tracing::info!(
            user_id = %notice.user_id,
            template = %notice.template,
            "Notice emailed"
        );
        Ok(())
    }
}

/// Writes notices to the log. Used when no email provider is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &Notice) -> AppResult<()> {
        tracing::info!(
            to = %notice.to,
            user_id = %notice.user_id,
            template = %notice.template,
            payload = %notice.payload,
            "Notice (email disabled)"
        );
        Ok(())
    }
}
