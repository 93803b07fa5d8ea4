// src/email.rs

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use crate::config::Config;
use crate::error::AppError;

/// Outbound mail through the configured SMTP relay.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    frontend_url: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_pass.clone(),
            ))
            .build();

        let from = config
            .email_from
            .parse()
            .map_err(|e| AppError::InternalServerError(format!("Invalid EMAIL_FROM: {}", e)))?;

        Ok(Self {
            transport,
            from,
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sends the password-reset mail with its single-use, time-limited link.
    pub async fn send_password_reset(
        &self,
        name: &str,
        email: &str,
        token: &str,
    ) -> Result<(), AppError> {
        let to: Mailbox = email
            .parse()
            .map_err(|e| AppError::Validation(format!("Invalid email address: {}", e)))?;

        let link = format!("{}/auth/forget-password/{}", self.frontend_url, token);
        let html = format!(
            "<p>Hello {name}, reset your user password</p>\n\
             <p>Enter the following link to generate your new password: <a href=\"{link}\">Change Password</a></p>\n\
             <p>If you did not request this change, just ignore it.</p>"
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Reset your password on Snapgram")
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::InternalServerError(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}
