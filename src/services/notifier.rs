//! Fire-and-forget email notifications.
//!
//! Callers enqueue on a bounded queue drained by a fixed pool of workers.
//! A full or closed queue drops the message with a warning; delivery
//! failures are logged and never reach the triggering request.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Sink for account notifications. Implementations must not block.
pub trait NotificationSender: Send + Sync {
    fn send_verification(&self, email: &str, token: &str);

    fn send_password_reset(&self, email: &str, token: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),
}

/// Email transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Transport that only logs. Default when no mail relay is wired in.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "email sent");
        debug!(body = %email.body, "email body");
        Ok(())
    }
}

/// Base URLs used to build links in notification bodies.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    /// Public URL of this service (verification links hit the API directly).
    pub public_url: String,
    /// Frontend URL (reset links open the frontend form).
    pub frontend_url: String,
}

impl LinkBuilder {
    pub fn verification(&self, token: &str) -> String {
        format!("{}/api/auth/verify-email?token={}", self.public_url, token)
    }

    pub fn password_reset(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.frontend_url, token)
    }
}

fn greeting_name(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

pub fn verification_email(links: &LinkBuilder, to: &str, token: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Verify Your Email".to_string(),
        body: format!(
            "Hi {},\n\nConfirm your email address by opening the link below. \
             It expires in 24 hours.\n\n{}\n\nIf you did not create an account, ignore this email.\n\n{}\n",
            greeting_name(to),
            links.verification(token),
            links.frontend_url,
        ),
    }
}

pub fn password_reset_email(links: &LinkBuilder, to: &str, token: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Reset Your Password".to_string(),
        body: format!(
            "Hi {},\n\nA password reset was requested for your account. \
             The link below expires in 30 minutes.\n\n{}\n\nIf this was not you, ignore this email.\n\n{}\n",
            greeting_name(to),
            links.password_reset(token),
            links.frontend_url,
        ),
    }
}

/// Receiving end of the notification queue; hand it to [`EmailNotifier::spawn_workers`].
pub struct NotificationQueue(mpsc::Receiver<OutgoingEmail>);

/// Renders notifications and enqueues them for background delivery.
#[derive(Clone)]
pub struct EmailNotifier {
    links: LinkBuilder,
    tx: mpsc::Sender<OutgoingEmail>,
    dropped: Arc<AtomicU64>,
}

impl EmailNotifier {
    pub fn new(links: LinkBuilder, queue_size: usize) -> (Self, NotificationQueue) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let notifier = Self {
            links,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (notifier, NotificationQueue(rx))
    }

    /// Starts `workers` delivery tasks sharing the queue. Requires a Tokio runtime.
    pub fn spawn_workers(queue: NotificationQueue, mailer: Arc<dyn Mailer>, workers: usize) {
        let rx = Arc::new(Mutex::new(queue.0));
        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let mailer = Arc::clone(&mailer);
            tokio::spawn(async move {
                loop {
                    let email = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(email) = email else { break };
                    if let Err(e) = mailer.deliver(&email).await {
                        error!(worker_id, to = %email.to, error = %e, "failed to send email");
                    }
                }
                debug!(worker_id, "notification worker stopped");
            });
        }
        info!(workers, "notification workers started");
    }

    /// Messages dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, email: OutgoingEmail) {
        if let Err(err) = self.tx.try_send(email) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match &err {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "queue closed",
            };
            let email = err.into_inner();
            warn!(to = %email.to, subject = %email.subject, reason, "dropped notification");
        }
    }
}

impl NotificationSender for EmailNotifier {
    fn send_verification(&self, email: &str, token: &str) {
        self.enqueue(verification_email(&self.links, email, token));
    }

    fn send_password_reset(&self, email: &str, token: &str) {
        self.enqueue(password_reset_email(&self.links, email, token));
    }
}
