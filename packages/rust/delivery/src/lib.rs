//! Report delivery: Resend email or a local preview file.
//!
//! One [`Delivery`] implementation is selected at startup. Delivery failures
//! are returned to the caller, which decides how to surface them; they never
//! panic or retry here.

mod file;
mod resend;

use std::path::PathBuf;

use async_trait::async_trait;
use paperfeeder_report::{render_html, render_text, subject_line};
use paperfeeder_shared::{Report, Result, RunConfig};

pub use file::{FileDelivery, write_preview};
pub use resend::ResendDelivery;

/// A report rendered into the parts an email needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl RenderedEmail {
    pub fn from_report(report: &Report) -> Result<Self> {
        let html = render_html(report);
        let text = render_text(&html)?;
        Ok(Self {
            subject: subject_line(report),
            html,
            text,
        })
    }
}

/// Where a delivered report ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// Accepted by the email API, with its message id when returned.
    Emailed { to: String, id: Option<String> },
    /// Written to a local file.
    Written { path: PathBuf },
}

impl std::fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emailed { to, id: Some(id) } => write!(f, "emailed to {to} (id {id})"),
            Self::Emailed { to, id: None } => write!(f, "emailed to {to}"),
            Self::Written { path } => write!(f, "written to {}", path.display()),
        }
    }
}

#[async_trait]
pub trait Delivery: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, email: &RenderedEmail) -> Result<DeliveryReceipt>;
}

/// Pick the delivery channel for this run: file in dry-run, email otherwise.
pub fn delivery_from_config(config: &RunConfig) -> Result<Box<dyn Delivery>> {
    match (&config.email, config.dry_run) {
        (Some(email), false) => Ok(Box::new(ResendDelivery::new(email, config.http_timeout())?)),
        _ => Ok(Box::new(FileDelivery::new(
            config.preview_path.clone(),
            "dry-run",
        ))),
    }
}
