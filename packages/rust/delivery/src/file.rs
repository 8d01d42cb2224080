use std::path::{Path, PathBuf};

use async_trait::async_trait;
use paperfeeder_shared::{PaperFeederError, Result};
use tracing::{info, instrument};

use crate::{Delivery, DeliveryReceipt, RenderedEmail};

/// Writes the report to a local HTML file instead of sending it.
#[derive(Debug, Clone)]
pub struct FileDelivery {
    path: PathBuf,
    to: String,
}

impl FileDelivery {
    pub fn new(path: impl Into<PathBuf>, to: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            to: to.into(),
        }
    }
}

#[async_trait]
impl Delivery for FileDelivery {
    fn name(&self) -> &str {
        "file"
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn deliver(&self, email: &RenderedEmail) -> Result<DeliveryReceipt> {
        write_preview(&self.path, &self.to, email).await?;
        info!("report written");
        Ok(DeliveryReceipt::Written {
            path: self.path.clone(),
        })
    }
}

/// Write `email` as HTML with `<!-- TO -->` / `<!-- SUBJECT -->` header comments.
pub async fn write_preview(path: &Path, to: &str, email: &RenderedEmail) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PaperFeederError::io(dir, e))?;
    }

    let content = format!(
        "<!-- TO: {} -->\n<!-- SUBJECT: {} -->\n{}",
        comment_safe(to),
        comment_safe(&email.subject),
        email.html
    );
    tokio::fs::write(path, content)
        .await
        .map_err(|e| PaperFeederError::io(path, e))
}

/// `--` cannot appear inside an HTML comment.
fn comment_safe(s: &str) -> String {
    s.replace("--", "- -")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> RenderedEmail {
        RenderedEmail {
            subject: "Daily Paper Digest - 2024-01-02".into(),
            html: "<html><body><h1>Digest</h1></body></html>".into(),
            text: "Digest".into(),
        }
    }

    #[tokio::test]
    async fn writes_header_comments_then_html() {
        let dir = std::env::temp_dir().join(format!("pf-file-delivery-{}", std::process::id()));
        let path = dir.join("nested").join("preview.html");

        let receipt = FileDelivery::new(&path, "reader@example.com")
            .deliver(&email())
            .await
            .expect("deliver");
        assert_eq!(receipt, DeliveryReceipt::Written { path: path.clone() });

        let written = std::fs::read_to_string(&path).expect("read back");
        std::fs::remove_dir_all(&dir).ok();

        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("<!-- TO: reader@example.com -->"));
        assert_eq!(lines.next(), Some("<!-- SUBJECT: Daily Paper Digest - 2024-01-02 -->"));
        assert!(written.ends_with("</html>"));
    }

    #[test]
    fn comment_text_is_sanitized() {
        assert_eq!(comment_safe("a -- b"), "a - - b");
    }
}
