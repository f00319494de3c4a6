//! services/backend/src/adapters/text_extract.rs
//!
//! Plain-text extraction for stored note files. PDF and Word documents are piped
//! through the `pdftotext` and `pandoc` command-line tools; text files are decoded
//! directly. Legacy `.doc` and slide decks have no extractor, and the core refuses
//! them as flashcard sources.

use std::process::Stdio;

use bytes::Bytes;
use notenest_core::ports::{PortError, PortResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    PdfText,
    WordConvert,
    TextNative,
}

impl ExtractionStrategy {
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("pdf") {
            Some(Self::PdfText)
        } else if mime.contains("wordprocessingml") {
            Some(Self::WordConvert)
        } else if mime.starts_with("text/") {
            Some(Self::TextNative)
        } else {
            None
        }
    }
}

/// Runs `program` with `data` on stdin and returns its stdout as text.
async fn pipe_through(program: &str, args: &[&str], data: Bytes) -> PortResult<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PortError::Unsupported(format!("failed to spawn {}: {}", program, e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PortError::Unexpected(format!("{} stdin unavailable", program)))?;
    let writer = tokio::spawn(async move {
        stdin.write_all(&data).await?;
        stdin.shutdown().await
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| PortError::Unexpected(format!("{} failed: {}", program, e)))?;
    // A converter may exit before reading all of its input; its exit status decides.
    let _ = writer.await;

    if !output.status.success() {
        return Err(PortError::Unexpected(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    debug!(program, bytes = output.stdout.len(), "Text extracted");
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub async fn extract_text(mime: &str, data: Bytes) -> PortResult<String> {
    match ExtractionStrategy::from_mime_type(mime) {
        Some(ExtractionStrategy::PdfText) => pipe_through("pdftotext", &["-q", "-", "-"], data).await,
        Some(ExtractionStrategy::WordConvert) => {
            pipe_through("pandoc", &["-f", "docx", "-t", "plain"], data).await
        }
        Some(ExtractionStrategy::TextNative) => Ok(String::from_utf8_lossy(&data).into_owned()),
        None => Err(PortError::Unsupported(format!(
            "Text extraction is not available for {}",
            mime
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notenest_core::Policy;

    #[test]
    fn every_flashcard_source_type_has_an_extractor() {
        for mime in &Policy::default().flashcard_source_types {
            assert!(
                ExtractionStrategy::from_mime_type(mime).is_some(),
                "{} has no extraction strategy",
                mime
            );
        }
    }

    #[test]
    fn strategy_follows_mime_type() {
        assert_eq!(
            ExtractionStrategy::from_mime_type("application/pdf"),
            Some(ExtractionStrategy::PdfText)
        );
        assert_eq!(
            ExtractionStrategy::from_mime_type(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            Some(ExtractionStrategy::WordConvert)
        );
        assert_eq!(
            ExtractionStrategy::from_mime_type("text/plain"),
            Some(ExtractionStrategy::TextNative)
        );
        assert_eq!(ExtractionStrategy::from_mime_type("application/vnd.ms-powerpoint"), None);
    }

    #[tokio::test]
    async fn text_files_need_no_tools() {
        let text = extract_text("text/plain", Bytes::from_static(b"Stacks are LIFO."))
            .await
            .unwrap();
        assert_eq!(text, "Stacks are LIFO.");
        assert!(matches!(
            extract_text("image/png", Bytes::new()).await,
            Err(PortError::Unsupported(_))
        ));
    }
}
