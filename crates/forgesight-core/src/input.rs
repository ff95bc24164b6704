//! Analysis request input.

use sha2::{Digest, Sha256};

/// Immutable input for one analysis run: the image bytes plus optional
/// user-supplied text (a caption, claim, or context for the image).
///
/// Created once per request, owned by the runner for the duration of the
/// run, shared read-only with every step, and discarded when the run ends.
#[derive(Clone)]
pub struct TaskInput {
    /// Raw image bytes as submitted.
    pub image: Vec<u8>,

    /// Optional accompanying text.
    pub text: Option<String>,
}

impl TaskInput {
    pub fn new(image: Vec<u8>, text: Option<String>) -> Self {
        Self { image, text }
    }

    /// Hex-encoded SHA-256 digest of the image bytes.
    ///
    /// Used for log correlation across a run, not for security decisions.
    pub fn image_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.image);
        hex::encode(hasher.finalize())
    }

    /// Whether non-blank text accompanies the image.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

impl std::fmt::Debug for TaskInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keep raw image bytes out of logs.
        f.debug_struct("TaskInput")
            .field("image_bytes", &self.image.len())
            .field("text", &self.text)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_identical_bytes() {
        let a = TaskInput::new(vec![0xAB; 64], None);
        let b = TaskInput::new(vec![0xAB; 64], Some("caption".to_string()));
        assert_eq!(a.image_digest(), b.image_digest());
        assert_eq!(a.image_digest().len(), 64);
    }

    #[test]
    fn digest_differs_for_different_bytes() {
        let a = TaskInput::new(vec![1, 2, 3], None);
        let b = TaskInput::new(vec![1, 2, 4], None);
        assert_ne!(a.image_digest(), b.image_digest());
    }

    #[test]
    fn debug_output_hides_raw_bytes() {
        let input = TaskInput::new(vec![9, 9, 9, 9], Some("cat on a beach".to_string()));
        let rendered = format!("{input:?}");
        assert!(rendered.contains("image_bytes: 4"));
        assert!(!rendered.contains("9, 9, 9"));
    }

    #[test]
    fn has_text_requires_non_blank_content() {
        assert!(!TaskInput::new(vec![], None).has_text());
        assert!(!TaskInput::new(vec![], Some("   ".to_string())).has_text());
        assert!(TaskInput::new(vec![], Some("a claim".to_string())).has_text());
    }
}
