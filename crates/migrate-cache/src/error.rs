use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced while synchronising or optimising the migration cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("step size must be at least 1")]
    InvalidStepSize,

    #[error("expected a number of migrations, found {value:?}")]
    ExpectedNumberOfMigrations { value: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },

    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A cache entry file exists but cannot be trusted.
    #[error("corrupt cache metadata at {path}: {message}")]
    MetadataCorruption { path: PathBuf, message: String },

    /// Folder names map `_` back to `:`, so a folder already holding `:` has no
    /// identifier that round-trips to it.
    #[error("migration folder {name:?} must not contain ':'")]
    InvalidMigrationDirName { name: String },

    #[error("failed to acquire cache lock {path}: {source}")]
    LockAcquisition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("query compilation failed: {0}")]
    Compiler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CacheError {
    pub fn compiler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Compiler(err.into())
    }

    pub(crate) fn corruption(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::MetadataCorruption {
            path: path.into(),
            message: sanitize_json_error_message(&message.to_string()),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        // Identifiers and index names end up in cache metadata; avoid echoing string values.
        let message = sanitize_json_error_message(&err.to_string());
        Self::Json { message }
    }
}

fn sanitize_json_error_message(message: &str) -> String {
    // Redact all double-quoted substrings, keeping the structure and line/column info.
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let mut end = None;
        let bytes = rest.as_bytes();
        for (idx, &b) in bytes.iter().enumerate() {
            if b != b'"' {
                continue;
            }

            // Quotes preceded by an odd number of backslashes are escaped.
            let mut backslashes = 0usize;
            let mut k = idx;
            while k > 0 && bytes[k - 1] == b'\\' {
                backslashes += 1;
                k -= 1;
            }
            if backslashes % 2 == 0 {
                end = Some(idx);
                break;
            }
        }

        let Some(end) = end else {
            out.push_str("<redacted>");
            rest = "";
            break;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_do_not_echo_string_values() {
        let secret = "users_by_secret_email";
        let err = serde_json::from_value::<bool>(serde_json::json!(secret))
            .expect_err("expected type error");

        let message = CacheError::from(err).to_string();
        assert!(!message.contains(secret), "{message}");
        assert!(message.contains("<redacted>"), "{message}");
    }

    #[test]
    fn unterminated_quote_is_redacted() {
        assert_eq!(
            sanitize_json_error_message(r#"bad "value"#),
            r#"bad "<redacted>"#
        );
    }
}
