use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use faqbot_core::{ChatQuery, FaqError, TableSummary};
use faqbot_store_xlsx::{FaqStore, ReplaceError};
use serde::{Deserialize, Serialize};

pub mod admin;
pub mod upload;

pub use admin::{
    AdminCredentials, AdminGate, SessionManager, DEFAULT_SESSION_TTL, SESSION_COOKIE,
};
pub use upload::{allowed_file, secure_filename, ALLOWED_EXTENSIONS, MAX_UPLOAD_BYTES};

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub const UPLOAD_SUCCESS_MESSAGE: &str = "FAQ updated successfully. Replaced existing faq.xlsx.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Upload exceeds size limit: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("{0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("Failed to update FAQ: {0}")]
    Replace(#[from] ReplaceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FaqError> for ApiError {
    fn from(err: FaqError) -> Self {
        match err {
            FaqError::Validation(message) => Self::Validation(message),
        }
    }
}

/// Chat body. Missing fields are treated like empty ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub rows: usize,
    pub roles: Vec<String>,
    pub faq_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResult {
    pub message: String,
    pub stored_as: String,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct FaqBotApi {
    store: Arc<FaqStore>,
    upload_dir: PathBuf,
}

impl FaqBotApi {
    #[must_use]
    pub fn new(store: Arc<FaqStore>, upload_dir: PathBuf) -> Self {
        Self { store, upload_dir }
    }

    #[must_use]
    pub fn store(&self) -> &FaqStore {
        &self.store
    }

    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Answer one chat message against the active table.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] when `role` or `message` is missing or blank.
    pub fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let query = ChatQuery::new(
            request.role.as_deref().unwrap_or_default(),
            request.message.as_deref().unwrap_or_default(),
        )?;
        let table = self.store.snapshot();
        Ok(ChatResponse { answer: table.answer_for(&query).to_string() })
    }

    #[must_use]
    pub fn summary(&self) -> TableSummary {
        self.store.snapshot().summary()
    }

    #[must_use]
    pub fn dashboard(&self) -> DashboardStats {
        let summary = self.summary();
        DashboardStats {
            rows: summary.rows,
            roles: summary.roles,
            faq_path: self.store.canonical_path().display().to_string(),
        }
    }

    /// Validate an uploaded spreadsheet, stage it in the upload directory and
    /// hand it to the store for replacement.
    ///
    /// # Errors
    /// Returns [`ApiError::Validation`] or [`ApiError::PayloadTooLarge`] for a
    /// rejected upload, [`ApiError::Io`] when staging fails and
    /// [`ApiError::Replace`] when the store cannot move the file into place.
    pub fn upload(
        &self,
        filename: Option<&str>,
        contents: &[u8],
    ) -> Result<UploadResult, ApiError> {
        let stored_as = validate_upload(filename, contents.len())?;
        let staged = self.stage(&stored_as, contents)?;
        let table = self.store.replace(&staged).inspect_err(|err| {
            tracing::warn!(error = %err, staged = %staged.display(), "faq replace failed");
        })?;
        Ok(UploadResult {
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
            stored_as,
            rows: table.len(),
        })
    }

    /// Path of a file still present in the upload directory.
    ///
    /// # Errors
    /// Returns [`ApiError::NotFound`] for names that are not flat, safe filenames
    /// or that do not exist.
    pub fn uploaded_file(&self, filename: &str) -> Result<PathBuf, ApiError> {
        if filename.is_empty() || secure_filename(filename) != filename {
            return Err(ApiError::NotFound(filename.to_string()));
        }
        let path = self.upload_dir.join(filename);
        if !path.is_file() {
            return Err(ApiError::NotFound(filename.to_string()));
        }
        Ok(path)
    }

    fn stage(&self, stored_as: &str, contents: &[u8]) -> Result<PathBuf, ApiError> {
        fs::create_dir_all(&self.upload_dir)?;
        let staged = self.upload_dir.join(stored_as);
        fs::write(&staged, contents)?;
        Ok(staged)
    }
}

/// Check an upload before anything touches disk; returns the sanitized filename.
///
/// # Errors
/// Returns [`ApiError::Validation`] for a missing or empty filename, a non-Excel
/// extension, an empty payload or a name with nothing usable left after
/// sanitizing, and [`ApiError::PayloadTooLarge`] above [`MAX_UPLOAD_BYTES`].
pub fn validate_upload(filename: Option<&str>, size: usize) -> Result<String, ApiError> {
    let filename = filename.unwrap_or_default();
    if filename.is_empty() {
        return Err(ApiError::Validation("No file selected.".to_string()));
    }
    if !allowed_file(filename) {
        return Err(ApiError::Validation("Only Excel files (.xlsx/.xls) are allowed.".to_string()));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ApiError::PayloadTooLarge { size, max: MAX_UPLOAD_BYTES });
    }
    if size == 0 {
        return Err(ApiError::Validation("Uploaded file is empty.".to_string()));
    }
    let stored_as = secure_filename(filename);
    if !allowed_file(&stored_as) {
        return Err(ApiError::Validation("Invalid file name.".to_string()));
    }
    Ok(stored_as)
}

#[cfg(test)]
mod tests {
    use faqbot_core::{FaqTable, Rule, FALLBACK_ANSWER};
    use faqbot_store_xlsx::workbook::write_table;
    use tempfile::TempDir;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        api: FaqBotApi,
    }

    fn fixture(rules: Vec<Rule>) -> Fixture {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
        let faq_path = dir.path().join("faq.xlsx");
        if let Err(err) = write_table(&faq_path, &FaqTable::new(rules)) {
            panic!("failed to write faq fixture: {err}");
        }
        let store = Arc::new(FaqStore::open(&faq_path));
        let api = FaqBotApi::new(store, dir.path().join("uploads"));
        Fixture { _dir: dir, api }
    }

    fn workbook_bytes(rules: Vec<Rule>) -> Vec<u8> {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
        let path = dir.path().join("upload.xlsx");
        if let Err(err) = write_table(&path, &FaqTable::new(rules)) {
            panic!("failed to write upload fixture: {err}");
        }
        fs::read(&path).unwrap_or_else(|err| panic!("failed to read upload fixture: {err}"))
    }

    fn request(role: &str, message: &str) -> ChatRequest {
        ChatRequest { role: Some(role.to_string()), message: Some(message.to_string()) }
    }

    #[test]
    fn chat_normalizes_inputs_and_answers() {
        let fixture = fixture(vec![Rule::new("parent", "fee, fees", "A1")]);
        let response = fixture
            .api
            .chat(&request("  PARENT ", "When are the FEES due?"))
            .unwrap_or_else(|err| panic!("chat failed: {err}"));
        assert_eq!(response.answer, "A1");

        let response = fixture
            .api
            .chat(&request("student", "fees"))
            .unwrap_or_else(|err| panic!("chat failed: {err}"));
        assert_eq!(response.answer, FALLBACK_ANSWER);
    }

    #[test]
    fn chat_rejects_missing_fields() {
        let fixture = fixture(Vec::new());
        let missing = ChatRequest { role: None, message: Some("hello".to_string()) };
        assert!(matches!(
            fixture.api.chat(&missing),
            Err(ApiError::Validation(message)) if message == "role and message are required"
        ));
        assert!(matches!(
            fixture.api.chat(&request("parent", "   ")),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn upload_validation_messages() {
        assert!(matches!(
            validate_upload(None, 10),
            Err(ApiError::Validation(message)) if message == "No file selected."
        ));
        assert!(matches!(
            validate_upload(Some("notes.csv"), 10),
            Err(ApiError::Validation(message))
                if message == "Only Excel files (.xlsx/.xls) are allowed."
        ));
        assert!(matches!(
            validate_upload(Some("faq.xlsx"), MAX_UPLOAD_BYTES + 1),
            Err(ApiError::PayloadTooLarge { .. })
        ));
        assert!(matches!(validate_upload(Some("faq.xlsx"), 0), Err(ApiError::Validation(_))));
        assert_eq!(
            validate_upload(Some("../Term 2 FAQ.XLSX"), 10).ok().as_deref(),
            Some("Term_2_FAQ.XLSX")
        );
    }

    #[test]
    fn upload_replaces_active_table() {
        let fixture = fixture(vec![Rule::new("parent", "fee", "old")]);
        let bytes = workbook_bytes(vec![
            Rule::new("parent", "uniform", "new uniform"),
            Rule::new("common", "hello", "new hello"),
        ]);

        let result = fixture
            .api
            .upload(Some("new faq.xlsx"), &bytes)
            .unwrap_or_else(|err| panic!("upload failed: {err}"));
        assert_eq!(result.rows, 2);
        assert_eq!(result.stored_as, "new_faq.xlsx");
        assert_eq!(result.message, UPLOAD_SUCCESS_MESSAGE);
        assert!(!fixture.api.upload_dir().join("new_faq.xlsx").exists());

        let answer = |role: &str, message: &str| {
            fixture
                .api
                .chat(&request(role, message))
                .unwrap_or_else(|err| panic!("chat failed: {err}"))
                .answer
        };
        assert_eq!(answer("parent", "uniform"), "new uniform");
        assert_eq!(answer("parent", "fee"), FALLBACK_ANSWER);
        assert_eq!(fixture.api.dashboard().rows, 2);
        assert_eq!(fixture.api.dashboard().roles, vec!["parent".to_string(), "common".to_string()]);
    }

    #[test]
    fn failed_replace_keeps_table_and_staged_file() {
        let dir = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
        let table = FaqTable::new(vec![Rule::new("parent", "fee", "kept")]);
        let store =
            Arc::new(FaqStore::with_table(dir.path().join("missing-dir").join("faq.xlsx"), table));
        let api = FaqBotApi::new(Arc::clone(&store), dir.path().join("uploads"));
        let before = store.snapshot();

        let bytes = workbook_bytes(vec![Rule::new("parent", "bus", "new")]);
        let result = api.upload(Some("faq.xlsx"), &bytes);
        assert!(matches!(result, Err(ApiError::Replace(_))));
        assert!(Arc::ptr_eq(&before, &store.snapshot()));

        let staged = api.uploaded_file("faq.xlsx").unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(fs::read(staged).ok(), Some(bytes));
    }

    #[test]
    fn uploaded_file_rejects_traversal() {
        let fixture = fixture(Vec::new());
        assert!(matches!(fixture.api.uploaded_file("../faq.xlsx"), Err(ApiError::NotFound(_))));
        assert!(matches!(fixture.api.uploaded_file("absent.xlsx"), Err(ApiError::NotFound(_))));
        assert!(matches!(fixture.api.uploaded_file(""), Err(ApiError::NotFound(_))));
    }
}
