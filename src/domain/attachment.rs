use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct Attachment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub file_name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Metadata of an uploaded file. The bytes themselves live in file storage.
#[derive(Clone, Debug)]
pub struct NewAttachment {
    pub file_name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
}

impl NewAttachment {
    pub fn parse(
        file_name: String,
        size_bytes: i64,
        mime_type: String,
        storage_path: String,
    ) -> Result<Self, String> {
        static MIME: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[[:alnum:]][[:alnum:]!#$&^_.+-]*/[[:alnum:]][[:alnum:]!#$&^_.+-]*$").unwrap());

        if file_name.trim().is_empty() {
            return Err("Attachment file name is empty".into());
        }
        if size_bytes <= 0 {
            return Err(format!("Attachment size must be positive, got {size_bytes}"));
        }
        if !MIME.is_match(&mime_type) {
            return Err(format!("`{mime_type}` is not a valid MIME type"));
        }
        if storage_path.trim().is_empty() {
            return Err("Attachment storage path is empty".into());
        }

        Ok(Self {
            file_name: file_name.trim().to_string(),
            size_bytes,
            mime_type: mime_type.to_lowercase(),
            storage_path,
        })
    }

    pub fn into_attachment(self, campaign_id: Uuid, now: OffsetDateTime) -> Attachment {
        Attachment {
            id: Uuid::new_v4(),
            campaign_id,
            file_name: self.file_name,
            size_bytes: self.size_bytes,
            mime_type: self.mime_type,
            storage_path: self.storage_path,
            created_at: now,
        }
    }
}
