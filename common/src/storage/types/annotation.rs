use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 50;

/// A user highlight/note anchored to a character range of a resource's
/// extracted text. Cascades with its resource.
stored_object!(Annotation, "annotation", {
    resource_id: String,
    owner_id: String,
    start_offset: u32,
    end_offset: u32,
    highlighted_text: String,
    note: Option<String>,
    tags: Vec<String>,
    color: String,
    is_shared: bool,
    embedding: Option<Vec<f32>>
});

impl Annotation {
    pub fn new(
        resource_id: String,
        owner_id: String,
        start_offset: u32,
        end_offset: u32,
        highlighted_text: String,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            resource_id,
            owner_id,
            start_offset,
            end_offset,
            highlighted_text,
            note: None,
            tags: Vec::new(),
            color: "#ffff00".into(),
            is_shared: false,
            embedding: None,
        }
    }

    /// `0 ≤ start_offset < end_offset ≤ text_len`; tags bounded in count
    /// and length; `color` a 7-char `#rrggbb` hex string.
    pub fn validate(&self, text_len: u32) -> Result<(), AppError> {
        if self.start_offset >= self.end_offset {
            return Err(AppError::Validation(
                "start_offset must be less than end_offset".into(),
            ));
        }
        if self.end_offset > text_len {
            return Err(AppError::Validation(
                "end_offset must not exceed the resource's text length".into(),
            ));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(AppError::Validation(format!(
                "at most {MAX_TAGS} tags are allowed"
            )));
        }
        if self.tags.iter().any(|tag| tag.len() > MAX_TAG_LEN) {
            return Err(AppError::Validation(format!(
                "each tag must be at most {MAX_TAG_LEN} characters"
            )));
        }
        if !is_hex_color(&self.color) {
            return Err(AppError::Validation(
                "color must be a 7-character #rrggbb hex string".into(),
            ));
        }
        Ok(())
    }

    pub async fn upsert(self, db: &SurrealDbClient, text_len: u32) -> Result<Annotation, AppError> {
        self.validate(text_len)?;
        let stored: Option<Annotation> = db
            .client
            .upsert(("annotation", self.id.clone()))
            .content(self)
            .await?;
        stored.ok_or_else(|| AppError::InternalError("annotation upsert returned no row".into()))
    }

    pub async fn list_for_resource(
        db: &SurrealDbClient,
        resource_id: &str,
    ) -> Result<Vec<Annotation>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM annotation WHERE resource_id = $id ORDER BY start_offset ASC")
            .bind(("id", resource_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}
