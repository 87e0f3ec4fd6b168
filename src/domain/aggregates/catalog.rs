//! Category and Subcategory Aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing::Offer;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Category {
    id: Uuid,
    name: String,
    description: String,
    offer: Option<Offer>,
    image_url: Option<String>,
    listed: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subcategory {
    id: Uuid,
    category_id: Uuid,
    name: String,
    description: String,
    offer: Option<Offer>,
    image_url: Option<String>,
    listed: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
}

/// Editable fields shared by both levels.
#[derive(Clone, Debug, Default)]
pub struct CatalogNodeDraft {
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub listed: bool,
}

fn clean_name(name: &str) -> Result<String, CatalogError> {
    let name = name.trim();
    if name.is_empty() { return Err(CatalogError::EmptyName); }
    Ok(name.to_string())
}

impl Category {
    pub fn create(draft: CatalogNodeDraft, now: DateTime<Utc>) -> Result<Self, CatalogError> {
        Ok(Self {
            id: Uuid::now_v7(), name: clean_name(&draft.name)?, description: draft.description.trim().to_string(),
            offer: None, image_url: draft.image_url, listed: draft.listed, deleted: false, created_at: now,
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn offer(&self) -> Option<&Offer> { self.offer.as_ref() }
    pub fn is_listed(&self) -> bool { self.listed }
    pub fn is_deleted(&self) -> bool { self.deleted }
    pub fn is_active(&self) -> bool { self.listed && !self.deleted }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn same_name(&self, other: &str) -> bool { self.name.eq_ignore_ascii_case(other.trim()) }

    pub fn update(&mut self, draft: CatalogNodeDraft) -> Result<(), CatalogError> {
        self.ensure_live()?;
        self.name = clean_name(&draft.name)?;
        self.description = draft.description.trim().to_string();
        if draft.image_url.is_some() { self.image_url = draft.image_url; }
        self.listed = draft.listed;
        Ok(())
    }

    pub fn toggle_listed(&mut self) -> Result<bool, CatalogError> {
        self.ensure_live()?;
        self.listed = !self.listed;
        Ok(self.listed)
    }

    pub fn set_offer(&mut self, offer: Offer) -> Result<(), CatalogError> {
        self.ensure_live()?;
        self.offer = Some(offer);
        Ok(())
    }

    pub fn clear_offer(&mut self) { self.offer = None; }

    pub fn soft_delete(&mut self) -> Result<(), CatalogError> {
        self.ensure_live()?;
        self.deleted = true;
        self.listed = false;
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), CatalogError> {
        if self.deleted { Err(CatalogError::Deleted(self.name.clone())) } else { Ok(()) }
    }
}

impl Subcategory {
    pub fn create(parent: &Category, draft: CatalogNodeDraft, now: DateTime<Utc>) -> Result<Self, CatalogError> {
        if parent.is_deleted() { return Err(CatalogError::Deleted(parent.name().to_string())); }
        Ok(Self {
            id: Uuid::now_v7(), category_id: parent.id(), name: clean_name(&draft.name)?,
            description: draft.description.trim().to_string(), offer: None, image_url: draft.image_url,
            listed: draft.listed, deleted: false, created_at: now,
        })
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn category_id(&self) -> Uuid { self.category_id }
    pub fn name(&self) -> &str { &self.name }
    pub fn offer(&self) -> Option<&Offer> { self.offer.as_ref() }
    pub fn is_deleted(&self) -> bool { self.deleted }
    pub fn is_active(&self) -> bool { self.listed && !self.deleted }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn same_name(&self, other: &str) -> bool { self.name.eq_ignore_ascii_case(other.trim()) }

    pub fn update(&mut self, draft: CatalogNodeDraft) -> Result<(), CatalogError> {
        self.ensure_live()?;
        self.name = clean_name(&draft.name)?;
        self.description = draft.description.trim().to_string();
        if draft.image_url.is_some() { self.image_url = draft.image_url; }
        self.listed = draft.listed;
        Ok(())
    }

    pub fn toggle_listed(&mut self) -> Result<bool, CatalogError> {
        self.ensure_live()?;
        self.listed = !self.listed;
        Ok(self.listed)
    }

    pub fn set_offer(&mut self, offer: Offer) -> Result<(), CatalogError> {
        self.ensure_live()?;
        self.offer = Some(offer);
        Ok(())
    }

    pub fn clear_offer(&mut self) { self.offer = None; }

    pub fn soft_delete(&mut self) -> Result<(), CatalogError> {
        self.ensure_live()?;
        self.deleted = true;
        self.listed = false;
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), CatalogError> {
        if self.deleted { Err(CatalogError::Deleted(self.name.clone())) } else { Ok(()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Name is required")]
    EmptyName,
    #[error("'{0}' already exists")]
    DuplicateName(String),
    #[error("'{0}' has been deleted")]
    Deleted(String),
    #[error("Subcategory does not belong to the selected category")]
    WrongParent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> CatalogNodeDraft {
        CatalogNodeDraft { name: name.into(), description: "desc".into(), image_url: None, listed: true }
    }

    #[test]
    fn test_category_lifecycle() {
        let mut c = Category::create(draft("  Men  "), Utc::now()).unwrap();
        assert_eq!(c.name(), "Men");
        assert!(c.same_name("MEN"));
        assert!(c.is_active());
        assert!(!c.toggle_listed().unwrap());
        assert!(!c.is_active());
        c.soft_delete().unwrap();
        assert!(c.is_deleted());
        assert!(matches!(c.update(draft("Women")), Err(CatalogError::Deleted(_))));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(Category::create(draft("   "), Utc::now()).unwrap_err(), CatalogError::EmptyName);
    }

    #[test]
    fn test_subcategory_needs_live_parent() {
        let mut parent = Category::create(draft("Kids"), Utc::now()).unwrap();
        let sub = Subcategory::create(&parent, draft("T-Shirts"), Utc::now()).unwrap();
        assert_eq!(sub.category_id(), parent.id());
        parent.soft_delete().unwrap();
        assert!(Subcategory::create(&parent, draft("Shorts"), Utc::now()).is_err());
    }
}
