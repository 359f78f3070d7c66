use tracing::info;
use uuid::Uuid;

use crate::catalog::{labels, principals};
use crate::domain::Label;
use crate::error::{Error, Result};
use crate::{validate, ImageBank};

impl ImageBank {
    pub fn create_label(&mut self, owner_id: Uuid, text: &str) -> Result<Label> {
        let text = validate::label_text(text)?;
        let tx = self.catalog.write()?;
        if principals::get(&tx, owner_id)?.is_none() {
            return Err(Error::PrincipalNotFound(owner_id.to_string()));
        }
        if labels::find(&tx, owner_id, &text)?.is_some() {
            return Err(Error::Conflict(format!("label '{text}' already exists for this owner")));
        }
        let label = labels::insert(&tx, owner_id, &text)?;
        tx.commit()?;
        info!(label_id = %label.id, %owner_id, "label created");
        Ok(label)
    }

    pub fn rename_label(&mut self, id: Uuid, text: &str) -> Result<Label> {
        let text = validate::label_text(text)?;
        let tx = self.catalog.write()?;
        let label = labels::get(&tx, id)?.ok_or(Error::LabelNotFound(id))?;
        if labels::find(&tx, label.owner_id, &text)?.is_some_and(|other| other.id != id) {
            return Err(Error::Conflict(format!("label '{text}' already exists for this owner")));
        }
        labels::rename(&tx, id, &text)?;
        let renamed = labels::get(&tx, id)?.ok_or(Error::LabelNotFound(id))?;
        tx.commit()?;
        info!(label_id = %id, "label renamed");
        Ok(renamed)
    }

    /// Delete a label. Images and collections carrying it lose the tag and are
    /// otherwise untouched.
    pub fn delete_label(&mut self, id: Uuid) -> Result<()> {
        let tx = self.catalog.write()?;
        if !labels::delete(&tx, id)? {
            return Err(Error::LabelNotFound(id));
        }
        tx.commit()?;
        info!(label_id = %id, "label deleted");
        Ok(())
    }

    pub fn label(&self, id: Uuid) -> Result<Label> {
        labels::get(self.catalog.conn(), id)?.ok_or(Error::LabelNotFound(id))
    }

    /// The owner's labels ordered by text.
    pub fn labels(&self, owner_id: Uuid) -> Result<Vec<Label>> {
        labels::list_for_owner(self.catalog.conn(), owner_id)
    }
}
