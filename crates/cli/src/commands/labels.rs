use anyhow::Result;
use imagebank_core::permissions::{Action, Resource};
use imagebank_core::ImageBank;
use uuid::Uuid;

use super::authorize;

pub fn list(bank: &ImageBank, owner: Uuid) -> Result<()> {
    let labels = bank.labels(owner)?;
    if labels.is_empty() {
        println!("No labels yet.");
        return Ok(());
    }
    for label in &labels {
        println!("{}  {}", label.id, label.text);
    }
    Ok(())
}

pub fn add(bank: &mut ImageBank, owner: Uuid, text: &str) -> Result<()> {
    let label = bank.create_label(owner, text)?;
    println!("Created label '{}' ({})", label.text, label.id);
    Ok(())
}

pub fn rename(bank: &mut ImageBank, actor: Uuid, id: Uuid, text: &str) -> Result<()> {
    authorize(bank, actor, Resource::Label(id), Action::Change)?;
    let label = bank.rename_label(id, text)?;
    println!("Renamed label to '{}'", label.text);
    Ok(())
}

pub fn rm(bank: &mut ImageBank, actor: Uuid, id: Uuid) -> Result<()> {
    authorize(bank, actor, Resource::Label(id), Action::Delete)?;
    bank.delete_label(id)?;
    println!("Deleted label {id}");
    Ok(())
}
