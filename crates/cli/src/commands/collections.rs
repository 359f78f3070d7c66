use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use imagebank_core::domain::{CollectionPatch, ImageDuplicate, Label};
use imagebank_core::permissions::{Action, Resource};
use imagebank_core::ImageBank;
use uuid::Uuid;

use super::{authorize, format_size, short_id, users};

fn label_list(labels: &[Label]) -> String {
    labels
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// "Duplicate Of" column text; `-` for an original.
fn duplicate_text(link: Option<&ImageDuplicate>) -> String {
    match link {
        Some(link) => format!("{} ({})", short_id(link.original_id), link.kind),
        None => "-".to_string(),
    }
}

pub fn list(bank: &ImageBank, owner: Uuid) -> Result<()> {
    let collections = bank.collections(owner)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID"),
        Cell::new("Name"),
        Cell::new("Images"),
        Cell::new("Labels"),
    ]);

    for collection in &collections {
        let count = bank.images_in_collection(collection.id)?.len();
        let name = if collection.is_default {
            Cell::new(&collection.name).fg(Color::Cyan)
        } else {
            Cell::new(&collection.name)
        };
        table.add_row(vec![
            Cell::new(collection.id),
            name,
            Cell::new(count),
            Cell::new(label_list(&collection.labels)),
        ]);
    }

    println!("{table}");
    Ok(())
}

pub fn add(bank: &mut ImageBank, owner: Uuid, name: &str, labels: &[String]) -> Result<()> {
    let collection = bank.create_collection(owner, name, labels)?;
    println!("Created collection {} ({})", collection.name, collection.id);
    Ok(())
}

pub fn rename(bank: &mut ImageBank, actor: Uuid, id: Uuid, name: String) -> Result<()> {
    authorize(bank, actor, Resource::Collection(id), Action::Change)?;
    let collection = bank.update_collection(
        id,
        CollectionPatch {
            name: Some(name),
            ..Default::default()
        },
    )?;
    println!("Renamed collection to {}", collection.name);
    Ok(())
}

pub fn rm(bank: &mut ImageBank, actor: Uuid, id: Uuid) -> Result<()> {
    authorize(bank, actor, Resource::Collection(id), Action::Delete)?;
    let removed = bank.delete_collection(id)?;
    println!("Removed collection {id} ({removed} images removed)");
    Ok(())
}

pub fn show(bank: &ImageBank, actor: Uuid, id: Uuid) -> Result<()> {
    authorize(bank, actor, Resource::Collection(id), Action::View)?;
    let collection = bank.collection(id)?;
    let images = bank.images_in_collection(id)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID"),
        Cell::new("File"),
        Cell::new("Type"),
        Cell::new("Size"),
        Cell::new("Labels"),
        Cell::new("Duplicate Of"),
    ]);

    for image in &images {
        let link = bank.duplicate_of(image.id)?;
        let color = if link.is_some() {
            Color::Yellow
        } else {
            Color::DarkGrey
        };
        let duplicate = Cell::new(duplicate_text(link.as_ref())).fg(color);
        table.add_row(vec![
            Cell::new(short_id(image.id)),
            Cell::new(&image.original_filename),
            Cell::new(&image.mime_type),
            Cell::new(format_size(image.size_bytes)),
            Cell::new(label_list(&image.labels)),
            duplicate,
        ]);
    }

    println!();
    println!("  {} ({} images)", collection.name, images.len());
    println!("{table}");
    Ok(())
}

pub fn share(
    bank: &mut ImageBank,
    actor: Uuid,
    collection: Uuid,
    grantee: &str,
    actions: &[Action],
) -> Result<()> {
    authorize(bank, actor, Resource::Collection(collection), Action::Change)?;
    let grantee_id = users::resolve(bank, grantee)?;
    bank.share_collection(collection, grantee_id, actions)?;
    println!("Shared {collection} with {grantee}: {actions:?}");
    Ok(())
}

pub fn revoke(bank: &mut ImageBank, actor: Uuid, collection: Uuid, grantee: &str) -> Result<()> {
    authorize(bank, actor, Resource::Collection(collection), Action::Change)?;
    let grantee_id = users::resolve(bank, grantee)?;
    bank.revoke_collection_share(collection, grantee_id)?;
    println!("Revoked {grantee}'s access to {collection}");
    Ok(())
}
