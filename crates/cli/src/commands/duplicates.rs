use std::collections::BTreeMap;

use anyhow::Result;
use imagebank_core::domain::ImageDuplicate;
use imagebank_core::permissions::{Action, Resource};
use imagebank_core::ImageBank;
use uuid::Uuid;

use super::{authorize, short_id};

/// Group links by their original. Links always point at a chain root, so
/// each group is one original and its direct duplicates.
fn group_by_original(links: Vec<ImageDuplicate>) -> BTreeMap<Uuid, Vec<ImageDuplicate>> {
    let mut groups: BTreeMap<Uuid, Vec<ImageDuplicate>> = BTreeMap::new();
    for link in links {
        groups.entry(link.original_id).or_default().push(link);
    }
    groups
}

fn describe(bank: &ImageBank, id: Uuid) -> String {
    match bank.image(id) {
        Ok(image) => format!("{} {}", short_id(id), image.original_filename),
        Err(_) => short_id(id),
    }
}

pub fn list(bank: &ImageBank, owner: Uuid) -> Result<()> {
    let links = bank.duplicate_links(owner)?;
    if links.is_empty() {
        println!("No duplicates found. Run `imagebank import` first.");
        return Ok(());
    }

    let groups = group_by_original(links);
    println!("{:<40} {:<8} {}", "Original", "Copies", "Duplicates");
    println!("{}", "-".repeat(80));
    for (original, members) in &groups {
        let copies: Vec<String> = members
            .iter()
            .map(|m| format!("{} [{} d={}]", describe(bank, m.image_id), m.kind, m.distance))
            .collect();
        println!(
            "{:<40} {:<8} {}",
            describe(bank, *original),
            members.len(),
            copies.join(", ")
        );
    }
    Ok(())
}

pub fn similar(bank: &ImageBank, actor: Uuid, image_id: Uuid, limit: usize) -> Result<()> {
    authorize(bank, actor, Resource::Image(image_id), Action::View)?;
    let ranked = bank.similar_images(image_id, limit)?;
    if ranked.is_empty() {
        println!("No other images to compare with.");
        return Ok(());
    }
    println!("Images most similar to {}", describe(bank, image_id));
    for hit in &ranked {
        println!("  {:>6.3}  {}", hit.similarity, describe(bank, hit.image_id));
    }
    Ok(())
}
