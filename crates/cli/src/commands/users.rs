use anyhow::{Context, Result};
use imagebank_core::domain::NewPrincipal;
use imagebank_core::ImageBank;
use uuid::Uuid;

pub fn add(
    bank: &mut ImageBank,
    username: String,
    display_name: Option<String>,
    credential_hash: String,
) -> Result<()> {
    let display_name = display_name.unwrap_or_else(|| username.clone());
    let (principal, default) = bank.create_principal(NewPrincipal {
        username,
        display_name,
        credential_hash,
    })?;
    println!("Registered {} ({})", principal.username, principal.id);
    println!("Default collection: {}", default.id);
    Ok(())
}

/// Look up the acting principal by username.
pub fn resolve(bank: &ImageBank, username: &str) -> Result<Uuid> {
    let principal = bank
        .principal_by_username(username)
        .with_context(|| format!("unknown user '{username}'. Register with `imagebank user add`"))?;
    Ok(principal.id)
}
