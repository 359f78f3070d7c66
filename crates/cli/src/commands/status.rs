use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use imagebank_core::config::DuplicateScope;
use imagebank_core::domain::BankStats;
use imagebank_core::ImageBank;

/// Share of images that are linked duplicates, as a percentage.
fn duplicate_ratio(stats: &BankStats) -> f64 {
    if stats.images == 0 {
        0.0
    } else {
        stats.duplicates as f64 * 100.0 / stats.images as f64
    }
}

pub fn run(bank: &ImageBank) -> Result<()> {
    let stats = bank.stats()?;
    let config = bank.config();

    let scope = match config.duplicates.scope {
        DuplicateScope::Owner => "per owner",
        DuplicateScope::Global => "global",
    };
    let storage = match &config.storage_dir {
        Some(dir) => dir.display().to_string(),
        None => "not configured".to_string(),
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("Catalog"), Cell::new("")]);
    table.add_row(vec![Cell::new("Principals"), Cell::new(stats.principals)]);
    table.add_row(vec![Cell::new("Collections"), Cell::new(stats.collections)]);
    table.add_row(vec![Cell::new("Labels"), Cell::new(stats.labels)]);
    table.add_row(vec![Cell::new("Images"), Cell::new(stats.images)]);
    table.add_row(vec![
        Cell::new("Duplicates"),
        Cell::new(format!("{} ({:.1}%)", stats.duplicates, duplicate_ratio(&stats))),
    ]);
    table.add_row(vec![Cell::new("Duplicate scope"), Cell::new(scope)]);
    table.add_row(vec![
        Cell::new("Near threshold"),
        Cell::new(format!("< {} bits", config.duplicates.near_threshold)),
    ]);
    table.add_row(vec![
        Cell::new("Database"),
        Cell::new(config.db_path.display()),
    ]);
    table.add_row(vec![Cell::new("Object storage"), Cell::new(storage)]);

    println!();
    println!("  Imagebank Status");
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(images: usize, duplicates: usize) -> BankStats {
        BankStats {
            principals: 1,
            collections: 1,
            images,
            duplicates,
            labels: 0,
        }
    }

    #[test]
    fn test_duplicate_ratio() {
        assert_eq!(duplicate_ratio(&stats(0, 0)), 0.0);
        assert_eq!(duplicate_ratio(&stats(4, 1)), 25.0);
    }
}
