//! Schema fingerprints of configured tables.

use anyhow::Result;

use reorg_core::schema::SchemaFingerprint;
use reorg_core::table::{Field, IndexDef, RelationId, Table};
use reorg_core::types::TypeRegistry;

#[test]
fn test_fingerprint_ignores_row_contents() -> Result<()> {
    let registry = TypeRegistry::with_builtins()?;
    let u64_layout = registry.require("u64")?;
    let fields = Field::sequence([("id", &u64_layout), ("qty", &u64_layout)]);
    let mut table = Table::create("stock".to_string(), RelationId(3), fields, None, usize::MAX)?;
    table.create_index(IndexDef::new(1, "stock_pkey", &["id"], true))?;

    let before = SchemaFingerprint::of(&table);
    let image = table.build_row(&[&1u64.to_le_bytes(), &10u64.to_le_bytes()])?;
    table.copy_in(&image)?;
    assert_eq!(before, SchemaFingerprint::of(&table));

    table.create_index(IndexDef::new(2, "stock_qty", &["qty"], false))?;
    assert_ne!(before, SchemaFingerprint::of(&table));
    Ok(())
}
