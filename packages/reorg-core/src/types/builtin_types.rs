use super::error::TypeError;
use super::type_layout::TypeLayout;
use super::TypeRegistry;

/// Fixed size of the builtin `string` column: u32 length prefix plus 256 data bytes.
pub const STRING_FIELD_SIZE: usize = 260;

/// Fixed size of the builtin `blob` column: u32 length prefix plus 4092 data bytes.
///
/// Blob values are what a source stream typically stores out of line, so row
/// images carrying them may need flattening before they are buffered.
pub const BLOB_FIELD_SIZE: usize = 4096;

fn builtin_layouts() -> Vec<TypeLayout> {
    vec![
        TypeLayout::new("u8", 1, 1, true),
        TypeLayout::new("u16", 2, 2, true),
        TypeLayout::new("u32", 4, 4, true),
        TypeLayout::new("u64", 8, 8, true),
        TypeLayout::new("i32", 4, 4, true),
        TypeLayout::new("i64", 8, 8, true),
        TypeLayout::new("f32", 4, 4, true),
        TypeLayout::new("f64", 8, 8, true),
        TypeLayout::new("bool", 1, 1, true),
        TypeLayout::new("string", STRING_FIELD_SIZE, 4, false),
        TypeLayout::new("blob", BLOB_FIELD_SIZE, 4, false),
    ]
}

/// Registers all builtin column types.
///
/// # Returns
/// `Ok(())` on success, `Err(TypeError)` if any builtin is already registered.
pub fn register_builtin_types(registry: &TypeRegistry) -> Result<(), TypeError> {
    for layout in builtin_layouts() {
        registry.register(layout)?;
    }
    Ok(())
}

/// Encodes a string into the fixed-size `string` column representation.
///
/// Values longer than 256 bytes are truncated at the byte level.
pub fn encode_string(value: &str) -> [u8; STRING_FIELD_SIZE] {
    let mut out = [0u8; STRING_FIELD_SIZE];
    let bytes = value.as_bytes();
    let len = bytes.len().min(STRING_FIELD_SIZE - 4);
    out[..4].copy_from_slice(&(len as u32).to_le_bytes());
    out[4..4 + len].copy_from_slice(&bytes[..len]);
    out
}

/// Decodes the fixed-size `string` column representation.
pub fn decode_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 4 {
        return None;
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[..4]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    let data = bytes.get(4..4 + len)?;
    Some(String::from_utf8_lossy(data).into_owned())
}
