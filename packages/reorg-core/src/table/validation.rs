//! Layout validation for table schemas.

use super::field::Field;
use crate::error::DbError;

/// Validates that every field fits within the record size.
pub(crate) fn validate_record_size(fields: &[Field], record_size: usize) -> Result<(), DbError> {
    for field in fields {
        let field_end = field
            .offset
            .checked_add(field.size)
            .ok_or(DbError::CapacityOverflow {
                operation: "field bounds calculation",
            })?;

        if field_end > record_size {
            return Err(DbError::FieldExceedsRecordSize {
                field: field.name.clone(),
                offset: field.offset,
                size: field.size,
                record_size,
            });
        }
    }
    Ok(())
}

/// Validates field alignment and rejects overlapping fields.
pub(crate) fn validate_field_layout(fields: &[Field]) -> Result<(), DbError> {
    for field in fields {
        if field.align == 0 || field.offset % field.align != 0 {
            return Err(DbError::InvalidFieldLayout {
                field: field.name.clone(),
                reason: format!("offset {} not aligned to {}", field.offset, field.align),
            });
        }
    }

    let mut ranges: Vec<(usize, usize, &str)> = fields
        .iter()
        .map(|f| (f.offset, f.end_offset(), f.name.as_str()))
        .collect();
    ranges.sort_by_key(|&(start, _, _)| start);

    for pair in ranges.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(DbError::InvalidFieldLayout {
                field: pair[1].2.to_string(),
                reason: format!("overlaps field '{}'", pair[0].2),
            });
        }
    }

    Ok(())
}

/// Calculates record size as the maximum field end, rounded up to 8 bytes.
pub(crate) fn calculate_record_size(fields: &[Field]) -> Result<usize, DbError> {
    let mut max_end = 0usize;

    for field in fields {
        let field_end = field
            .offset
            .checked_add(field.size)
            .ok_or(DbError::CapacityOverflow {
                operation: "record size calculation",
            })?;

        max_end = max_end.max(field_end);
    }

    Ok(align_offset(max_end, 8))
}

/// Aligns an offset to the given alignment.
pub(crate) fn align_offset(offset: usize, align: usize) -> usize {
    if align == 0 {
        return offset;
    }
    let remainder = offset % align;
    if remainder == 0 {
        offset
    } else {
        offset + (align - remainder)
    }
}
