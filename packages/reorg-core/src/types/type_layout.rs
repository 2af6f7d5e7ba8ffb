use super::error::TypeError;

/// Layout information for a column type.
///
/// Row images are fixed-size byte records; a column occupies exactly
/// `size` bytes at an offset that is a multiple of `align`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeLayout {
    /// Type identifier (e.g., "u64", "string")
    pub type_id: String,
    /// Size in bytes
    pub size: usize,
    /// Alignment requirement in bytes
    pub align: usize,
    /// Whether the bytes can be compared for equality without decoding
    pub pod: bool,
}

impl TypeLayout {
    /// Creates a new type layout.
    pub fn new(type_id: impl Into<String>, size: usize, align: usize, pod: bool) -> Self {
        Self {
            type_id: type_id.into(),
            size,
            align,
            pod,
        }
    }

    /// Validates that the layout is consistent.
    ///
    /// # Returns
    /// `Ok(())` if valid, `Err(TypeError)` otherwise.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.size == 0 {
            return Err(TypeError::InvalidSize {
                type_id: self.type_id.clone(),
                size: self.size,
            });
        }

        if self.align == 0 || !self.align.is_power_of_two() {
            return Err(TypeError::InvalidAlignment {
                type_id: self.type_id.clone(),
                align: self.align,
            });
        }

        if self.size % self.align != 0 {
            return Err(TypeError::SizeAlignmentMismatch {
                type_id: self.type_id.clone(),
                size: self.size,
                align: self.align,
            });
        }

        Ok(())
    }
}
