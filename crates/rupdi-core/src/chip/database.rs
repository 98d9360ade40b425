//! Chip database for runtime loading and lookup
//!
//! The built-in tinyAVR table is embedded at compile time; additional
//! families can be loaded from RON files.

use std::fs;
use std::io;
use std::path::Path;

use super::types::ChipDescriptor;

/// Built-in chip table
const BUILTIN_RON: &str = include_str!("../../chips/tinyavr.ron");

/// Error type for chip database operations
#[derive(Debug)]
pub enum ChipDbError {
    /// I/O error reading files
    Io(io::Error),
    /// RON parsing error
    Parse(ron::error::SpannedError),
    /// Validation error
    Validation(String),
}

impl From<io::Error> for ChipDbError {
    fn from(e: io::Error) -> Self {
        ChipDbError::Io(e)
    }
}

impl From<ron::error::SpannedError> for ChipDbError {
    fn from(e: ron::error::SpannedError) -> Self {
        ChipDbError::Parse(e)
    }
}

impl std::fmt::Display for ChipDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChipDbError::Io(e) => write!(f, "I/O error: {}", e),
            ChipDbError::Parse(e) => write!(f, "Parse error: {}", e),
            ChipDbError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ChipDbError {}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
}

impl Size {
    /// Convert to bytes
    pub fn to_bytes(self) -> u32 {
        match self {
            Size::B(n) => n,
            Size::KiB(n) => n * 1024,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ChipDef {
    name: String,
    signature: Vec<u8>,
    flash: Size,
    sram: Size,
    eeprom: Size,
    #[serde(default = "default_flash_page")]
    flash_page: u16,
    #[serde(default = "default_eeprom_page")]
    eeprom_page: u8,
}

fn default_flash_page() -> u16 {
    64
}

fn default_eeprom_page() -> u8 {
    32
}

/// Family definition containing multiple chips
#[derive(Debug, Clone, serde::Deserialize)]
struct FamilyDef {
    family: String,
    prog_base: u32,
    nvm_base: u16,
    ocd_base: u16,
    chips: Vec<ChipDef>,
}

// ============================================================================
// Chip database
// ============================================================================

/// Runtime chip database
#[derive(Debug, Clone, Default)]
pub struct ChipDatabase {
    chips: Vec<ChipDescriptor>,
}

impl ChipDatabase {
    /// Create an empty chip database
    pub fn new() -> Self {
        Self { chips: Vec::new() }
    }

    /// Create a database holding the built-in tinyAVR table
    pub fn builtin() -> Result<Self, ChipDbError> {
        let mut db = Self::new();
        db.load_ron(BUILTIN_RON)?;
        Ok(db)
    }

    /// Load chip definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ChipDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load chip definitions from a RON string
    pub fn load_ron(&mut self, content: &str) -> Result<usize, ChipDbError> {
        let family: FamilyDef = ron::from_str(content)?;
        let count = family.chips.len();

        for def in family.chips {
            let signature: [u8; 3] = def.signature.as_slice().try_into().map_err(|_| {
                ChipDbError::Validation(format!(
                    "{}: signature must be 3 bytes, got {}",
                    def.name,
                    def.signature.len()
                ))
            })?;
            if def.flash_page == 0 || def.eeprom_page == 0 {
                return Err(ChipDbError::Validation(format!(
                    "{}: page sizes must be non-zero",
                    def.name
                )));
            }
            let flash_size = def.flash.to_bytes();
            if flash_size % def.flash_page as u32 != 0 {
                return Err(ChipDbError::Validation(format!(
                    "{}: flash size {} is not a multiple of the page size {}",
                    def.name, flash_size, def.flash_page
                )));
            }

            self.chips.push(ChipDescriptor {
                family: family.family.clone(),
                name: def.name,
                signature,
                flash_size,
                flash_page_size: def.flash_page,
                sram_size: def.sram.to_bytes(),
                eeprom_size: def.eeprom.to_bytes(),
                eeprom_page_size: def.eeprom_page,
                prog_base: family.prog_base,
                nvm_base: family.nvm_base,
                ocd_base: family.ocd_base,
            });
        }

        log::debug!("chipdb: loaded {} {} chips", count, family.family);
        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ChipDbError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }

    /// Get all chips in the database
    pub fn chips(&self) -> &[ChipDescriptor] {
        &self.chips
    }

    /// Get the number of chips in the database
    pub fn len(&self) -> usize {
        self.chips.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    /// Find a chip by its exact name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&ChipDescriptor> {
        self.chips.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Find chips by name (case-insensitive partial match)
    pub fn find_by_name(&self, name: &str) -> Vec<&ChipDescriptor> {
        let name_lower = name.to_lowercase();
        self.chips
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&name_lower))
            .collect()
    }

    /// Find a chip by the signature read from the target
    pub fn find_by_signature(&self, signature: &[u8]) -> Option<&ChipDescriptor> {
        self.chips.iter().find(|c| c.matches_signature(signature))
    }

    /// Iterate over all chips
    pub fn iter(&self) -> impl Iterator<Item = &ChipDescriptor> {
        self.chips.iter()
    }
}
