//! # Register Schema
//!
//! Static, per-device table of property descriptors. A schema is built once
//! through [`SchemaBuilder`], validated, and immutable afterwards.
//!
//! ## Blocks
//!
//! Properties sharing a `block_id` are fetched together by the block-read
//! fast path. A block is either declared with an explicit range or derived as
//! the smallest range covering all of its members.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::bytes::WordOrder;
use crate::constants::{MAX_NUMERIC_WORDS, REGISTER_SPACE};
use crate::error::{RegMapError, RegMapResult};
use crate::scale::Scale;

// ============================================================================
// Descriptor Enums
// ============================================================================

/// Closed set of value types a property can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Float64,
    UInt32,
    Int32,
    UInt16,
    Int16,
    Duration,
    Timestamp,
    EnumOrdinal,
    FixedString,
}

impl SemanticType {
    /// Register count used when the descriptor does not set one.
    ///
    /// `FixedString` has no default and must declare its length.
    pub fn default_length(&self) -> u16 {
        match self {
            Self::Float64 => 4,
            Self::UInt32 | Self::Int32 | Self::Timestamp => 2,
            Self::UInt16 | Self::Int16 | Self::Duration | Self::EnumOrdinal => 1,
            Self::FixedString => 0,
        }
    }

    /// Whether `length` registers is a valid width for this type.
    pub fn accepts_length(&self, length: u16) -> bool {
        match self {
            Self::Float64 => matches!(length, 1 | 2 | 4),
            Self::UInt32 | Self::Int32 => length == 2,
            Self::UInt16 | Self::Int16 => length == 1,
            Self::Duration | Self::EnumOrdinal => matches!(length, 1 | 2),
            Self::Timestamp => matches!(length, 2 | 4),
            Self::FixedString => length >= 1,
        }
    }

    /// Whether the raw value is an integer that must not be scaled.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::UInt32 | Self::Int32 | Self::UInt16 | Self::Int16 | Self::EnumOrdinal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float64 => "float64",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::Duration => "duration",
            Self::Timestamp => "timestamp",
            Self::EnumOrdinal => "enum",
            Self::FixedString => "string",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Direction a property may be accessed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    #[inline]
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Unit of the raw count behind a `Duration` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Minutes,
}

impl TimeUnit {
    /// Seconds per raw count.
    #[inline]
    pub fn seconds(&self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
        }
    }
}

// ============================================================================
// Property Descriptor
// ============================================================================

/// Declaration of one named property.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{PropertyDescriptor, Scale, SemanticType};
///
/// let temp = PropertyDescriptor::new("Temperature", SemanticType::Float64, 100)
///     .with_length(2)
///     .with_scale(Scale::per(10).unwrap())
///     .in_block("status");
///
/// assert_eq!(temp.end(), 102);
/// assert!(temp.is_readable());
/// assert!(!temp.is_writable());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    /// First register address
    pub offset: u16,
    /// Number of registers
    pub length: u16,
    pub scale: Scale,
    pub access: Access,
    pub block_id: Option<String>,
    pub word_order: WordOrder,
    /// Unit of the raw count (durations only)
    pub time_unit: TimeUnit,
    /// Origin of the raw second count (timestamps only)
    pub epoch: DateTime<Utc>,
    /// Labels by ordinal (enums only)
    pub variants: Vec<String>,
}

impl PropertyDescriptor {
    /// Read-only descriptor with the type's default length and unit scale.
    pub fn new(name: impl Into<String>, semantic_type: SemanticType, offset: u16) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            offset,
            length: semantic_type.default_length(),
            scale: Scale::ONE,
            access: Access::ReadOnly,
            block_id: None,
            word_order: WordOrder::HighFirst,
            time_unit: TimeUnit::Seconds,
            // Default for DateTime<Utc> is the Unix epoch
            epoch: DateTime::<Utc>::default(),
            variants: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn read_only(self) -> Self {
        self.with_access(Access::ReadOnly)
    }

    pub fn write_only(self) -> Self {
        self.with_access(Access::WriteOnly)
    }

    pub fn read_write(self) -> Self {
        self.with_access(Access::ReadWrite)
    }

    pub fn in_block(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    pub fn with_word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    pub fn with_epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_variants<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variants = labels.into_iter().map(Into::into).collect();
        self
    }

    /// One past the last register address.
    #[inline]
    pub fn end(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.length)
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.access.is_readable()
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.access.is_writable()
    }

    /// Label of an enum ordinal, if one is declared.
    pub fn variant_label(&self, ordinal: u32) -> Option<&str> {
        self.variants.get(ordinal as usize).map(String::as_str)
    }

    /// Ordinal of a label, compared case-insensitively.
    pub fn variant_ordinal(&self, label: &str) -> Option<u32> {
        self.variants
            .iter()
            .position(|v| v.eq_ignore_ascii_case(label))
            .and_then(|i| u32::try_from(i).ok())
    }

    fn validate(&self) -> RegMapResult<()> {
        if self.name.trim().is_empty() {
            return Err(RegMapError::schema("property name must not be empty"));
        }
        if !self.semantic_type.accepts_length(self.length) {
            return Err(RegMapError::schema(format!(
                "property '{}': length {} is invalid for {}",
                self.name, self.length, self.semantic_type
            )));
        }
        if self.semantic_type != SemanticType::FixedString
            && self.length > MAX_NUMERIC_WORDS
        {
            return Err(RegMapError::schema(format!(
                "property '{}': numeric values span at most {} registers",
                self.name, MAX_NUMERIC_WORDS
            )));
        }
        if self.end() > REGISTER_SPACE {
            return Err(RegMapError::schema(format!(
                "property '{}': range {}+{} exceeds the register space",
                self.name, self.offset, self.length
            )));
        }
        if !self.scale.is_one() && self.semantic_type != SemanticType::Float64 {
            return Err(RegMapError::schema(format!(
                "property '{}': scale {} is only allowed on float64",
                self.name, self.scale
            )));
        }
        if !self.variants.is_empty() && self.semantic_type != SemanticType::EnumOrdinal {
            return Err(RegMapError::schema(format!(
                "property '{}': variant labels are only allowed on enums",
                self.name
            )));
        }
        if self.block_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(RegMapError::schema(format!(
                "property '{}': block id must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Blocks
// ============================================================================

/// Contiguous register range fetched in one bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub offset: u16,
    pub length: u16,
    /// Schema positions of the member properties, in schema order
    pub members: Vec<usize>,
}

impl Block {
    #[inline]
    pub fn end(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.length)
    }

    /// Whether the descriptor's registers lie fully inside this block.
    pub fn contains(&self, desc: &PropertyDescriptor) -> bool {
        desc.offset >= self.offset && desc.end() <= self.end()
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Immutable, validated property table for one device type.
#[derive(Debug, Clone)]
pub struct Schema {
    device: String,
    properties: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
    blocks: Vec<Block>,
}

impl Schema {
    pub fn builder(device: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(device)
    }

    /// Device name used in logs.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn lookup(&self, name: &str) -> RegMapResult<&PropertyDescriptor> {
        self.position(name)
            .map(|i| &self.properties[i])
            .ok_or_else(|| RegMapError::not_found(name))
    }

    /// Schema position of a property.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, position: usize) -> Option<&PropertyDescriptor> {
        self.properties.get(position)
    }

    pub fn is_readable(&self, name: &str) -> RegMapResult<bool> {
        self.lookup(name).map(PropertyDescriptor::is_readable)
    }

    pub fn is_writable(&self, name: &str) -> RegMapResult<bool> {
        self.lookup(name).map(PropertyDescriptor::is_writable)
    }

    /// All properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Readable properties with their schema positions.
    pub fn readable(&self) -> impl Iterator<Item = (usize, &PropertyDescriptor)> + '_ {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, desc)| desc.is_readable())
    }

    /// Blocks ordered by start address.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Collects descriptors and block declarations, then validates them.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{PropertyDescriptor, Schema, SemanticType};
///
/// let schema = Schema::builder("boiler")
///     .property(PropertyDescriptor::new("Flow", SemanticType::Int16, 10).in_block("temps"))
///     .property(PropertyDescriptor::new("Return", SemanticType::Int16, 12).in_block("temps"))
///     .build()
///     .unwrap();
///
/// let block = schema.block("temps").unwrap();
/// assert_eq!((block.offset, block.length), (10, 3));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    device: String,
    properties: Vec<PropertyDescriptor>,
    declared: Vec<(String, u16, u16)>,
}

impl SchemaBuilder {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    pub fn property(mut self, desc: PropertyDescriptor) -> Self {
        self.properties.push(desc);
        self
    }

    pub fn properties(mut self, descs: impl IntoIterator<Item = PropertyDescriptor>) -> Self {
        self.properties.extend(descs);
        self
    }

    /// Declare an explicit block range.
    pub fn block(mut self, id: impl Into<String>, offset: u16, length: u16) -> Self {
        self.declared.push((id.into(), offset, length));
        self
    }

    pub fn build(self) -> RegMapResult<Schema> {
        let mut index = HashMap::with_capacity(self.properties.len());
        for (position, desc) in self.properties.iter().enumerate() {
            desc.validate()?;
            if index.insert(desc.name.clone(), position).is_some() {
                return Err(RegMapError::schema(format!(
                    "duplicate property name '{}'",
                    desc.name
                )));
            }
        }

        let blocks = collect_blocks(&self.properties, self.declared)?;

        Ok(Schema {
            device: self.device,
            properties: self.properties,
            index,
            blocks,
        })
    }
}

fn collect_blocks(
    properties: &[PropertyDescriptor],
    declared: Vec<(String, u16, u16)>,
) -> RegMapResult<Vec<Block>> {
    let mut blocks: Vec<Block> = Vec::with_capacity(declared.len());
    for (id, offset, length) in declared {
        if id.trim().is_empty() {
            return Err(RegMapError::schema("block id must not be empty"));
        }
        if blocks.iter().any(|b| b.id == id) {
            return Err(RegMapError::schema(format!("duplicate block '{}'", id)));
        }
        if length == 0 || u32::from(offset) + u32::from(length) > REGISTER_SPACE {
            return Err(RegMapError::schema(format!(
                "block '{}': range {}+{} is invalid",
                id, offset, length
            )));
        }
        blocks.push(Block {
            id,
            offset,
            length,
            members: Vec::new(),
        });
    }
    let declared_count = blocks.len();

    for (position, desc) in properties.iter().enumerate() {
        let Some(id) = desc.block_id.as_deref() else {
            continue;
        };
        match blocks.iter().position(|b| b.id == id) {
            Some(i) if i < declared_count => {
                if !blocks[i].contains(desc) {
                    return Err(RegMapError::schema(format!(
                        "property '{}' lies outside block '{}'",
                        desc.name, id
                    )));
                }
                blocks[i].members.push(position);
            }
            Some(i) => {
                // derived block: grow to cover the member
                let block = &mut blocks[i];
                let start = block.offset.min(desc.offset);
                let end = block.end().max(desc.end());
                block.offset = start;
                block.length = (end - u32::from(start)) as u16;
                block.members.push(position);
            }
            None => blocks.push(Block {
                id: id.to_string(),
                offset: desc.offset,
                length: desc.length,
                members: vec![position],
            }),
        }
    }

    if let Some(empty) = blocks.iter().find(|b| b.members.is_empty()) {
        return Err(RegMapError::schema(format!(
            "block '{}' has no member properties",
            empty.id
        )));
    }

    blocks.sort_by_key(|b| b.offset);
    for pair in blocks.windows(2) {
        if pair[0].end() > u32::from(pair[1].offset) {
            return Err(RegMapError::schema(format!(
                "blocks '{}' and '{}' overlap",
                pair[0].id, pair[1].id
            )));
        }
    }

    Ok(blocks)
}

// ============================================================================
// Tests
// ============================================================================
