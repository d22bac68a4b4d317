//! HID report descriptor for the keyboard and consumer-control reports.
//!
//! The report map is assembled through [`DescriptorBuilder`], which picks each
//! item's operand width from the value so a multi-byte operand can never be
//! written behind a one-byte prefix. [`fields`] walks a finished descriptor
//! back into report fields, which lets startup check the declared layout
//! against what the codec in `hid` actually writes.

use crate::consts::ATT_MAX_VALUE_LEN;
use crate::error::DescriptorError;
use crate::hid::{CONSUMER_REPORT_LEN, KEYBOARD_REPORT_LEN, ReportKind, consumer};

pub mod page {
    pub const GENERIC_DESKTOP: u16 = 0x01;
    pub const KEYBOARD: u16 = 0x07;
    pub const LEDS: u16 = 0x08;
    pub const CONSUMER: u16 = 0x0C;
}

pub mod usage {
    pub const KEYBOARD: u16 = 0x06; // Generic Desktop
    pub const CONSUMER_CONTROL: u16 = 0x01; // Consumer
}

/// Data bits of Input/Output/Feature main items.
pub mod flags {
    pub const DATA_ARRAY_ABS: u8 = 0x00;
    pub const CONSTANT: u8 = 0x01;
    pub const DATA_VAR_ABS: u8 = 0x02;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionKind {
    Application = 0x01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ItemType {
    Main = 0,
    Global = 1,
    Local = 2,
}

// Item tags, HID 1.11 section 6.2.2
const TAG_INPUT: u8 = 0x8;
const TAG_OUTPUT: u8 = 0x9;
const TAG_COLLECTION: u8 = 0xA;
const TAG_FEATURE: u8 = 0xB;
const TAG_END_COLLECTION: u8 = 0xC;

const TAG_USAGE_PAGE: u8 = 0x0;
const TAG_LOGICAL_MIN: u8 = 0x1;
const TAG_LOGICAL_MAX: u8 = 0x2;
const TAG_REPORT_SIZE: u8 = 0x7;
const TAG_REPORT_ID: u8 = 0x8;
const TAG_REPORT_COUNT: u8 = 0x9;

const TAG_USAGE: u8 = 0x0;
const TAG_USAGE_MIN: u8 = 0x1;
const TAG_USAGE_MAX: u8 = 0x2;

/// Item operand. Logical extents are signed in HID, everything else here is
/// unsigned, and that changes which width a value needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Unsigned(u32),
    Signed(i32),
}

impl Operand {
    fn width(self) -> usize {
        match self {
            Operand::Unsigned(v) if v <= u8::MAX as u32 => 1,
            Operand::Unsigned(v) if v <= u16::MAX as u32 => 2,
            Operand::Signed(v) if i8::try_from(v).is_ok() => 1,
            Operand::Signed(v) if i16::try_from(v).is_ok() => 2,
            _ => 4,
        }
    }

    fn le_bytes(self) -> [u8; 4] {
        match self {
            Operand::Unsigned(v) => v.to_le_bytes(),
            Operand::Signed(v) => v.to_le_bytes(),
        }
    }
}

const fn size_code(width: usize) -> u8 {
    match width {
        0 => 0,
        1 => 1,
        2 => 2,
        _ => 3,
    }
}

/// An immutable, validated report descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDescriptor {
    bytes: Vec<u8>,
}

impl ReportDescriptor {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte length of report `id` in the given direction, if declared.
    pub fn report_len(&self, id: u8, direction: Direction) -> Option<usize> {
        let bits: u32 = fields(&self.bytes)
            .iter()
            .filter(|f| f.report_id == id && f.direction == direction)
            .map(|f| f.size_bits * f.count)
            .sum();
        (bits > 0).then(|| bits.div_ceil(8) as usize)
    }
}

#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    bytes: Vec<u8>,
    depth: usize,
    report_ids: Vec<u8>,
    error: Option<DescriptorError>,
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn item(mut self, tag: u8, ty: ItemType, operand: Option<Operand>) -> Self {
        let width = operand.map_or(0, Operand::width);
        self.bytes.push(tag << 4 | (ty as u8) << 2 | size_code(width));
        if let Some(op) = operand {
            self.bytes.extend_from_slice(&op.le_bytes()[..width]);
        }
        self
    }

    fn fail(mut self, err: DescriptorError) -> Self {
        self.error.get_or_insert(err);
        self
    }

    pub fn usage_page(self, page: u16) -> Self {
        self.item(TAG_USAGE_PAGE, ItemType::Global, Some(Operand::Unsigned(page.into())))
    }

    pub fn usage(self, usage: u16) -> Self {
        self.item(TAG_USAGE, ItemType::Local, Some(Operand::Unsigned(usage.into())))
    }

    pub fn usage_min(self, usage: u16) -> Self {
        self.item(TAG_USAGE_MIN, ItemType::Local, Some(Operand::Unsigned(usage.into())))
    }

    pub fn usage_max(self, usage: u16) -> Self {
        self.item(TAG_USAGE_MAX, ItemType::Local, Some(Operand::Unsigned(usage.into())))
    }

    pub fn logical_min(self, value: i32) -> Self {
        self.item(TAG_LOGICAL_MIN, ItemType::Global, Some(Operand::Signed(value)))
    }

    pub fn logical_max(self, value: i32) -> Self {
        self.item(TAG_LOGICAL_MAX, ItemType::Global, Some(Operand::Signed(value)))
    }

    pub fn report_size(self, bits: u8) -> Self {
        self.item(TAG_REPORT_SIZE, ItemType::Global, Some(Operand::Unsigned(bits.into())))
    }

    pub fn report_count(self, count: u8) -> Self {
        self.item(TAG_REPORT_COUNT, ItemType::Global, Some(Operand::Unsigned(count.into())))
    }

    pub fn report_id(mut self, id: u8) -> Self {
        if id == 0 {
            return self.fail(DescriptorError::ReservedReportId);
        }
        if self.report_ids.contains(&id) {
            return self.fail(DescriptorError::DuplicateReportId(id));
        }
        self.report_ids.push(id);
        self.item(TAG_REPORT_ID, ItemType::Global, Some(Operand::Unsigned(id.into())))
    }

    pub fn input(self, data: u8) -> Self {
        self.item(TAG_INPUT, ItemType::Main, Some(Operand::Unsigned(data.into())))
    }

    pub fn output(self, data: u8) -> Self {
        self.item(TAG_OUTPUT, ItemType::Main, Some(Operand::Unsigned(data.into())))
    }

    pub fn collection(mut self, kind: CollectionKind) -> Self {
        self.depth += 1;
        self.item(TAG_COLLECTION, ItemType::Main, Some(Operand::Unsigned(kind as u32)))
    }

    pub fn end_collection(mut self) -> Self {
        if self.depth == 0 {
            return self.fail(DescriptorError::UnbalancedEnd);
        }
        self.depth -= 1;
        self.item(TAG_END_COLLECTION, ItemType::Main, None)
    }

    pub fn build(self) -> Result<ReportDescriptor, DescriptorError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.depth != 0 {
            return Err(DescriptorError::UnclosedCollection(self.depth));
        }
        if self.bytes.len() > ATT_MAX_VALUE_LEN {
            return Err(DescriptorError::TooLong(self.bytes.len()));
        }
        Ok(ReportDescriptor { bytes: self.bytes })
    }
}

/// Report ids, assigned from 1 in the order the report characteristics are
/// declared in the HID service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportIds {
    pub keyboard: Option<u8>,
    pub consumer: Option<u8>,
}

impl ReportIds {
    pub fn assign(keyboard: bool, consumer: bool) -> Self {
        let mut next = 1u8;
        let mut take = |present: bool| {
            present.then(|| {
                let id = next;
                next += 1;
                id
            })
        };
        let keyboard = take(keyboard);
        let consumer = take(consumer);
        Self { keyboard, consumer }
    }

    pub fn for_kind(&self, kind: ReportKind) -> Option<u8> {
        match kind {
            ReportKind::Keyboard => self.keyboard,
            ReportKind::Consumer => self.consumer,
            ReportKind::Battery => None,
        }
    }
}

fn keyboard_collection(b: DescriptorBuilder, id: u8) -> DescriptorBuilder {
    b.usage_page(page::GENERIC_DESKTOP)
        .usage(usage::KEYBOARD)
        .collection(CollectionKind::Application)
        .report_id(id)
        // modifier byte
        .report_size(1)
        .report_count(8)
        .usage_page(page::KEYBOARD)
        .usage_min(0xE0)
        .usage_max(0xE7)
        .logical_min(0)
        .logical_max(1)
        .input(flags::DATA_VAR_ABS)
        // reserved byte
        .report_count(1)
        .report_size(8)
        .input(flags::CONSTANT)
        // LED output report
        .report_count(5)
        .report_size(1)
        .usage_page(page::LEDS)
        .usage_min(1)
        .usage_max(5)
        .output(flags::DATA_VAR_ABS)
        .report_count(1)
        .report_size(3)
        .output(flags::CONSTANT)
        // 6 keycode slots
        .report_count(6)
        .report_size(8)
        .logical_min(0)
        .logical_max(0x65)
        .usage_page(page::KEYBOARD)
        .usage_min(0)
        .usage_max(0x65)
        .input(flags::DATA_ARRAY_ABS)
        .end_collection()
}

fn consumer_collection(b: DescriptorBuilder, id: u8) -> DescriptorBuilder {
    b.usage_page(page::CONSUMER)
        .usage(usage::CONSUMER_CONTROL)
        .collection(CollectionKind::Application)
        .report_id(id)
        .report_size(16)
        .report_count(1)
        .logical_min(1)
        .logical_max(consumer::USAGE_MAX.into())
        .usage_min(1)
        .usage_max(consumer::USAGE_MAX)
        .input(flags::DATA_ARRAY_ABS)
        .end_collection()
}

/// The report map for whichever collections have an id assigned.
pub fn report_map(ids: ReportIds) -> Result<ReportDescriptor, DescriptorError> {
    let mut b = DescriptorBuilder::new();
    if let Some(id) = ids.keyboard {
        b = keyboard_collection(b, id);
    }
    if let Some(id) = ids.consumer {
        b = consumer_collection(b, id);
    }
    let desc = b.build()?;
    verify_layout(&desc, ids)?;
    Ok(desc)
}

/// Checks every declared input report against the width the codec encodes.
pub fn verify_layout(desc: &ReportDescriptor, ids: ReportIds) -> Result<(), DescriptorError> {
    for (kind, encoded) in [
        (ReportKind::Keyboard, KEYBOARD_REPORT_LEN),
        (ReportKind::Consumer, CONSUMER_REPORT_LEN),
    ] {
        let Some(id) = ids.for_kind(kind) else {
            continue;
        };
        let declared = desc.report_len(id, Direction::Input).unwrap_or(0);
        if declared != encoded {
            return Err(DescriptorError::LayoutMismatch {
                kind,
                id,
                declared,
                encoded,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Feature,
}

/// One Input/Output/Feature main item with the global state in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub report_id: u8,
    pub direction: Direction,
    pub size_bits: u32,
    pub count: u32,
    pub constant: bool,
    pub logical_min: i32,
    pub logical_max: i32,
}

/// Walks short items and collects the main data items. Long items and
/// Push/Pop are not produced by this crate and are skipped.
pub fn fields(bytes: &[u8]) -> Vec<Field> {
    let mut out = Vec::new();
    let (mut report_id, mut size_bits, mut count) = (0u8, 0u32, 0u32);
    let (mut logical_min, mut logical_max) = (0i32, 0i32);
    let mut i = 0;
    while i < bytes.len() {
        let prefix = bytes[i];
        if prefix == 0xFE {
            // long item: [0xFE, size, tag, data...]
            let len = bytes.get(i + 1).copied().unwrap_or(0) as usize;
            i += 3 + len;
            continue;
        }
        let width = [0, 1, 2, 4][(prefix & 0x03) as usize];
        let Some(data) = bytes.get(i + 1..i + 1 + width) else {
            break;
        };
        let mut raw = [0u8; 4];
        raw[..width].copy_from_slice(data);
        let unsigned = u32::from_le_bytes(raw);
        let signed = match width {
            1 => data[0] as i8 as i32,
            2 => i16::from_le_bytes([data[0], data[1]]) as i32,
            4 => unsigned as i32,
            _ => 0,
        };
        let tag = prefix >> 4;
        match (prefix >> 2) & 0x03 {
            0 => {
                let direction = match tag {
                    TAG_INPUT => Some(Direction::Input),
                    TAG_OUTPUT => Some(Direction::Output),
                    TAG_FEATURE => Some(Direction::Feature),
                    _ => None,
                };
                if let Some(direction) = direction {
                    out.push(Field {
                        report_id,
                        direction,
                        size_bits,
                        count,
                        constant: unsigned & 0x01 != 0,
                        logical_min,
                        logical_max,
                    });
                }
            }
            1 => match tag {
                TAG_REPORT_ID => report_id = unsigned as u8,
                TAG_REPORT_SIZE => size_bits = unsigned,
                TAG_REPORT_COUNT => count = unsigned,
                TAG_LOGICAL_MIN => logical_min = signed,
                TAG_LOGICAL_MAX => logical_max = signed,
                _ => {}
            },
            _ => {}
        }
        i += 1 + width;
    }
    out
}
