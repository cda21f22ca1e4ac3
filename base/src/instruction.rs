//! Binary and symbolic representations of instructions.
//!
//! An instruction occupies one 36-bit word.  The basic format is
//! (historic bit numbering, bit 0 being the most significant):
//!
//! | Opcode | AC     | I     | X      | Y        |
//! |--------|--------|-------|--------|----------|
//! | 0-8    | 9-12   | 13    | 14-17  | 18-35    |
//! | 9 bits | 4 bits | 1 bit | 4 bits | 18 bits  |
//!
//! `I` requests indirect addressing and `X` names an index register
//! (accumulator 1-17; 0 means no indexing).
//!
//! Input-output instructions (opcodes 700-777) use a different split
//! of the left half:
//!
//! | 7     | Device | Function | I, X, Y as above |
//! |-------|--------|----------|------------------|
//! | 0-2   | 3-9    | 10-12    | 13-35            |
//!
//! Device numbers are conventionally written as the 7-bit device
//! field shifted left by two, so that the "PI" device whose field is
//! 1 is written 004.
//!
//! On the extended-addressing processor indirect words fetched from a
//! non-zero section come in two formats (see [`IndirectWord`]).
use std::fmt::{self, Debug, Display, Formatter};

#[cfg(test)]
use test_strategy::Arbitrary;

use super::types::VirtualAddress;
use super::word::Word;

/// Opcode constants for the instructions the emulator knows by name.
pub mod opcodes {
    pub const MUUO_ZERO: u16 = 0o000;
    pub const LUUO_FIRST: u16 = 0o001;
    pub const LUUO_LAST: u16 = 0o037;
    pub const JSYS: u16 = 0o104;

    pub const MOVE: u16 = 0o200;
    pub const MOVEI: u16 = 0o201;
    pub const MOVEM: u16 = 0o202;
    pub const MOVES: u16 = 0o203;
    pub const MOVS: u16 = 0o204;
    pub const MOVSI: u16 = 0o205;
    pub const MOVN: u16 = 0o210;
    pub const MOVNI: u16 = 0o211;
    pub const EXCH: u16 = 0o250;
    pub const AOBJP: u16 = 0o252;
    pub const AOBJN: u16 = 0o253;
    pub const JRST: u16 = 0o254;
    pub const JFCL: u16 = 0o255;
    pub const XCT: u16 = 0o256;
    pub const PUSHJ: u16 = 0o260;
    pub const PUSH: u16 = 0o261;
    pub const POP: u16 = 0o262;
    pub const POPJ: u16 = 0o263;
    pub const JSR: u16 = 0o264;
    pub const JSP: u16 = 0o265;
    pub const ADD: u16 = 0o270;
    pub const ADDI: u16 = 0o271;
    pub const ADDM: u16 = 0o272;
    pub const ADDB: u16 = 0o273;
    pub const SUB: u16 = 0o274;
    pub const SUBI: u16 = 0o275;
    pub const SUBM: u16 = 0o276;
    pub const SUBB: u16 = 0o277;
    pub const CAI: u16 = 0o300;
    pub const CAM: u16 = 0o310;
    pub const JUMP: u16 = 0o320;
    pub const SKIP: u16 = 0o330;
    pub const AOJ: u16 = 0o340;
    pub const AOS: u16 = 0o350;
    pub const SOJ: u16 = 0o360;
    pub const SOS: u16 = 0o370;
    pub const SETZ: u16 = 0o400;
    pub const SETZI: u16 = 0o401;
    pub const SETZM: u16 = 0o402;
    pub const SETZB: u16 = 0o403;
    pub const XMOVEI: u16 = 0o415;
    pub const SETO: u16 = 0o474;
    pub const SETOM: u16 = 0o476;
    pub const HLL: u16 = 0o500;
    pub const HRLI: u16 = 0o505;
    pub const HRR: u16 = 0o540;
    pub const HRRI: u16 = 0o541;
    pub const HRRZ: u16 = 0o550;
    pub const HRRZI: u16 = 0o551;
    pub const HLRZ: u16 = 0o554;
    pub const RDIO: u16 = 0o712;
    pub const WRIO: u16 = 0o713;
    pub const IO_FIRST: u16 = 0o700;
}

/// The function field of an input-output instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoFunction {
    Blki = 0,
    Datai = 1,
    Blko = 2,
    Datao = 3,
    Cono = 4,
    Coni = 5,
    Consz = 6,
    Conso = 7,
}

impl IoFunction {
    fn from_bits(bits: u64) -> IoFunction {
        match bits & 7 {
            0 => IoFunction::Blki,
            1 => IoFunction::Datai,
            2 => IoFunction::Blko,
            3 => IoFunction::Datao,
            4 => IoFunction::Cono,
            5 => IoFunction::Coni,
            6 => IoFunction::Consz,
            _ => IoFunction::Conso,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            IoFunction::Blki => "BLKI",
            IoFunction::Datai => "DATAI",
            IoFunction::Blko => "BLKO",
            IoFunction::Datao => "DATAO",
            IoFunction::Cono => "CONO",
            IoFunction::Coni => "CONI",
            IoFunction::Consz => "CONSZ",
            IoFunction::Conso => "CONSO",
        }
    }
}

/// A 7-bit I/O device number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceCode(u8);

impl DeviceCode {
    pub const APR: DeviceCode = DeviceCode::from_written(0o000);
    pub const PI: DeviceCode = DeviceCode::from_written(0o004);
    pub const PAG: DeviceCode = DeviceCode::from_written(0o010);
    pub const TIM: DeviceCode = DeviceCode::from_written(0o020);
    pub const MTR: DeviceCode = DeviceCode::from_written(0o024);

    /// Build a device code from its conventional written form (the
    /// device field shifted left two places, e.g. 0o024).
    pub const fn from_written(written: u16) -> DeviceCode {
        DeviceCode(((written >> 2) & 0o177) as u8)
    }

    pub const fn from_field(field: u8) -> DeviceCode {
        DeviceCode(field & 0o177)
    }

    pub const fn field(self) -> u8 {
        self.0
    }

    pub const fn written(self) -> u16 {
        (self.0 as u16) << 2
    }

    /// The (9-bit) opcode of I/O instructions for this device, with
    /// the AC-field overlap bit removed.
    pub const fn opcode(self) -> u16 {
        0o700 | ((self.0 >> 1) as u16)
    }
}

impl Display for DeviceCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:03o}", self.written())
    }
}

impl Debug for DeviceCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "DeviceCode({self})")
    }
}

/// An instruction word.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(Word);

impl Instruction {
    pub const fn new(w: Word) -> Instruction {
        Instruction(w)
    }

    /// Assemble an instruction from its fields.  Fields wider than
    /// their slot are truncated.
    pub fn from_fields(opcode: u16, ac: u8, indirect: bool, index: u8, y: u32) -> Instruction {
        let lh: u32 = ((u32::from(opcode) & 0o777) << 9)
            | ((u32::from(ac) & 0o17) << 5)
            | (if indirect { 0o20 } else { 0 })
            | (u32::from(index) & 0o17);
        Instruction(Word::from_halves(lh, y))
    }

    /// Assemble an I/O instruction.
    pub fn io(device: DeviceCode, function: IoFunction, indirect: bool, index: u8, y: u32) -> Instruction {
        let lh: u32 = (0o7 << 15)
            | (u32::from(device.field()) << 8)
            | ((function as u32) << 5)
            | (if indirect { 0o20 } else { 0 })
            | (u32::from(index) & 0o17);
        Instruction(Word::from_halves(lh, y))
    }

    pub const fn word(self) -> Word {
        self.0
    }

    pub const fn opcode(self) -> u16 {
        self.0.field(8, 9) as u16
    }

    pub const fn ac(self) -> u8 {
        self.0.field(12, 4) as u8
    }

    pub const fn indirect(self) -> bool {
        self.0.field(13, 1) != 0
    }

    pub const fn index(self) -> u8 {
        self.0.field(17, 4) as u8
    }

    pub const fn y(self) -> u32 {
        self.0.rh()
    }

    pub const fn is_io(self) -> bool {
        self.opcode() >= opcodes::IO_FIRST
    }

    pub const fn io_device(self) -> DeviceCode {
        DeviceCode::from_field(self.0.field(9, 7) as u8)
    }

    pub fn io_function(self) -> IoFunction {
        IoFunction::from_bits(self.0.field(12, 3))
    }

    pub const fn is_luuo(self) -> bool {
        let op = self.opcode();
        op >= opcodes::LUUO_FIRST && op <= opcodes::LUUO_LAST
    }

    /// The part of the instruction that MUUO and LUUO store for the
    /// operating system: opcode, AC, I and X (that is, the left half).
    pub const fn left_half(self) -> u32 {
        self.0.lh()
    }
}

impl From<Word> for Instruction {
    fn from(w: Word) -> Instruction {
        Instruction(w)
    }
}

impl From<Instruction> for Word {
    fn from(inst: Instruction) -> Word {
        inst.0
    }
}

const CAI_NAMES: [&str; 8] = ["CAI", "CAIL", "CAIE", "CAILE", "CAIA", "CAIGE", "CAIN", "CAIG"];
const CAM_NAMES: [&str; 8] = ["CAM", "CAML", "CAME", "CAMLE", "CAMA", "CAMGE", "CAMN", "CAMG"];
const JUMP_NAMES: [&str; 8] = [
    "JUMP", "JUMPL", "JUMPE", "JUMPLE", "JUMPA", "JUMPGE", "JUMPN", "JUMPG",
];
const SKIP_NAMES: [&str; 8] = [
    "SKIP", "SKIPL", "SKIPE", "SKIPLE", "SKIPA", "SKIPGE", "SKIPN", "SKIPG",
];
const AOJ_NAMES: [&str; 8] = ["AOJ", "AOJL", "AOJE", "AOJLE", "AOJA", "AOJGE", "AOJN", "AOJG"];
const AOS_NAMES: [&str; 8] = ["AOS", "AOSL", "AOSE", "AOSLE", "AOSA", "AOSGE", "AOSN", "AOSG"];
const SOJ_NAMES: [&str; 8] = ["SOJ", "SOJL", "SOJE", "SOJLE", "SOJA", "SOJGE", "SOJN", "SOJG"];
const SOS_NAMES: [&str; 8] = ["SOS", "SOSL", "SOSE", "SOSLE", "SOSA", "SOSGE", "SOSN", "SOSG"];

/// Returns the mnemonic for opcodes the emulator knows by name.
pub fn mnemonic(opcode: u16) -> Option<&'static str> {
    let cond = usize::from(opcode & 7);
    match opcode {
        0o000 => Some("UUO00"),
        0o001..=0o037 => Some("LUUO"),
        0o104 => Some("JSYS"),
        0o200 => Some("MOVE"),
        0o201 => Some("MOVEI"),
        0o202 => Some("MOVEM"),
        0o203 => Some("MOVES"),
        0o204 => Some("MOVS"),
        0o205 => Some("MOVSI"),
        0o210 => Some("MOVN"),
        0o211 => Some("MOVNI"),
        0o250 => Some("EXCH"),
        0o252 => Some("AOBJP"),
        0o253 => Some("AOBJN"),
        0o254 => Some("JRST"),
        0o255 => Some("JFCL"),
        0o256 => Some("XCT"),
        0o260 => Some("PUSHJ"),
        0o261 => Some("PUSH"),
        0o262 => Some("POP"),
        0o263 => Some("POPJ"),
        0o264 => Some("JSR"),
        0o265 => Some("JSP"),
        0o270 => Some("ADD"),
        0o271 => Some("ADDI"),
        0o272 => Some("ADDM"),
        0o273 => Some("ADDB"),
        0o274 => Some("SUB"),
        0o275 => Some("SUBI"),
        0o276 => Some("SUBM"),
        0o277 => Some("SUBB"),
        0o300..=0o307 => Some(CAI_NAMES[cond]),
        0o310..=0o317 => Some(CAM_NAMES[cond]),
        0o320..=0o327 => Some(JUMP_NAMES[cond]),
        0o330..=0o337 => Some(SKIP_NAMES[cond]),
        0o340..=0o347 => Some(AOJ_NAMES[cond]),
        0o350..=0o357 => Some(AOS_NAMES[cond]),
        0o360..=0o367 => Some(SOJ_NAMES[cond]),
        0o370..=0o377 => Some(SOS_NAMES[cond]),
        0o400 => Some("SETZ"),
        0o401 => Some("SETZI"),
        0o402 => Some("SETZM"),
        0o403 => Some("SETZB"),
        0o415 => Some("XMOVEI"),
        0o474 => Some("SETO"),
        0o476 => Some("SETOM"),
        0o500 => Some("HLL"),
        0o505 => Some("HRLI"),
        0o540 => Some("HRR"),
        0o541 => Some("HRRI"),
        0o550 => Some("HRRZ"),
        0o551 => Some("HRRZI"),
        0o554 => Some("HLRZ"),
        0o712 => Some("RDIO"),
        0o713 => Some("WRIO"),
        _ => None,
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let at = if self.indirect() { "@" } else { "" };
        if self.is_io() && mnemonic(self.opcode()).is_none() {
            write!(
                f,
                "{} {},{}{:o}",
                self.io_function().mnemonic(),
                self.io_device(),
                at,
                self.y()
            )?;
        } else {
            match mnemonic(self.opcode()) {
                Some(name) => write!(f, "{name} ")?,
                None => write!(f, "{:03o} ", self.opcode())?,
            }
            write!(f, "{:o},{}{:o}", self.ac(), at, self.y())?;
        }
        if self.index() != 0 {
            write!(f, "({:o})", self.index())?;
        }
        Ok(())
    }
}

impl Debug for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Instruction({} = {})", self.0, self)
    }
}

/// An indirect word, as interpreted by the extended-addressing
/// processor when the word was fetched from a non-zero section.
///
/// | Bits 0-1 | Format |
/// |----------|--------|
/// | 0x       | EFIW: bit 1 = I, bits 2-5 = X, bits 6-35 = 30-bit Y |
/// | 10       | IFIW: I, X and Y in the instruction positions |
/// | 11       | illegal; causes a page failure |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndirectWord {
    /// Instruction-format indirect word; the address is local to the
    /// section from which the word was fetched.
    Local { indirect: bool, index: u8, y: u32 },
    /// Extended-format indirect word; the address is global.
    Global {
        indirect: bool,
        index: u8,
        address: VirtualAddress,
    },
    Illegal,
}

impl IndirectWord {
    /// Decode an indirect word.  Words fetched from section 0 are
    /// always instruction-format.
    pub fn decode(w: Word, fetched_from_nonzero_section: bool) -> IndirectWord {
        let ifiw = || {
            let inst = Instruction::from(w);
            IndirectWord::Local {
                indirect: inst.indirect(),
                index: inst.index(),
                y: inst.y(),
            }
        };
        if !fetched_from_nonzero_section {
            return ifiw();
        }
        match (w.bit(0), w.bit(1)) {
            (false, indirect) => IndirectWord::Global {
                indirect,
                index: w.field(5, 4) as u8,
                address: VirtualAddress::from_word(w),
            },
            (true, false) => ifiw(),
            (true, true) => IndirectWord::Illegal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn fields() {
        // MOVE 1,@100(2)
        let inst = Instruction::from_fields(opcodes::MOVE, 1, true, 2, 0o100);
        assert_eq!(inst.word(), Word::from_halves(0o200_062, 0o100));
        assert_eq!(inst.opcode(), 0o200);
        assert_eq!(inst.ac(), 1);
        assert!(inst.indirect());
        assert_eq!(inst.index(), 2);
        assert_eq!(inst.y(), 0o100);
        assert_eq!(inst.to_string(), "MOVE 1,@100(2)");
    }

    #[test]
    fn io_fields() {
        let inst = Instruction::io(DeviceCode::PI, IoFunction::Cono, false, 0, 0o2200);
        assert!(inst.is_io());
        assert_eq!(inst.io_device(), DeviceCode::PI);
        assert_eq!(inst.io_function(), IoFunction::Cono);
        assert_eq!(inst.word(), Word::from_halves(0o700_600, 0o2200));
        assert_eq!(inst.to_string(), "CONO 004,2200");
    }

    #[test]
    fn device_opcodes() {
        assert_eq!(DeviceCode::APR.opcode(), 0o700);
        assert_eq!(DeviceCode::PI.opcode(), 0o700);
        assert_eq!(DeviceCode::PAG.opcode(), 0o701);
        assert_eq!(DeviceCode::TIM.opcode(), 0o702);
        assert_eq!(DeviceCode::MTR.opcode(), 0o702);
        assert_eq!(DeviceCode::from_written(0o120).opcode(), opcodes::RDIO);
    }

    #[test]
    fn conditional_mnemonics() {
        assert_eq!(mnemonic(0o326), Some("JUMPN"));
        assert_eq!(mnemonic(0o372), Some("SOSE"));
        assert_eq!(mnemonic(0o777), None);
    }

    #[test]
    fn indirect_word_formats() {
        // In section 0, everything is an IFIW.
        let w = Word::from_halves(0o000_020, 0o1234);
        assert_eq!(
            IndirectWord::decode(w, false),
            IndirectWord::Local {
                indirect: true,
                index: 0,
                y: 0o1234
            }
        );
        // In a non-zero section, bit 0 clear means EFIW.
        let efiw = Word::from_halves(0o200_003, 0o4567);
        assert_eq!(
            IndirectWord::decode(efiw, true),
            IndirectWord::Global {
                indirect: true,
                index: 0,
                address: VirtualAddress::new(3, 0o4567)
            }
        );
        let ifiw = Word::from_halves(0o400_005, 0o10);
        assert_eq!(
            IndirectWord::decode(ifiw, true),
            IndirectWord::Local {
                indirect: false,
                index: 5,
                y: 0o10
            }
        );
        let bad = Word::from_halves(0o600_000, 0);
        assert_eq!(IndirectWord::decode(bad, true), IndirectWord::Illegal);
    }

    #[proptest]
    fn fields_survive_assembly(inst: Instruction) {
        let again = Instruction::from_fields(
            inst.opcode(),
            inst.ac(),
            inst.indirect(),
            inst.index(),
            inst.y(),
        );
        proptest::prop_assert_eq!(again, inst);
    }
}
