//! APLIC domain register map.
//!
//! Offsets within one domain's window:
//!   0x0000: domaincfg
//!   0x0004 + 4*(i-1): sourcecfg[i]
//!   0x1BC0..0x1BCC: mmsiaddrcfg(h), smsiaddrcfg(h)  (M domain only)
//!   0x1C00 + 4k: setip[k]       0x1CDC: setipnum
//!   0x1D00 + 4k: in_clrip[k]    0x1DDC: clripnum
//!   0x1E00 + 4k: setie[k]       0x1EDC: setienum
//!   0x1F00 + 4k: clrie[k]       0x1FDC: clrienum
//!   0x2000: setipnum_le         0x2004: setipnum_be
//!   0x3000: genmsi
//!   0x3004 + 4*(i-1): target[i]
//!   0x4000 + 32*hart: IDC (idelivery, iforce, ithreshold, topi, claimi)

use crate::error::{AiaError, Result};

pub const DOMAINCFG: u32 = 0x0000;
pub const SOURCECFG: u32 = 0x0004;
pub const MMSIADDRCFG: u32 = 0x1BC0;
pub const MMSIADDRCFGH: u32 = 0x1BC4;
pub const SMSIADDRCFG: u32 = 0x1BC8;
pub const SMSIADDRCFGH: u32 = 0x1BCC;
pub const SETIP: u32 = 0x1C00;
pub const SETIPNUM: u32 = 0x1CDC;
pub const IN_CLRIP: u32 = 0x1D00;
pub const CLRIPNUM: u32 = 0x1DDC;
pub const SETIE: u32 = 0x1E00;
pub const SETIENUM: u32 = 0x1EDC;
pub const CLRIE: u32 = 0x1F00;
pub const CLRIENUM: u32 = 0x1FDC;
pub const SETIPNUM_LE: u32 = 0x2000;
pub const SETIPNUM_BE: u32 = 0x2004;
pub const GENMSI: u32 = 0x3000;
pub const TARGET: u32 = 0x3004;
pub const IDC_BASE: u32 = 0x4000;
pub const IDC_STRIDE: u32 = 0x20;

pub const IDELIVERY: u32 = 0x00;
pub const IFORCE: u32 = 0x04;
pub const ITHRESHOLD: u32 = 0x08;
pub const TOPI: u32 = 0x18;
pub const CLAIMI: u32 = 0x1C;

/// domaincfg.IE
pub const DOMAINCFG_IE: u32 = 1 << 8;
/// domaincfg.DM (MSI delivery)
pub const DOMAINCFG_DM: u32 = 1 << 2;
/// Read-only top byte of domaincfg
pub const DOMAINCFG_RO: u32 = 0x8000_0000;

/// Register within an IDC block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdcReg {
    IDelivery,
    IForce,
    IThreshold,
    Topi,
    Claimi,
}

/// Decoded domain register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    DomainCfg,
    SourceCfg(u32),
    MsiAddrCfg(u32),
    SetIp(usize),
    SetIpNum,
    InClrIp(usize),
    ClrIpNum,
    SetIe(usize),
    SetIeNum,
    ClrIe(usize),
    ClrIeNum,
    SetIpNumLe,
    SetIpNumBe,
    GenMsi,
    Target(u32),
    Idc { hart: u32, reg: IdcReg },
}

impl Reg {
    /// Decode a 32-bit aligned offset for a domain with `nr_sources` source
    /// slots and `nr_harts` IDCs
    pub fn decode(offset: u32, nr_sources: u32, nr_harts: u32) -> Result<Self> {
        let unmapped = || AiaError::UnmappedAddress(offset as u64);
        if offset & 3 != 0 {
            return Err(unmapped());
        }
        let words = nr_sources.div_ceil(32);
        let bitmap_word = |base: u32| {
            let k = (offset - base) / 4;
            (offset >= base && k < words).then_some(k as usize)
        };

        let reg = match offset {
            DOMAINCFG => Reg::DomainCfg,
            o if o >= SOURCECFG && o < SOURCECFG + 4 * (nr_sources - 1) => Reg::SourceCfg(o / 4),
            MMSIADDRCFG..=SMSIADDRCFGH => Reg::MsiAddrCfg(offset),
            SETIPNUM => Reg::SetIpNum,
            CLRIPNUM => Reg::ClrIpNum,
            SETIENUM => Reg::SetIeNum,
            CLRIENUM => Reg::ClrIeNum,
            SETIPNUM_LE => Reg::SetIpNumLe,
            SETIPNUM_BE => Reg::SetIpNumBe,
            GENMSI => Reg::GenMsi,
            SETIP..=0x1CD8 => Reg::SetIp(bitmap_word(SETIP).ok_or_else(unmapped)?),
            IN_CLRIP..=0x1DD8 => Reg::InClrIp(bitmap_word(IN_CLRIP).ok_or_else(unmapped)?),
            SETIE..=0x1ED8 => Reg::SetIe(bitmap_word(SETIE).ok_or_else(unmapped)?),
            CLRIE..=0x1FD8 => Reg::ClrIe(bitmap_word(CLRIE).ok_or_else(unmapped)?),
            o if o >= TARGET && o < TARGET + 4 * (nr_sources - 1) => {
                Reg::Target((o - GENMSI) / 4)
            }
            o if o >= IDC_BASE => {
                let hart = (o - IDC_BASE) / IDC_STRIDE;
                if hart >= nr_harts {
                    return Err(unmapped());
                }
                let reg = match (o - IDC_BASE) % IDC_STRIDE {
                    IDELIVERY => IdcReg::IDelivery,
                    IFORCE => IdcReg::IForce,
                    ITHRESHOLD => IdcReg::IThreshold,
                    TOPI => IdcReg::Topi,
                    CLAIMI => IdcReg::Claimi,
                    _ => return Err(unmapped()),
                };
                Reg::Idc { hart, reg }
            }
            _ => return Err(unmapped()),
        };
        Ok(reg)
    }
}
