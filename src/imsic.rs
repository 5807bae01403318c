//! Incoming Message-Signaled Interrupt Controller (IMSIC)
//!
//! One IMSIC per hart, each holding a machine-level file, a supervisor-level
//! file and `nr_vs_files` guest files. Files receive identities through
//! their 4 KiB MMIO page (the target of APLIC MSIs) and are otherwise
//! accessed through the hart's indirect CSR channel (*iselect/*ireg, *topei).
//!
//! MMIO layout:
//!   M file of hart h:        imsic_m_base + h * 0x1000
//!   S/VS file g of hart h:   imsic_s_base + ((h << guest_bits) | g) * 0x1000
//!     +0x000: seteipnum_le
//!     +0x004: seteipnum_be

use crate::bitmap::Bitmap;
use crate::config::{bit_width, AiaConfig};
use crate::error::{AiaError, Result};
use crate::level::PrivLevel;

// Indirect register selectors (*iselect)
pub const IMSIC_EIDELIVERY: u32 = 0x70;
pub const IMSIC_EITHRESHOLD: u32 = 0x72;
pub const IMSIC_EIP0: u32 = 0x80; // eip0-eip63 (even selectors only)
pub const IMSIC_EIE0: u32 = 0xC0; // eie0-eie63 (even selectors only)

pub const IMSIC_PAGE_SIZE: u64 = 0x1000;
pub const SETEIPNUM_LE: u64 = 0x0;
pub const SETEIPNUM_BE: u64 = 0x4;

/// One interrupt file
#[derive(Debug, Clone)]
pub struct ImsicFile {
    pub eidelivery: bool,
    /// Identity threshold (0 = all identities, N = only ids < N)
    pub eithreshold: u32,
    eip: Bitmap,
    eie: Bitmap,
    threshold_mask: u32,
}

impl ImsicFile {
    pub fn new(nr_ids: u32) -> Self {
        Self {
            eidelivery: false,
            eithreshold: 0,
            eip: Bitmap::new(nr_ids as usize),
            eie: Bitmap::new(nr_ids as usize),
            threshold_mask: (1u32 << bit_width(nr_ids)) - 1,
        }
    }

    pub fn nr_ids(&self) -> u32 {
        self.eip.len() as u32
    }

    /// eip/eie slice index for a selector, if it names an implemented slice
    fn slice(&self, sel: u32, base: u32) -> Option<usize> {
        let off = sel.checked_sub(base)?;
        let idx = (off / 2) as usize;
        (off & 1 == 0 && idx < self.eip.words64()).then_some(idx)
    }

    /// Read an indirect register; None for an illegal selector
    pub fn read_indirect(&self, sel: u32) -> Option<u64> {
        match sel {
            IMSIC_EIDELIVERY => Some(self.eidelivery as u64),
            IMSIC_EITHRESHOLD => Some(self.eithreshold as u64),
            s if (IMSIC_EIP0..IMSIC_EIE0).contains(&s) => {
                self.slice(s, IMSIC_EIP0).map(|i| self.eip.word64(i))
            }
            s if (IMSIC_EIE0..IMSIC_EIE0 + 0x40).contains(&s) => {
                self.slice(s, IMSIC_EIE0).map(|i| self.eie.word64(i))
            }
            _ => None,
        }
    }

    /// Write an indirect register; None for an illegal selector
    pub fn write_indirect(&mut self, sel: u32, val: u64) -> Option<()> {
        match sel {
            IMSIC_EIDELIVERY => self.eidelivery = val & 1 != 0,
            IMSIC_EITHRESHOLD => self.eithreshold = val as u32 & self.threshold_mask,
            s if (IMSIC_EIP0..IMSIC_EIE0).contains(&s) => {
                let idx = self.slice(s, IMSIC_EIP0)?;
                // Identity 0 does not exist
                self.eip.set_word64(idx, val & if idx == 0 { !1u64 } else { u64::MAX });
            }
            s if (IMSIC_EIE0..IMSIC_EIE0 + 0x40).contains(&s) => {
                let idx = self.slice(s, IMSIC_EIE0)?;
                self.eie.set_word64(idx, val & if idx == 0 { !1u64 } else { u64::MAX });
            }
            _ => return None,
        }
        Some(())
    }

    /// Set an identity pending (seteipnum); 0 and unimplemented ids are ignored
    pub fn set_pending(&mut self, id: u32) {
        if id == 0 || id >= self.nr_ids() {
            log::trace!("ignoring seteipnum {}", id);
            return;
        }
        self.eip.set(id as usize);
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.eip.get(id as usize)
    }

    /// Lowest pending and enabled identity under the threshold, or 0
    pub fn top_pending(&self) -> u32 {
        match self.eip.first_common(&self.eie) {
            Some(id) if self.eithreshold == 0 || (id as u32) < self.eithreshold => id as u32,
            _ => 0,
        }
    }

    /// *topei value: identity in both the major and minor field
    pub fn topei(&self) -> u32 {
        let id = self.top_pending();
        (id << 16) | id
    }

    /// Claim the top interrupt: return *topei and clear its pending bit
    pub fn claim_top(&mut self) -> u32 {
        let id = self.top_pending();
        if id != 0 {
            self.eip.clear(id as usize);
        }
        (id << 16) | id
    }

    /// Interrupt line toward the hart
    pub fn xeip(&self) -> bool {
        self.eidelivery && self.top_pending() != 0
    }
}

/// Address of one interrupt file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    pub hart: u32,
    pub level: PrivLevel,
    /// 0 for the M/S file, 1..=nr_vs_files for a guest file
    pub guest: u32,
}

/// The interrupt files of one hart
#[derive(Debug, Clone)]
pub struct ImsicHart {
    pub m: ImsicFile,
    pub s: ImsicFile,
    pub vs: Vec<ImsicFile>,
}

impl ImsicHart {
    fn new(nr_ids: u32, nr_vs_files: u32) -> Self {
        Self {
            m: ImsicFile::new(nr_ids),
            s: ImsicFile::new(nr_ids),
            vs: vec![ImsicFile::new(nr_ids); nr_vs_files as usize],
        }
    }

    pub fn file(&self, level: PrivLevel, guest: u32) -> Option<&ImsicFile> {
        match (level, guest) {
            (PrivLevel::Machine, 0) => Some(&self.m),
            (PrivLevel::Machine, _) => None,
            (PrivLevel::Supervisor, 0) => Some(&self.s),
            (PrivLevel::Supervisor, g) => self.vs.get(g as usize - 1),
        }
    }

    pub fn file_mut(&mut self, level: PrivLevel, guest: u32) -> Option<&mut ImsicFile> {
        match (level, guest) {
            (PrivLevel::Machine, 0) => Some(&mut self.m),
            (PrivLevel::Machine, _) => None,
            (PrivLevel::Supervisor, 0) => Some(&mut self.s),
            (PrivLevel::Supervisor, g) => self.vs.get_mut(g as usize - 1),
        }
    }

    /// Guest external interrupt pending bits: bit g for VS file g
    pub fn hgeip(&self) -> u64 {
        self.vs
            .iter()
            .enumerate()
            .filter(|(_, f)| f.xeip())
            .fold(0, |acc, (i, _)| acc | (1u64 << (i + 1)))
    }
}

pub struct Imsic {
    harts: Vec<ImsicHart>,
    m_base: u64,
    s_base: u64,
    guest_bits: u32,
    nr_vs_files: u32,
}

impl Imsic {
    pub(crate) fn new(config: &AiaConfig) -> Self {
        Self {
            harts: (0..config.nr_harts)
                .map(|_| ImsicHart::new(config.imsic_nr_ids, config.nr_vs_files))
                .collect(),
            m_base: config.imsic_m_base,
            s_base: config.imsic_s_base,
            guest_bits: config.guest_index_bits(),
            nr_vs_files: config.nr_vs_files,
        }
    }

    pub fn hart(&self, hart: u32) -> Option<&ImsicHart> {
        self.harts.get(hart as usize)
    }

    pub fn file(&self, id: FileId) -> Option<&ImsicFile> {
        self.hart(id.hart)?.file(id.level, id.guest)
    }

    fn file_mut(&mut self, id: FileId) -> Option<&mut ImsicFile> {
        self.harts.get_mut(id.hart as usize)?.file_mut(id.level, id.guest)
    }

    /// MMIO page address of a file
    pub fn file_address(&self, id: FileId) -> u64 {
        match id.level {
            PrivLevel::Machine => self.m_base + id.hart as u64 * IMSIC_PAGE_SIZE,
            PrivLevel::Supervisor => {
                let page = ((id.hart as u64) << self.guest_bits) | id.guest as u64;
                self.s_base + page * IMSIC_PAGE_SIZE
            }
        }
    }

    /// Decode an absolute address into a file and an offset within its page
    pub fn locate(&self, addr: u64) -> Option<(FileId, u64)> {
        let nr_harts = self.harts.len() as u64;
        let offset = addr % IMSIC_PAGE_SIZE;
        if addr >= self.m_base && addr < self.m_base + nr_harts * IMSIC_PAGE_SIZE {
            let hart = ((addr - self.m_base) / IMSIC_PAGE_SIZE) as u32;
            let id = FileId {
                hart,
                level: PrivLevel::Machine,
                guest: 0,
            };
            return Some((id, offset));
        }
        let s_size = (nr_harts << self.guest_bits) * IMSIC_PAGE_SIZE;
        if addr >= self.s_base && addr < self.s_base + s_size {
            let page = (addr - self.s_base) / IMSIC_PAGE_SIZE;
            let guest = (page & ((1u64 << self.guest_bits) - 1)) as u32;
            if guest > self.nr_vs_files {
                return None;
            }
            let id = FileId {
                hart: (page >> self.guest_bits) as u32,
                level: PrivLevel::Supervisor,
                guest,
            };
            return Some((id, offset));
        }
        None
    }

    pub fn mmio_read(&self, addr: u64) -> Result<u32> {
        self.locate(addr)
            .map(|_| 0)
            .ok_or(AiaError::UnmappedAddress(addr))
    }

    pub fn mmio_write(&mut self, addr: u64, val: u32) -> Result<()> {
        let (id, offset) = self.locate(addr).ok_or(AiaError::UnmappedAddress(addr))?;
        let eiid = match offset {
            SETEIPNUM_LE => val,
            SETEIPNUM_BE => val.swap_bytes(),
            _ => return Ok(()),
        };
        if let Some(file) = self.file_mut(id) {
            log::trace!("{:?} file of hart {} guest {} <- {}", id.level, id.hart, id.guest, eiid);
            file.set_pending(eiid);
        }
        Ok(())
    }

    /// Deliver an MSI; writes no file decodes to are dropped
    pub fn deliver(&mut self, addr: u64, data: u32) {
        if self.mmio_write(addr, data).is_err() {
            log::warn!("dropping MSI {} to unmapped address {:#x}", data, addr);
        }
    }

    /// File selected by the CSR channel for (`hart`, `level`, `vgein`)
    fn select(&self, hart: u32, level: PrivLevel, vgein: u32, sel: u32) -> Result<FileId> {
        if hart as usize >= self.harts.len() {
            return Err(AiaError::InvalidHart {
                hart,
                nr_harts: self.harts.len() as u32,
            });
        }
        let legal = match level {
            PrivLevel::Machine => vgein == 0,
            PrivLevel::Supervisor => vgein <= self.nr_vs_files,
        };
        if !legal {
            return Err(AiaError::IllegalImsicAccess {
                level,
                guest: vgein,
                select: sel,
            });
        }
        Ok(FileId {
            hart,
            level,
            guest: vgein,
        })
    }

    pub fn csr_read(&self, hart: u32, level: PrivLevel, vgein: u32, sel: u32) -> Result<u64> {
        let id = self.select(hart, level, vgein, sel)?;
        self.file(id)
            .and_then(|f| f.read_indirect(sel))
            .ok_or(AiaError::IllegalImsicAccess {
                level,
                guest: vgein,
                select: sel,
            })
    }

    pub fn csr_write(
        &mut self,
        hart: u32,
        level: PrivLevel,
        vgein: u32,
        sel: u32,
        val: u64,
    ) -> Result<()> {
        let id = self.select(hart, level, vgein, sel)?;
        self.file_mut(id)
            .and_then(|f| f.write_indirect(sel, val))
            .ok_or(AiaError::IllegalImsicAccess {
                level,
                guest: vgein,
                select: sel,
            })
    }

    /// *topei write: claim the top interrupt, returning the value read before
    pub fn claim(&mut self, hart: u32, level: PrivLevel, vgein: u32) -> Result<u32> {
        let id = self.select(hart, level, vgein, 0)?;
        Ok(self.file_mut(id).map_or(0, ImsicFile::claim_top))
    }

    /// *topei read without claiming
    pub fn topei(&self, hart: u32, level: PrivLevel, vgein: u32) -> Result<u32> {
        let id = self.select(hart, level, vgein, 0)?;
        Ok(self.file(id).map_or(0, ImsicFile::topei))
    }

    /// meip/seip contribution of the M or S file of `hart`
    pub fn xeip(&self, hart: u32, level: PrivLevel) -> bool {
        self.hart(hart)
            .and_then(|h| h.file(level, 0))
            .is_some_and(ImsicFile::xeip)
    }

    pub fn hgeip(&self, hart: u32) -> u64 {
        self.hart(hart).map_or(0, ImsicHart::hgeip)
    }
}
