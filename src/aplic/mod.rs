//! RISC-V Advanced Platform-Level Interrupt Controller (APLIC)
//!
//! Two interrupt domains: the machine-level root and one supervisor-level
//! child. Each physical source line is owned by exactly one of them: the S
//! domain when the M domain's sourcecfg delegates it, the M domain otherwise.
//!
//! Each domain delivers either directly (per-hart IDCs arbitrate and raise
//! the external interrupt line) or by MSI (pending sources turn into writes
//! to IMSIC interrupt files, collected in an outbox for the system bus).

pub mod domain;
pub mod idc;
pub mod msi;
pub mod regctl;
pub mod source;

use crate::bitmap::Bitmap;
use crate::config::AiaConfig;
use crate::error::{AiaError, Result};
use crate::level::PrivLevel;

pub use domain::{Delivery, Domain};
pub use idc::Topi;
pub use msi::{MsiAddrCfg, MsiWrite};
pub use regctl::Reg;
pub use source::{SourceCfg, SourceMode};

pub struct Aplic {
    m: Domain,
    s: Domain,
    /// Physical level of every source line
    lines: Bitmap,
    msi_cfg: MsiAddrCfg,
    /// Messages produced but not yet taken by the bus
    outbox: Vec<MsiWrite>,
}

impl Aplic {
    /// Sized from an already validated configuration
    pub(crate) fn new(config: &AiaConfig) -> Self {
        Self {
            m: Domain::new(PrivLevel::Machine, config),
            s: Domain::new(PrivLevel::Supervisor, config),
            lines: Bitmap::new(config.nr_sources as usize),
            msi_cfg: MsiAddrCfg::from_config(config),
            outbox: Vec::new(),
        }
    }

    pub fn domain(&self, level: PrivLevel) -> &Domain {
        match level {
            PrivLevel::Machine => &self.m,
            PrivLevel::Supervisor => &self.s,
        }
    }

    fn domain_mut(&mut self, level: PrivLevel) -> &mut Domain {
        match level {
            PrivLevel::Machine => &mut self.m,
            PrivLevel::Supervisor => &mut self.s,
        }
    }

    pub fn msi_cfg(&self) -> &MsiAddrCfg {
        &self.msi_cfg
    }

    /// Domain whose gateway currently receives source `id`
    pub fn owner(&self, id: u32) -> PrivLevel {
        if self.m.sources().cfg(id).is_delegated() {
            PrivLevel::Supervisor
        } else {
            PrivLevel::Machine
        }
    }

    pub fn line(&self, id: u32) -> bool {
        self.lines.get(id as usize)
    }

    /// Drive a physical source line
    pub fn set_line(&mut self, id: u32, level: bool) {
        if id == 0 || id as usize >= self.lines.len() {
            log::warn!("ignoring line change on nonexistent source {}", id);
            return;
        }
        if self.lines.get(id as usize) == level {
            return;
        }
        self.lines.assign(id as usize, level);
        let owner = self.owner(id);
        log::trace!("source {} -> {} ({:?} domain)", id, level as u8, owner);
        self.domain_mut(owner).sources_mut().input(id, level);
        self.sync();
    }

    /// Register read; a claimi read claims
    pub fn read(&mut self, level: PrivLevel, offset: u32) -> Result<u32> {
        let reg = self.domain(level).decode(offset)?;
        Ok(match reg {
            Reg::MsiAddrCfg(off) => self.read_msiaddrcfg(level, off),
            _ => self.domain_mut(level).read(reg),
        })
    }

    /// Register read without side effects
    pub fn peek(&self, level: PrivLevel, offset: u32) -> Result<u32> {
        let reg = self.domain(level).decode(offset)?;
        Ok(match reg {
            Reg::MsiAddrCfg(off) => self.read_msiaddrcfg(level, off),
            _ => self.domain(level).peek(reg),
        })
    }

    pub fn write(&mut self, level: PrivLevel, offset: u32, val: u32) -> Result<()> {
        let reg = self.domain(level).decode(offset)?;
        match reg {
            Reg::SourceCfg(id) => self.write_sourcecfg(level, id, val)?,
            Reg::MsiAddrCfg(off) => {
                if level == PrivLevel::Machine {
                    self.msi_cfg.write(off, val);
                }
            }
            _ => self.domain_mut(level).write(reg, val)?,
        }
        self.sync();
        Ok(())
    }

    fn read_msiaddrcfg(&self, level: PrivLevel, offset: u32) -> u32 {
        match level {
            PrivLevel::Machine => self.msi_cfg.read(offset),
            PrivLevel::Supervisor => 0,
        }
    }

    fn write_sourcecfg(&mut self, level: PrivLevel, id: u32, val: u32) -> Result<()> {
        let cfg = SourceCfg::decode(val)?;
        match (level, cfg) {
            // The only child domain is index 0
            (PrivLevel::Machine, SourceCfg::Delegated { child }) if child != 0 => {
                return Err(AiaError::InvalidChildIndex { id, child });
            }
            // The S domain has no children of its own
            (PrivLevel::Supervisor, SourceCfg::Delegated { child }) => {
                return Err(AiaError::InvalidChildIndex { id, child });
            }
            (PrivLevel::Machine, SourceCfg::Mode(_)) => {
                if self.s.sources().active_mode(id).is_some() {
                    return Err(AiaError::DelegationOverlap { id });
                }
            }
            (PrivLevel::Supervisor, SourceCfg::Mode(mode)) => {
                if mode.is_active() && !self.m.sources().cfg(id).is_delegated() {
                    return Err(AiaError::NotDelegated { id });
                }
            }
            (PrivLevel::Machine, SourceCfg::Delegated { .. }) => {}
        }

        // A gateway only follows the line while its domain owns the source
        let line = self.line(id);
        self.m.sources_mut().resync_line(id, line);
        self.s.sources_mut().resync_line(id, line);
        self.domain_mut(level).set_sourcecfg(id, cfg);
        Ok(())
    }

    /// Collect messages from MSI-mode domains into the outbox
    fn sync(&mut self) {
        for level in [PrivLevel::Machine, PrivLevel::Supervisor] {
            for req in self.domain_mut(level).drain_msis() {
                let msi = self.msi_cfg.resolve(req);
                log::trace!("MSI {:#x} <- {}", msi.addr, msi.data);
                self.outbox.push(msi);
            }
        }
    }

    pub fn take_msis(&mut self) -> Vec<MsiWrite> {
        std::mem::take(&mut self.outbox)
    }

    pub fn topi(&self, level: PrivLevel, hart: u32) -> Option<Topi> {
        self.domain(level).topi(hart)
    }

    /// Direct-mode external interrupt line of `level` toward `hart`
    pub fn xeip(&self, level: PrivLevel, hart: u32) -> bool {
        self.domain(level).xeip(hart)
    }
}
