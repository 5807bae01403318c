//! One APLIC interrupt domain: its register file, sources and delivery
//! machinery.

use super::idc::{DirectTarget, Notifier, Topi};
use super::msi::{MsiGenerator, MsiRequest, MsiTarget};
use super::regctl::{IdcReg, Reg, DOMAINCFG_DM, DOMAINCFG_IE, DOMAINCFG_RO};
use super::source::{SourceCfg, Sources};
use crate::config::AiaConfig;
use crate::error::{AiaError, Result};
use crate::level::PrivLevel;

/// Delivery mode selected by domaincfg.DM
#[derive(Debug, Clone)]
pub enum Delivery {
    Direct(Notifier),
    Msi(MsiGenerator),
}

#[derive(Debug, Clone)]
pub struct Domain {
    level: PrivLevel,
    ie: bool,
    sources: Sources,
    delivery: Delivery,
    nr_harts: u32,
    min_prio: u32,
    prio_mask: u32,
    nr_vs_files: u32,
    imsic_nr_ids: u32,
}

impl Domain {
    pub fn new(level: PrivLevel, config: &AiaConfig) -> Self {
        Self {
            level,
            ie: false,
            sources: Sources::new(config.nr_sources),
            delivery: Delivery::Direct(Notifier::new(config.nr_harts, config.prio_mask())),
            nr_harts: config.nr_harts,
            min_prio: config.min_prio,
            prio_mask: config.prio_mask(),
            nr_vs_files: config.nr_vs_files,
            imsic_nr_ids: config.imsic_nr_ids,
        }
    }

    pub fn level(&self) -> PrivLevel {
        self.level
    }

    pub fn ie(&self) -> bool {
        self.ie
    }

    pub fn is_msi(&self) -> bool {
        matches!(self.delivery, Delivery::Msi(_))
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub(crate) fn sources_mut(&mut self) -> &mut Sources {
        &mut self.sources
    }

    pub fn decode(&self, offset: u32) -> Result<Reg> {
        Reg::decode(offset, self.sources.nr_sources(), self.nr_harts)
    }

    /// Register read without side effects
    pub fn peek(&self, reg: Reg) -> u32 {
        match reg {
            Reg::DomainCfg => {
                let mut val = DOMAINCFG_RO;
                if self.ie {
                    val |= DOMAINCFG_IE;
                }
                if self.is_msi() {
                    val |= DOMAINCFG_DM;
                }
                val
            }
            Reg::SourceCfg(id) => self.sources.cfg(id).encode(),
            Reg::SetIp(k) => self.sources.pending_word(k),
            Reg::InClrIp(k) => self.sources.rectified_word(k),
            Reg::SetIe(k) => self.sources.enabled_word(k),
            Reg::GenMsi => match &self.delivery {
                Delivery::Msi(gen) => gen.genmsi(),
                Delivery::Direct(_) => 0,
            },
            Reg::Target(id) => self.sources.target(id),
            Reg::Idc { hart, reg } => match &self.delivery {
                Delivery::Direct(notifier) => notifier.read(hart, reg, &self.sources),
                Delivery::Msi(_) => 0,
            },
            // Write-only or owned by the APLIC
            Reg::MsiAddrCfg(_)
            | Reg::SetIpNum
            | Reg::ClrIpNum
            | Reg::SetIeNum
            | Reg::ClrIe(_)
            | Reg::ClrIeNum
            | Reg::SetIpNumLe
            | Reg::SetIpNumBe => 0,
        }
    }

    /// Register read; claimi claims
    pub fn read(&mut self, reg: Reg) -> u32 {
        if let Reg::Idc {
            hart,
            reg: IdcReg::Claimi,
        } = reg
        {
            if let Delivery::Direct(notifier) = &mut self.delivery {
                return notifier.claim(hart, &mut self.sources);
            }
        }
        self.peek(reg)
    }

    /// Register write. Nothing is modified when an error is returned.
    pub fn write(&mut self, reg: Reg, val: u32) -> Result<()> {
        match reg {
            Reg::DomainCfg => self.write_domaincfg(val),
            Reg::SourceCfg(id) => {
                let cfg = SourceCfg::decode(val)?;
                self.sources.set_cfg(id, cfg);
            }
            Reg::MsiAddrCfg(_) => {}
            Reg::SetIp(k) => self.sources.for_each_in_word(k, val, |s, id| s.set_pending(id)),
            Reg::InClrIp(k) => self.sources.for_each_in_word(k, val, |s, id| s.clear_pending(id)),
            Reg::SetIe(k) => {
                self.sources
                    .for_each_in_word(k, val, |s, id| s.set_enabled(id, true))
            }
            Reg::ClrIe(k) => {
                self.sources
                    .for_each_in_word(k, val, |s, id| s.set_enabled(id, false))
            }
            Reg::SetIpNum | Reg::SetIpNumLe => self.sources.set_pending(val),
            Reg::SetIpNumBe => self.sources.set_pending(val.swap_bytes()),
            Reg::ClrIpNum => self.sources.clear_pending(val),
            Reg::SetIeNum => self.sources.set_enabled(val, true),
            Reg::ClrIeNum => self.sources.set_enabled(val, false),
            Reg::GenMsi => {
                if let Delivery::Msi(gen) = &mut self.delivery {
                    let target = MsiTarget::decode(val);
                    check_hart(target.hart, self.nr_harts)?;
                    check_eiid(target.eiid, self.imsic_nr_ids)?;
                    gen.write_genmsi(self.level, val);
                }
            }
            Reg::Target(id) => {
                if self.sources.active_mode(id).is_some() {
                    let raw = self.validate_target(id, val)?;
                    self.sources.set_target(id, raw);
                }
            }
            Reg::Idc { hart, reg } => {
                if let Delivery::Direct(notifier) = &mut self.delivery {
                    notifier.write(hart, reg, val);
                }
            }
        }
        Ok(())
    }

    fn write_domaincfg(&mut self, val: u32) {
        self.ie = val & DOMAINCFG_IE != 0;
        let msi = val & DOMAINCFG_DM != 0;
        if msi != self.is_msi() {
            log::debug!(
                "{:?} domain switches to {} delivery",
                self.level,
                if msi { "MSI" } else { "direct" }
            );
            self.delivery = if msi {
                Delivery::Msi(MsiGenerator::default())
            } else {
                Delivery::Direct(Notifier::new(self.nr_harts, self.prio_mask))
            };
            // Stored targets are in the old mode's layout
            let reset = if msi {
                0
            } else {
                DirectTarget { hart: 0, prio: 1 }.encode()
            };
            self.sources.reset_targets(reset);
            self.sources.set_level_tracking(!msi);
        }
    }

    /// Check a target value against the current delivery mode and return the
    /// value to store
    fn validate_target(&self, id: u32, val: u32) -> Result<u32> {
        match self.delivery {
            Delivery::Direct(_) => {
                let mut target = DirectTarget {
                    hart: val >> 18,
                    prio: val & 0xFF,
                };
                check_hart(target.hart, self.nr_harts)?;
                if target.prio > self.min_prio {
                    return Err(AiaError::InvalidPriority {
                        prio: target.prio,
                        min_prio: self.min_prio,
                    });
                }
                if target.prio == 0 {
                    log::warn!("source {}: priority 0 stored as 1", id);
                    target.prio = 1;
                }
                Ok(target.encode())
            }
            Delivery::Msi(_) => {
                let target = MsiTarget::decode(val);
                check_hart(target.hart, self.nr_harts)?;
                if target.guest != 0 {
                    if self.level == PrivLevel::Machine {
                        return Err(AiaError::GuestOnMachineLevel);
                    }
                    if target.guest > self.nr_vs_files {
                        return Err(AiaError::InvalidGuest {
                            guest: target.guest,
                            nr_vs_files: self.nr_vs_files,
                        });
                    }
                }
                check_eiid(target.eiid, self.imsic_nr_ids)?;
                Ok(target.encode())
            }
        }
    }

    pub fn set_sourcecfg(&mut self, id: u32, cfg: SourceCfg) {
        self.sources.set_cfg(id, cfg);
    }

    pub fn topi(&self, hart: u32) -> Option<Topi> {
        match &self.delivery {
            Delivery::Direct(notifier) => notifier.topi(hart, &self.sources),
            Delivery::Msi(_) => None,
        }
    }

    /// Direct-mode interrupt output toward `hart`
    pub fn xeip(&self, hart: u32) -> bool {
        match &self.delivery {
            Delivery::Direct(notifier) => notifier.xeip(hart, self.ie, &self.sources),
            Delivery::Msi(_) => false,
        }
    }

    /// Forward pending sources (when IE is set) and hand over every queued
    /// message
    pub fn drain_msis(&mut self) -> Vec<MsiRequest> {
        match &mut self.delivery {
            Delivery::Msi(gen) => {
                if self.ie {
                    gen.forward(self.level, &mut self.sources);
                }
                gen.drain()
            }
            Delivery::Direct(_) => Vec::new(),
        }
    }
}

fn check_hart(hart: u32, nr_harts: u32) -> Result<()> {
    if hart >= nr_harts {
        return Err(AiaError::InvalidHart { hart, nr_harts });
    }
    Ok(())
}

fn check_eiid(eiid: u32, nr_ids: u32) -> Result<()> {
    if eiid >= nr_ids {
        return Err(AiaError::InvalidIdentity { eiid, nr_ids });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aplic::regctl::{SETIENUM, SETIPNUM, SETIPNUM_BE, TARGET};

    fn domain() -> Domain {
        Domain::new(PrivLevel::Machine, &AiaConfig::default())
    }

    fn write(d: &mut Domain, offset: u32, val: u32) -> Result<()> {
        let reg = d.decode(offset)?;
        d.write(reg, val)
    }

    fn read(d: &mut Domain, offset: u32) -> u32 {
        let reg = d.decode(offset).unwrap();
        d.read(reg)
    }

    #[test]
    fn test_domaincfg_rw() {
        let mut d = domain();
        assert_eq!(read(&mut d, 0), 0x8000_0000);
        write(&mut d, 0, 0x104).unwrap();
        assert_eq!(read(&mut d, 0), 0x8000_0104);
        assert!(d.is_msi());
        write(&mut d, 0, 0).unwrap();
        assert!(!d.is_msi());
    }

    #[test]
    fn test_delivery_switch_resets_targets() {
        let mut d = domain();
        write(&mut d, 0, 0x104).unwrap();
        write(&mut d, 0x0004, 4).unwrap();
        write(&mut d, TARGET, 1 << 18 | 40).unwrap();
        assert_eq!(read(&mut d, TARGET), 1 << 18 | 40);

        // Back to direct: the EIID must not turn into a priority of 40
        write(&mut d, 0, 0x100).unwrap();
        assert_eq!(read(&mut d, TARGET), 1);
        write(&mut d, SETIENUM, 1).unwrap();
        write(&mut d, SETIPNUM, 1).unwrap();
        assert_eq!(d.topi(0), Some(Topi { id: 1, prio: 1 }));
        assert_eq!(d.topi(1), None);

        write(&mut d, 0, 0x104).unwrap();
        assert_eq!(read(&mut d, TARGET), 0);
    }

    #[test]
    fn test_target_validation_direct() {
        let mut d = domain();
        write(&mut d, 0x0004, 1).unwrap();
        let off = TARGET;
        assert_eq!(
            write(&mut d, off, 7),
            Err(AiaError::InvalidPriority {
                prio: 7,
                min_prio: 6
            })
        );
        assert_eq!(
            write(&mut d, off, 2 << 18 | 1),
            Err(AiaError::InvalidHart {
                hart: 2,
                nr_harts: 2
            })
        );
        write(&mut d, off, 1 << 18).unwrap();
        assert_eq!(read(&mut d, off), (1 << 18) | 1);
    }

    #[test]
    fn test_target_of_inactive_source_ignored() {
        let mut d = domain();
        write(&mut d, TARGET, 3).unwrap();
        assert_eq!(read(&mut d, TARGET), 0);
    }

    #[test]
    fn test_target_validation_msi() {
        let mut d = domain();
        write(&mut d, 0, 0x104).unwrap();
        write(&mut d, 0x0004, 1).unwrap();
        assert_eq!(
            write(&mut d, TARGET, 1 << 12 | 5),
            Err(AiaError::GuestOnMachineLevel)
        );
        assert_eq!(
            write(&mut d, TARGET, 64),
            Err(AiaError::InvalidIdentity {
                eiid: 64,
                nr_ids: 64
            })
        );

        let mut s = Domain::new(PrivLevel::Supervisor, &AiaConfig::default());
        write(&mut s, 0, 0x104).unwrap();
        s.set_sourcecfg(1, SourceCfg::decode(1).unwrap());
        assert_eq!(
            write(&mut s, TARGET, 2 << 12 | 5),
            Err(AiaError::InvalidGuest {
                guest: 2,
                nr_vs_files: 1
            })
        );
        write(&mut s, TARGET, 1 << 12 | 5).unwrap();
        assert_eq!(read(&mut s, TARGET), 1 << 12 | 5);
    }

    #[test]
    fn test_setipnum_be_swaps() {
        let mut d = domain();
        write(&mut d, 0x0004 * 4, 1).unwrap();
        write(&mut d, SETIPNUM_BE, 4u32.swap_bytes()).unwrap();
        assert!(d.sources().is_pending(4));
        write(&mut d, SETIPNUM, 0).unwrap();
        assert_eq!(read(&mut d, 0x1C00), 1 << 4);
    }

    #[test]
    fn test_msi_mode_idc_reads_zero() {
        let mut d = domain();
        write(&mut d, 0x4000, 1).unwrap();
        assert_eq!(read(&mut d, 0x4000), 1);
        write(&mut d, 0, 0x104).unwrap();
        assert_eq!(read(&mut d, 0x4000), 0);
        write(&mut d, 0x4000, 1).unwrap();
        assert_eq!(read(&mut d, 0x4000), 0);
    }

    #[test]
    fn test_msi_forward_needs_ie() {
        let mut d = domain();
        write(&mut d, 0, 0x004).unwrap();
        write(&mut d, 0x0004 * 3, 1).unwrap();
        write(&mut d, TARGET + 4 * 2, 9).unwrap();
        write(&mut d, SETIENUM, 3).unwrap();
        write(&mut d, SETIPNUM, 3).unwrap();
        assert!(d.drain_msis().is_empty());
        assert!(d.sources().is_pending(3));
        write(&mut d, 0, 0x104).unwrap();
        let msis = d.drain_msis();
        assert_eq!(msis.len(), 1);
        assert_eq!(msis[0].eiid, 9);
        assert!(!d.sources().is_pending(3));
    }

    #[test]
    fn test_genmsi_ignored_in_direct_mode() {
        let mut d = domain();
        write(&mut d, 0x3000, 5).unwrap();
        assert_eq!(read(&mut d, 0x3000), 0);
        write(&mut d, 0, 0x004).unwrap();
        write(&mut d, 0x3000, 5).unwrap();
        assert_eq!(read(&mut d, 0x3000), 5);
        // genmsi is not gated by IE
        assert_eq!(d.drain_msis().len(), 1);
    }
}
