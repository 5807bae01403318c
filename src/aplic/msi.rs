//! MSI delivery: target layout, MSI address configuration and the
//! per-domain message generator.

use super::regctl::{MMSIADDRCFG, MMSIADDRCFGH, SMSIADDRCFG, SMSIADDRCFGH};
use super::source::Sources;
use crate::config::AiaConfig;
use crate::level::PrivLevel;

/// Target register layout in MSI delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiTarget {
    pub hart: u32,
    pub guest: u32,
    pub eiid: u32,
}

impl MsiTarget {
    pub fn decode(raw: u32) -> Self {
        Self {
            hart: raw >> 18,
            guest: (raw >> 12) & 0x3F,
            eiid: raw & 0x7FF,
        }
    }

    pub fn encode(self) -> u32 {
        (self.hart << 18) | ((self.guest & 0x3F) << 12) | (self.eiid & 0x7FF)
    }
}

/// An MSI still to be addressed by the APLIC's address configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiRequest {
    pub level: PrivLevel,
    pub hart: u32,
    pub guest: u32,
    pub eiid: u32,
}

/// A message-signaled interrupt on the system bus: a 32-bit write of the
/// identity to the target file's seteipnum_le register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsiWrite {
    pub addr: u64,
    pub data: u32,
}

/// mmsiaddrcfgh.L
const MSIADDRCFGH_L: u32 = 1 << 31;
const PPN_HIGH_MASK: u32 = 0xFFF;

/// MSI target address parameters (mmsiaddrcfg/smsiaddrcfg pairs)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsiAddrCfg {
    m_ppn: u64,
    lhxs: u32,
    lhxw: u32,
    hhxs: u32,
    hhxw: u32,
    s_ppn: u64,
    s_lhxs: u32,
    locked: bool,
}

impl MsiAddrCfg {
    /// Reset values matching the IMSIC layout of `config`
    pub fn from_config(config: &AiaConfig) -> Self {
        Self {
            m_ppn: config.imsic_m_base >> 12,
            lhxs: 0,
            lhxw: config.hart_index_bits(),
            hhxs: 0,
            hhxw: 0,
            s_ppn: config.imsic_s_base >> 12,
            s_lhxs: config.guest_index_bits(),
            locked: false,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn read(&self, offset: u32) -> u32 {
        match offset {
            MMSIADDRCFG => self.m_ppn as u32,
            MMSIADDRCFGH => {
                (if self.locked { MSIADDRCFGH_L } else { 0 })
                    | (self.hhxs << 24)
                    | (self.lhxs << 20)
                    | (self.hhxw << 16)
                    | (self.lhxw << 12)
                    | ((self.m_ppn >> 32) as u32 & PPN_HIGH_MASK)
            }
            SMSIADDRCFG => self.s_ppn as u32,
            SMSIADDRCFGH => (self.s_lhxs << 20) | ((self.s_ppn >> 32) as u32 & PPN_HIGH_MASK),
            _ => 0,
        }
    }

    /// Writes are ignored once L is set
    pub fn write(&mut self, offset: u32, val: u32) {
        if self.locked {
            return;
        }
        let high = |ppn: u64| ((((val & PPN_HIGH_MASK) as u64) << 32) | (ppn & 0xFFFF_FFFF));
        match offset {
            MMSIADDRCFG => self.m_ppn = (self.m_ppn & !0xFFFF_FFFF) | val as u64,
            MMSIADDRCFGH => {
                self.m_ppn = high(self.m_ppn);
                self.lhxw = (val >> 12) & 0xF;
                self.hhxw = (val >> 16) & 0x7;
                self.lhxs = (val >> 20) & 0x7;
                self.hhxs = (val >> 24) & 0x1F;
                self.locked = val & MSIADDRCFGH_L != 0;
            }
            SMSIADDRCFG => self.s_ppn = (self.s_ppn & !0xFFFF_FFFF) | val as u64,
            SMSIADDRCFGH => {
                self.s_ppn = high(self.s_ppn);
                self.s_lhxs = (val >> 20) & 0x7;
            }
            _ => {}
        }
    }

    /// Physical address of the interrupt file a message is sent to
    pub fn address(&self, level: PrivLevel, hart: u32, guest: u32) -> u64 {
        let hart = hart as u64;
        let low = hart & ((1u64 << self.lhxw) - 1);
        let group = (hart >> self.lhxw) & ((1u64 << self.hhxw) - 1);
        let group = group << (self.hhxs + 12);
        let ppn = match level {
            PrivLevel::Machine => self.m_ppn | group | (low << self.lhxs),
            PrivLevel::Supervisor => self.s_ppn | group | (low << self.s_lhxs) | guest as u64,
        };
        ppn << 12
    }

    pub fn resolve(&self, req: MsiRequest) -> MsiWrite {
        MsiWrite {
            addr: self.address(req.level, req.hart, req.guest),
            data: req.eiid,
        }
    }
}

const GENMSI_HART_MASK: u32 = 0xFFFC_0000;
const GENMSI_EIID_MASK: u32 = 0x7FF;

/// Message generator of a domain in MSI delivery mode
#[derive(Debug, Clone, Default)]
pub struct MsiGenerator {
    genmsi: u32,
    queue: Vec<MsiRequest>,
}

impl MsiGenerator {
    /// genmsi reads back hart and identity; Busy is always clear since
    /// messages leave synchronously
    pub fn genmsi(&self) -> u32 {
        self.genmsi
    }

    pub fn write_genmsi(&mut self, level: PrivLevel, val: u32) {
        self.genmsi = val & (GENMSI_HART_MASK | GENMSI_EIID_MASK);
        self.queue.push(MsiRequest {
            level,
            hart: val >> 18,
            guest: 0,
            eiid: val & GENMSI_EIID_MASK,
        });
    }

    /// Turn every pending and enabled source into a message, clearing its
    /// pending bit
    pub fn forward(&mut self, level: PrivLevel, sources: &mut Sources) {
        for id in sources.pending_enabled() {
            let target = MsiTarget::decode(sources.target(id));
            sources.clear_pending(id);
            log::trace!(
                "source {} -> hart {} guest {} eiid {}",
                id,
                target.hart,
                target.guest,
                target.eiid
            );
            self.queue.push(MsiRequest {
                level,
                hart: target.hart,
                guest: target.guest,
                eiid: target.eiid,
            });
        }
    }

    pub fn drain(&mut self) -> Vec<MsiRequest> {
        std::mem::take(&mut self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aplic::source::{SourceCfg, SourceMode};

    #[test]
    fn test_reset_addresses_follow_imsic_layout() {
        let cfg = MsiAddrCfg::from_config(&AiaConfig {
            nr_harts: 4,
            nr_vs_files: 3,
            ..AiaConfig::default()
        });
        assert_eq!(cfg.address(PrivLevel::Machine, 0, 0), 0x2400_0000);
        assert_eq!(cfg.address(PrivLevel::Machine, 3, 0), 0x2400_3000);
        // Four pages per hart at S level: S file plus three guests
        assert_eq!(cfg.address(PrivLevel::Supervisor, 1, 0), 0x2800_4000);
        assert_eq!(cfg.address(PrivLevel::Supervisor, 1, 2), 0x2800_6000);
    }

    #[test]
    fn test_addrcfg_registers_and_lock() {
        let mut cfg = MsiAddrCfg::from_config(&AiaConfig::default());
        assert_eq!(cfg.read(MMSIADDRCFG), 0x24000);
        assert_eq!(cfg.read(MMSIADDRCFGH), 1 << 12);
        assert_eq!(cfg.read(SMSIADDRCFGH), 1 << 20);

        cfg.write(MMSIADDRCFG, 0x30000);
        assert_eq!(cfg.address(PrivLevel::Machine, 1, 0), 0x3000_1000);

        cfg.write(MMSIADDRCFGH, MSIADDRCFGH_L | (1 << 12));
        assert!(cfg.is_locked());
        cfg.write(MMSIADDRCFG, 0x40000);
        assert_eq!(cfg.read(MMSIADDRCFG), 0x30000);
    }

    #[test]
    fn test_target_layout() {
        let t = MsiTarget::decode((1 << 18) | (2 << 12) | 0x45);
        assert_eq!(
            t,
            MsiTarget {
                hart: 1,
                guest: 2,
                eiid: 0x45
            }
        );
        assert_eq!(t.encode(), (1 << 18) | (2 << 12) | 0x45);
    }

    #[test]
    fn test_forward_clears_pending_in_id_order() {
        let mut s = Sources::new(32);
        for (id, eiid) in [(9, 40), (2, 41)] {
            s.set_cfg(id, SourceCfg::Mode(SourceMode::Detached));
            s.set_target(id, MsiTarget { hart: 0, guest: 0, eiid }.encode());
            s.set_enabled(id, true);
            s.set_pending(id);
        }
        let mut gen = MsiGenerator::default();
        gen.forward(PrivLevel::Machine, &mut s);
        let eiids: Vec<u32> = gen.drain().iter().map(|r| r.eiid).collect();
        assert_eq!(eiids, vec![41, 40]);
        assert!(!s.is_pending(2));
        assert!(!s.is_pending(9));
        assert!(gen.drain().is_empty());
    }

    #[test]
    fn test_genmsi_queues_message() {
        let mut gen = MsiGenerator::default();
        gen.write_genmsi(PrivLevel::Supervisor, (1 << 18) | 0x1000 | 7);
        // Busy never reads back
        assert_eq!(gen.genmsi(), (1 << 18) | 7);
        assert_eq!(
            gen.drain(),
            vec![MsiRequest {
                level: PrivLevel::Supervisor,
                hart: 1,
                guest: 0,
                eiid: 7
            }]
        );
    }
}
