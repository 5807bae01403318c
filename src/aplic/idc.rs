//! Direct delivery: per-hart interrupt delivery controls and the
//! top-pending arbitration (the domain's notifier).

use super::regctl::IdcReg;
use super::source::Sources;

/// Target register layout in direct delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectTarget {
    pub hart: u32,
    pub prio: u32,
}

impl DirectTarget {
    pub fn decode(raw: u32) -> Self {
        Self {
            hart: raw >> 18,
            prio: (raw & 0xFF).max(1),
        }
    }

    pub fn encode(self) -> u32 {
        (self.hart << 18) | (self.prio & 0xFF)
    }
}

/// Highest-priority eligible interrupt for one hart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topi {
    pub id: u32,
    pub prio: u32,
}

impl Topi {
    /// topi/claimi register value
    pub fn encode(self) -> u32 {
        (self.id << 16) | (self.prio & 0xFF)
    }
}

/// Per-hart Interrupt Delivery Control
#[derive(Debug, Clone, Default)]
pub struct Idc {
    pub idelivery: bool,
    pub iforce: bool,
    /// Priority threshold (0 = no filtering, N = only prio < N)
    pub ithreshold: u32,
}

/// Arbitration over the domain's sources for every hart
#[derive(Debug, Clone)]
pub struct Notifier {
    idcs: Vec<Idc>,
    prio_mask: u32,
}

impl Notifier {
    pub fn new(nr_harts: u32, prio_mask: u32) -> Self {
        Self {
            idcs: vec![Idc::default(); nr_harts as usize],
            prio_mask,
        }
    }

    pub fn idc(&self, hart: u32) -> Option<&Idc> {
        self.idcs.get(hart as usize)
    }

    /// Top pending interrupt for `hart`: pending, enabled, targeted at the
    /// hart and under the threshold. Ties go to the lowest source id.
    pub fn topi(&self, hart: u32, sources: &Sources) -> Option<Topi> {
        let idc = self.idc(hart)?;
        let mut best: Option<Topi> = None;
        for id in sources.pending_enabled() {
            let target = DirectTarget::decode(sources.target(id));
            if target.hart != hart {
                continue;
            }
            if best.map_or(true, |b| target.prio < b.prio) {
                best = Some(Topi {
                    id,
                    prio: target.prio,
                });
            }
        }
        let best = best?;
        if idc.ithreshold != 0 && best.prio >= idc.ithreshold {
            return None;
        }
        Some(best)
    }

    /// External interrupt line to `hart` for this domain's privilege level
    pub fn xeip(&self, hart: u32, ie: bool, sources: &Sources) -> bool {
        let Some(idc) = self.idc(hart) else {
            return false;
        };
        ie && idc.idelivery && (idc.iforce || self.topi(hart, sources).is_some())
    }

    /// claimi read: return the top interrupt and clear its pending bit in the
    /// same step. An empty claim clears iforce.
    pub fn claim(&mut self, hart: u32, sources: &mut Sources) -> u32 {
        match self.topi(hart, sources) {
            Some(top) => {
                sources.clear_pending(top.id);
                log::debug!("hart {} claimed source {} (prio {})", hart, top.id, top.prio);
                top.encode()
            }
            None => {
                if let Some(idc) = self.idcs.get_mut(hart as usize) {
                    idc.iforce = false;
                }
                0
            }
        }
    }

    /// Side-effect free IDC register read (claimi reads as topi)
    pub fn read(&self, hart: u32, reg: IdcReg, sources: &Sources) -> u32 {
        let Some(idc) = self.idc(hart) else {
            return 0;
        };
        match reg {
            IdcReg::IDelivery => idc.idelivery as u32,
            IdcReg::IForce => idc.iforce as u32,
            IdcReg::IThreshold => idc.ithreshold,
            IdcReg::Topi | IdcReg::Claimi => {
                self.topi(hart, sources).map_or(0, Topi::encode)
            }
        }
    }

    pub fn write(&mut self, hart: u32, reg: IdcReg, val: u32) {
        let prio_mask = self.prio_mask;
        let Some(idc) = self.idcs.get_mut(hart as usize) else {
            return;
        };
        match reg {
            IdcReg::IDelivery => idc.idelivery = val & 1 != 0,
            IdcReg::IForce => idc.iforce = val & 1 != 0,
            IdcReg::IThreshold => idc.ithreshold = val & prio_mask,
            // topi and claimi are read-only
            IdcReg::Topi | IdcReg::Claimi => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aplic::source::{SourceCfg, SourceMode};

    fn source(s: &mut Sources, id: u32, hart: u32, prio: u32) {
        s.set_cfg(id, SourceCfg::Mode(SourceMode::Detached));
        s.set_target(id, DirectTarget { hart, prio }.encode());
        s.set_enabled(id, true);
        s.set_pending(id);
    }

    #[test]
    fn test_topi_priority_then_lowest_id() {
        let mut s = Sources::new(32);
        let n = Notifier::new(1, 7);
        source(&mut s, 13, 0, 3);
        source(&mut s, 31, 0, 2);
        assert_eq!(n.topi(0, &s), Some(Topi { id: 31, prio: 2 }));
        source(&mut s, 20, 0, 2);
        assert_eq!(n.topi(0, &s), Some(Topi { id: 20, prio: 2 }));
    }

    #[test]
    fn test_topi_ignores_other_harts_and_disabled() {
        let mut s = Sources::new(32);
        let n = Notifier::new(2, 7);
        source(&mut s, 4, 1, 1);
        assert_eq!(n.topi(0, &s), None);
        assert_eq!(n.topi(1, &s).map(|t| t.id), Some(4));
        s.set_enabled(4, false);
        assert_eq!(n.topi(1, &s), None);
    }

    #[test]
    fn test_threshold_filters() {
        let mut s = Sources::new(32);
        let mut n = Notifier::new(1, 7);
        source(&mut s, 3, 0, 5);
        n.write(0, IdcReg::IThreshold, 3);
        assert_eq!(n.topi(0, &s), None);
        n.write(0, IdcReg::IThreshold, 6);
        assert_eq!(n.topi(0, &s).map(|t| t.id), Some(3));
        // Threshold masked to the priority width
        n.write(0, IdcReg::IThreshold, 0xFF);
        assert_eq!(n.read(0, IdcReg::IThreshold, &s), 7);
    }

    #[test]
    fn test_claim_clears_pending() {
        let mut s = Sources::new(32);
        let mut n = Notifier::new(1, 7);
        source(&mut s, 13, 0, 3);
        source(&mut s, 31, 0, 2);
        assert_eq!(n.claim(0, &mut s), (31 << 16) | 2);
        assert!(!s.is_pending(31));
        assert_eq!(n.read(0, IdcReg::Topi, &s), (13 << 16) | 3);
    }

    #[test]
    fn test_xeip_gating_and_iforce() {
        let mut s = Sources::new(32);
        let mut n = Notifier::new(1, 7);
        n.write(0, IdcReg::IForce, 1);
        assert!(!n.xeip(0, true, &s));
        n.write(0, IdcReg::IDelivery, 1);
        assert!(n.xeip(0, true, &s));
        assert!(!n.xeip(0, false, &s));
        // Empty claim drops the forced interrupt
        assert_eq!(n.claim(0, &mut s), 0);
        assert!(!n.xeip(0, true, &s));
    }

    #[test]
    fn test_direct_target_prio_zero_reads_as_one() {
        assert_eq!(DirectTarget::decode(1 << 18).prio, 1);
        assert_eq!(DirectTarget::decode((3 << 18) | 4).hart, 3);
    }
}
