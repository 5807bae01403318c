//! Per-source configuration, gateway rectification and the domain's
//! pending/enable bitmaps.

use crate::bitmap::Bitmap;
use crate::error::{AiaError, Result};

/// sourcecfg.D: source delegated to a child domain
pub const SOURCECFG_D: u32 = 1 << 10;
/// sourcecfg child index field (valid when D=1)
pub const SOURCECFG_CHILD_MASK: u32 = 0x3FF;
/// sourcecfg source mode field (valid when D=0)
pub const SOURCECFG_SM_MASK: u32 = 0x7;

/// Source mode (sourcecfg.SM)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceMode {
    Inactive = 0,
    Detached = 1,
    RisingEdge = 4,
    FallingEdge = 5,
    LevelHigh = 6,
    LevelLow = 7,
}

impl SourceMode {
    pub fn from_u32(v: u32) -> Result<Self> {
        match v & SOURCECFG_SM_MASK {
            0 => Ok(Self::Inactive),
            1 => Ok(Self::Detached),
            4 => Ok(Self::RisingEdge),
            5 => Ok(Self::FallingEdge),
            6 => Ok(Self::LevelHigh),
            7 => Ok(Self::LevelLow),
            other => Err(AiaError::InvalidSourceMode(other)),
        }
    }

    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }

    pub fn is_level(self) -> bool {
        matches!(self, Self::LevelHigh | Self::LevelLow)
    }

    /// Rectified input value: the line as seen by a high/rising-sensitive gateway
    pub fn rectify(self, line: bool) -> bool {
        match self {
            Self::RisingEdge | Self::LevelHigh => line,
            Self::FallingEdge | Self::LevelLow => !line,
            Self::Inactive | Self::Detached => false,
        }
    }
}

/// Decoded sourcecfg register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCfg {
    Mode(SourceMode),
    Delegated { child: u32 },
}

impl Default for SourceCfg {
    fn default() -> Self {
        Self::Mode(SourceMode::Inactive)
    }
}

impl SourceCfg {
    pub fn decode(raw: u32) -> Result<Self> {
        if raw & SOURCECFG_D != 0 {
            Ok(Self::Delegated {
                child: raw & SOURCECFG_CHILD_MASK,
            })
        } else {
            SourceMode::from_u32(raw).map(Self::Mode)
        }
    }

    pub fn encode(self) -> u32 {
        match self {
            Self::Mode(mode) => mode as u32,
            Self::Delegated { child } => SOURCECFG_D | (child & SOURCECFG_CHILD_MASK),
        }
    }

    /// Mode governing this domain's gateway, or None if the source does not
    /// belong to this domain (inactive or delegated)
    pub fn active_mode(self) -> Option<SourceMode> {
        match self {
            Self::Mode(mode) if mode.is_active() => Some(mode),
            _ => None,
        }
    }

    pub fn is_delegated(self) -> bool {
        matches!(self, Self::Delegated { .. })
    }
}

/// Edge/level rectifier for one source line
#[derive(Debug, Clone, Copy, Default)]
pub struct Gateway {
    line: bool,
}

impl Gateway {
    pub fn line(&self) -> bool {
        self.line
    }

    /// Latch a new line level. Returns true when the transition raises the
    /// rectified input (the trigger condition for edge-sensitive capture).
    pub fn sample(&mut self, mode: SourceMode, level: bool) -> bool {
        let before = mode.rectify(self.line);
        self.line = level;
        !before && mode.rectify(level)
    }

    /// Adopt the current line level without generating a trigger
    pub fn resync(&mut self, level: bool) {
        self.line = level;
    }

    pub fn rectified(&self, mode: SourceMode) -> bool {
        mode.rectify(self.line)
    }
}

/// Source state owned by one domain: configuration, gateways, targets and
/// the pending/enable bitmaps
#[derive(Debug, Clone)]
pub struct Sources {
    cfg: Vec<SourceCfg>,
    gateways: Vec<Gateway>,
    target: Vec<u32>,
    pending: Bitmap,
    enabled: Bitmap,
    /// Level-sensitive pending bits follow the rectified line (direct delivery)
    level_tracks_line: bool,
}

impl Sources {
    pub fn new(nr_sources: u32) -> Self {
        let n = nr_sources as usize;
        Self {
            cfg: vec![SourceCfg::default(); n],
            gateways: vec![Gateway::default(); n],
            target: vec![0; n],
            pending: Bitmap::new(n),
            enabled: Bitmap::new(n),
            level_tracks_line: true,
        }
    }

    pub fn nr_sources(&self) -> u32 {
        self.cfg.len() as u32
    }

    fn index(&self, id: u32) -> Option<usize> {
        let i = id as usize;
        (id != 0 && i < self.cfg.len()).then_some(i)
    }

    pub fn cfg(&self, id: u32) -> SourceCfg {
        self.index(id).map(|i| self.cfg[i]).unwrap_or_default()
    }

    pub fn active_mode(&self, id: u32) -> Option<SourceMode> {
        self.cfg(id).active_mode()
    }

    /// Replace the configuration of a source. Inactive and delegated sources
    /// lose pending, enable and target; an already captured edge survives a
    /// change between active modes, including a switch to a level mode.
    pub fn set_cfg(&mut self, id: u32, cfg: SourceCfg) {
        let Some(i) = self.index(id) else {
            return;
        };
        self.cfg[i] = cfg;
        if cfg.active_mode().is_none() {
            self.pending.clear(i);
            self.enabled.clear(i);
            self.target[i] = 0;
        }
        self.merge_line(id);
    }

    pub fn target(&self, id: u32) -> u32 {
        self.index(id).map(|i| self.target[i]).unwrap_or(0)
    }

    pub fn set_target(&mut self, id: u32, raw: u32) {
        if let Some(i) = self.index(id) {
            if self.cfg[i].active_mode().is_some() {
                self.target[i] = raw;
            }
        }
    }

    /// Reset the target of every active source to `raw`
    pub fn reset_targets(&mut self, raw: u32) {
        for i in 1..self.cfg.len() {
            if self.cfg[i].active_mode().is_some() {
                self.target[i] = raw;
            }
        }
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.get(id as usize)
    }

    pub fn is_enabled(&self, id: u32) -> bool {
        self.enabled.get(id as usize)
    }

    /// Request pending from software (setip/setipnum)
    pub fn set_pending(&mut self, id: u32) {
        let Some(mode) = self.active_mode(id) else {
            return;
        };
        if mode.is_level() && self.level_tracks_line {
            // Pending mirrors the line; software cannot raise it
            return;
        }
        self.pending.set(id as usize);
    }

    /// Clear pending (in_clrip/clripnum or a claim). A level source whose
    /// line is still asserted re-asserts immediately.
    pub fn clear_pending(&mut self, id: u32) {
        if self.active_mode(id).is_none() {
            return;
        }
        self.pending.clear(id as usize);
        self.settle(id);
    }

    pub fn set_enabled(&mut self, id: u32, enabled: bool) {
        if self.active_mode(id).is_some() {
            self.enabled.assign(id as usize, enabled);
        }
    }

    /// Physical line transition routed to this domain
    pub fn input(&mut self, id: u32, level: bool) {
        let Some(i) = self.index(id) else {
            return;
        };
        let Some(mode) = self.cfg[i].active_mode() else {
            self.gateways[i].resync(level);
            return;
        };
        let changed = self.gateways[i].line() != level;
        let triggered = self.gateways[i].sample(mode, level);
        match mode {
            SourceMode::Detached => {}
            m if m.is_level() && self.level_tracks_line => {
                if changed {
                    self.settle(id);
                }
            }
            _ => {
                if triggered {
                    self.pending.set(i);
                }
            }
        }
    }

    /// Adopt the physical line level without generating a trigger or
    /// touching pending
    pub fn resync_line(&mut self, id: u32, level: bool) {
        if let Some(i) = self.index(id) {
            self.gateways[i].resync(level);
        }
    }

    pub fn set_level_tracking(&mut self, tracks: bool) {
        self.level_tracks_line = tracks;
        for id in 1..self.nr_sources() {
            self.merge_line(id);
        }
    }

    /// Raise pending for an asserted level source without dropping a bit
    /// that is already pending. Used on configuration changes.
    fn merge_line(&mut self, id: u32) {
        let Some(i) = self.index(id) else {
            return;
        };
        if let Some(mode) = self.cfg[i].active_mode() {
            if mode.is_level() && self.level_tracks_line && self.gateways[i].rectified(mode) {
                self.pending.set(i);
            }
        }
    }

    /// Re-derive pending for level-sensitive sources in direct delivery.
    /// Only line transitions and clears replace the pending bit.
    fn settle(&mut self, id: u32) {
        let Some(i) = self.index(id) else {
            return;
        };
        if let Some(mode) = self.cfg[i].active_mode() {
            if mode.is_level() && self.level_tracks_line {
                let level = self.gateways[i].rectified(mode);
                self.pending.assign(i, level);
            }
        }
    }

    pub fn rectified(&self, id: u32) -> bool {
        match (self.index(id), self.active_mode(id)) {
            (Some(i), Some(mode)) => self.gateways[i].rectified(mode),
            _ => false,
        }
    }

    /// Ids that are pending and enabled, ascending
    pub fn pending_enabled(&self) -> Vec<u32> {
        self.pending
            .iter_ones()
            .filter(|&i| self.enabled.get(i))
            .map(|i| i as u32)
            .filter(|&id| self.active_mode(id).is_some())
            .collect()
    }

    pub fn pending_word(&self, idx: usize) -> u32 {
        self.pending.word32(idx)
    }

    pub fn enabled_word(&self, idx: usize) -> u32 {
        self.enabled.word32(idx)
    }

    pub fn rectified_word(&self, idx: usize) -> u32 {
        (0..32u32).fold(0, |acc, bit| {
            let id = idx as u32 * 32 + bit;
            if self.rectified(id) {
                acc | (1 << bit)
            } else {
                acc
            }
        })
    }

    /// Apply `f` to every source id whose bit is set in 32-bit word `idx`
    pub fn for_each_in_word(&mut self, idx: usize, val: u32, mut f: impl FnMut(&mut Self, u32)) {
        for bit in 0..32u32 {
            if val & (1 << bit) != 0 {
                f(self, idx as u32 * 32 + bit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(id: u32, mode: SourceMode) -> Sources {
        let mut s = Sources::new(32);
        s.set_cfg(id, SourceCfg::Mode(mode));
        s.set_enabled(id, true);
        s
    }

    #[test]
    fn test_sourcecfg_decode() {
        assert_eq!(
            SourceCfg::decode(0x400).unwrap(),
            SourceCfg::Delegated { child: 0 }
        );
        assert_eq!(
            SourceCfg::decode(6).unwrap(),
            SourceCfg::Mode(SourceMode::LevelHigh)
        );
        assert_eq!(SourceCfg::decode(2), Err(AiaError::InvalidSourceMode(2)));
        assert_eq!(SourceCfg::decode(0x400).unwrap().encode(), 0x400);
    }

    #[test]
    fn test_rising_edge_captured_once() {
        let mut s = table_with(5, SourceMode::RisingEdge);
        s.input(5, true);
        assert!(s.is_pending(5));
        s.input(5, false);
        // Pending survives the line going low
        assert!(s.is_pending(5));
        s.clear_pending(5);
        assert!(!s.is_pending(5));
    }

    #[test]
    fn test_falling_edge() {
        let mut s = table_with(5, SourceMode::FallingEdge);
        s.input(5, true);
        assert!(!s.is_pending(5));
        s.input(5, false);
        assert!(s.is_pending(5));
    }

    #[test]
    fn test_level_high_tracks_line() {
        let mut s = table_with(7, SourceMode::LevelHigh);
        s.input(7, true);
        assert!(s.is_pending(7));
        // Clearing while the line is high re-asserts
        s.clear_pending(7);
        assert!(s.is_pending(7));
        s.input(7, false);
        assert!(!s.is_pending(7));
        // Software cannot raise a level source
        s.set_pending(7);
        assert!(!s.is_pending(7));
    }

    #[test]
    fn test_level_low_inverts() {
        let mut s = Sources::new(32);
        s.set_cfg(3, SourceCfg::Mode(SourceMode::LevelLow));
        // Line idle low: asserted
        assert!(s.is_pending(3));
        s.input(3, true);
        assert!(!s.is_pending(3));
    }

    #[test]
    fn test_level_in_msi_mode_latches_rising() {
        let mut s = table_with(7, SourceMode::LevelHigh);
        s.set_level_tracking(false);
        s.input(7, true);
        assert!(s.is_pending(7));
        s.clear_pending(7);
        assert!(!s.is_pending(7));
    }

    #[test]
    fn test_detached_ignores_line() {
        let mut s = table_with(4, SourceMode::Detached);
        s.input(4, true);
        assert!(!s.is_pending(4));
        s.set_pending(4);
        assert!(s.is_pending(4));
    }

    #[test]
    fn test_inactive_drops_state() {
        let mut s = table_with(9, SourceMode::RisingEdge);
        s.set_target(9, 0x42);
        s.input(9, true);
        assert!(s.is_pending(9));
        s.set_cfg(9, SourceCfg::Mode(SourceMode::Inactive));
        assert!(!s.is_pending(9));
        assert!(!s.is_enabled(9));
        assert_eq!(s.target(9), 0);
        s.set_pending(9);
        assert!(!s.is_pending(9));
    }

    #[test]
    fn test_mode_change_keeps_captured_edge() {
        let mut s = table_with(9, SourceMode::RisingEdge);
        s.input(9, true);
        s.set_cfg(9, SourceCfg::Mode(SourceMode::FallingEdge));
        assert!(s.is_pending(9));
    }

    #[test]
    fn test_edge_to_level_keeps_captured_edge() {
        let mut s = table_with(5, SourceMode::RisingEdge);
        s.input(5, true);
        s.input(5, false);
        s.set_cfg(5, SourceCfg::Mode(SourceMode::LevelHigh));
        assert!(s.is_pending(5));
        // Re-arming delivery does not drop it either
        s.set_level_tracking(false);
        s.set_level_tracking(true);
        assert!(s.is_pending(5));
        // A clear with the line low re-derives from the line
        s.clear_pending(5);
        assert!(!s.is_pending(5));
    }

    #[test]
    fn test_stale_gateway_resynced_before_activation() {
        let mut s = Sources::new(32);
        // Line went high and low again while another domain owned it
        s.resync_line(6, true);
        s.resync_line(6, false);
        s.set_cfg(6, SourceCfg::Mode(SourceMode::LevelHigh));
        assert!(!s.is_pending(6));
    }

    #[test]
    fn test_source_zero_reserved() {
        let mut s = Sources::new(32);
        s.set_cfg(0, SourceCfg::Mode(SourceMode::RisingEdge));
        assert_eq!(s.cfg(0), SourceCfg::Mode(SourceMode::Inactive));
        s.set_pending(0);
        assert!(!s.is_pending(0));
    }

    #[test]
    fn test_pending_enabled_ascending() {
        let mut s = Sources::new(32);
        for id in [17, 3, 9] {
            s.set_cfg(id, SourceCfg::Mode(SourceMode::Detached));
            s.set_pending(id);
        }
        s.set_enabled(17, true);
        s.set_enabled(3, true);
        assert_eq!(s.pending_enabled(), vec![3, 17]);
    }
}
