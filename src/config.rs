use crate::error::{AiaError, Result};

/// Default MMIO base of the machine-level APLIC domain
pub const APLIC_M_BASE: u64 = 0x0C00_0000;
/// Default MMIO base of the supervisor-level APLIC domain
pub const APLIC_S_BASE: u64 = 0x0D00_0000;
/// Default base of the machine-level IMSIC interrupt files
pub const IMSIC_M_BASE: u64 = 0x2400_0000;
/// Default base of the supervisor-level (and guest) IMSIC interrupt files
pub const IMSIC_S_BASE: u64 = 0x2800_0000;

/// Instantiation parameters of the interrupt controller.
///
/// All state is sized from these values at construction and never reallocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiaConfig {
    /// Number of source slots, including the reserved source 0
    pub nr_sources: u32,
    /// Number of harts (IDCs per domain, IMSICs)
    pub nr_harts: u32,
    /// Numerically largest (lowest) priority a direct-mode target may carry
    pub min_prio: u32,
    /// Interrupt identities per IMSIC file, including the reserved identity 0
    pub imsic_nr_ids: u32,
    /// Guest (VS-level) interrupt files per hart
    pub nr_vs_files: u32,
    pub aplic_m_base: u64,
    pub aplic_s_base: u64,
    pub imsic_m_base: u64,
    pub imsic_s_base: u64,
}

impl Default for AiaConfig {
    fn default() -> Self {
        Self {
            nr_sources: 32,
            nr_harts: 2,
            min_prio: 6,
            imsic_nr_ids: 64,
            nr_vs_files: 1,
            aplic_m_base: APLIC_M_BASE,
            aplic_s_base: APLIC_S_BASE,
            imsic_m_base: IMSIC_M_BASE,
            imsic_s_base: IMSIC_S_BASE,
        }
    }
}

impl AiaConfig {
    pub fn validate(&self) -> Result<()> {
        if !(2..=1024).contains(&self.nr_sources) {
            return Err(AiaError::InvalidConfig("nr_sources must be in 2..=1024"));
        }
        if !(1..=16384).contains(&self.nr_harts) {
            return Err(AiaError::InvalidConfig("nr_harts must be in 1..=16384"));
        }
        if !(1..=255).contains(&self.min_prio) {
            return Err(AiaError::InvalidConfig("min_prio must be in 1..=255"));
        }
        if !(64..=2048).contains(&self.imsic_nr_ids) || self.imsic_nr_ids % 64 != 0 {
            return Err(AiaError::InvalidConfig(
                "imsic_nr_ids must be a multiple of 64 in 64..=2048",
            ));
        }
        if self.nr_vs_files > 63 {
            return Err(AiaError::InvalidConfig("nr_vs_files must be at most 63"));
        }
        if self.aplic_m_base & 0x3FFF != 0 || self.aplic_s_base & 0x3FFF != 0 {
            return Err(AiaError::InvalidConfig("APLIC bases must be 16 KiB aligned"));
        }
        let m_align = 1u64 << (12 + self.hart_index_bits());
        let s_align = 1u64 << (12 + self.hart_index_bits() + self.guest_index_bits());
        if self.imsic_m_base % m_align != 0 || self.imsic_s_base % s_align != 0 {
            return Err(AiaError::InvalidConfig(
                "IMSIC bases must be aligned to their interrupt file group",
            ));
        }
        Ok(())
    }

    /// Mask applied to ithreshold writes (bit width of `min_prio`)
    pub fn prio_mask(&self) -> u32 {
        (1u32 << bit_width(self.min_prio)) - 1
    }

    /// log2 of the page stride between one hart's S-level file group and the next
    pub fn guest_index_bits(&self) -> u32 {
        bit_width(self.nr_vs_files)
    }

    /// Bits needed to encode a hart index
    pub fn hart_index_bits(&self) -> u32 {
        bit_width(self.nr_harts.saturating_sub(1))
    }
}

/// Number of bits needed to represent `v` (0 for 0)
pub(crate) fn bit_width(v: u32) -> u32 {
    32 - v.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let cfg = AiaConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.prio_mask(), 7);
        assert_eq!(cfg.guest_index_bits(), 1);
        assert_eq!(cfg.hart_index_bits(), 1);
    }

    #[test]
    fn test_config_rejects_bad_topology() {
        let cfg = AiaConfig {
            nr_sources: 1,
            ..AiaConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(AiaError::InvalidConfig(_))));

        let cfg = AiaConfig {
            imsic_nr_ids: 100,
            ..AiaConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AiaConfig {
            nr_vs_files: 64,
            ..AiaConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AiaConfig {
            imsic_s_base: 0x2800_1000,
            ..AiaConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(6), 3);
        assert_eq!(bit_width(8), 4);
    }
}
