use crate::aplic::Aplic;
use crate::config::AiaConfig;
use crate::error::{AiaError, Result};
use crate::imsic::Imsic;
use crate::level::PrivLevel;

/// Size of the MMIO window reserved for each APLIC domain
pub const APLIC_WINDOW: u64 = 0x0100_0000;

/// Target of a physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Aplic(PrivLevel, u32),
    Imsic,
    Unmapped,
}

/// System bus joining the APLIC and the per-hart IMSICs
pub struct Aia {
    pub aplic: Aplic,
    pub imsic: Imsic,
    config: AiaConfig,
}

impl Aia {
    pub fn new(config: AiaConfig) -> Result<Self> {
        config.validate().inspect_err(|e| log::debug!("rejecting topology: {}", e))?;
        Ok(Self {
            aplic: Aplic::new(&config),
            imsic: Imsic::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &AiaConfig {
        &self.config
    }

    fn route(&self, addr: u64) -> Route {
        let m = self.config.aplic_m_base;
        let s = self.config.aplic_s_base;
        if (m..m + APLIC_WINDOW).contains(&addr) {
            return Route::Aplic(PrivLevel::Machine, (addr - m) as u32);
        }
        if (s..s + APLIC_WINDOW).contains(&addr) {
            return Route::Aplic(PrivLevel::Supervisor, (addr - s) as u32);
        }
        if self.imsic.locate(addr).is_some() {
            return Route::Imsic;
        }
        Route::Unmapped
    }

    /// 32-bit read; a claimi read claims
    pub fn mmio_read(&mut self, addr: u64) -> Result<u32> {
        match self.route(addr) {
            Route::Aplic(level, off) => self.aplic.read(level, off).map_err(|e| absolute(e, addr)),
            Route::Imsic => self.imsic.mmio_read(addr),
            Route::Unmapped => Err(AiaError::UnmappedAddress(addr)),
        }
    }

    /// 32-bit read without side effects
    pub fn mmio_peek(&self, addr: u64) -> Result<u32> {
        match self.route(addr) {
            Route::Aplic(level, off) => self.aplic.peek(level, off).map_err(|e| absolute(e, addr)),
            Route::Imsic => self.imsic.mmio_read(addr),
            Route::Unmapped => Err(AiaError::UnmappedAddress(addr)),
        }
    }

    pub fn mmio_write(&mut self, addr: u64, data: u32) -> Result<()> {
        let result = match self.route(addr) {
            Route::Aplic(level, off) => self
                .aplic
                .write(level, off, data)
                .map_err(|e| absolute(e, addr)),
            Route::Imsic => self.imsic.mmio_write(addr, data),
            Route::Unmapped => Err(AiaError::UnmappedAddress(addr)),
        };
        self.deliver_msis();
        result
    }

    /// Drive physical source line `id`
    pub fn set_source(&mut self, id: u32, level: bool) {
        self.aplic.set_line(id, level);
        self.deliver_msis();
    }

    /// Raise and lower a source line
    pub fn pulse_source(&mut self, id: u32) {
        self.set_source(id, true);
        self.set_source(id, false);
    }

    fn deliver_msis(&mut self) {
        for msi in self.aplic.take_msis() {
            self.imsic.deliver(msi.addr, msi.data);
        }
    }

    pub fn imsic_csr_read(&self, hart: u32, level: PrivLevel, vgein: u32, sel: u32) -> Result<u64> {
        self.imsic.csr_read(hart, level, vgein, sel)
    }

    pub fn imsic_csr_write(
        &mut self,
        hart: u32,
        level: PrivLevel,
        vgein: u32,
        sel: u32,
        val: u64,
    ) -> Result<()> {
        self.imsic.csr_write(hart, level, vgein, sel, val)
    }

    /// *topei claim on the CSR channel
    pub fn imsic_claim(&mut self, hart: u32, level: PrivLevel, vgein: u32) -> Result<u32> {
        self.imsic.claim(hart, level, vgein)
    }

    /// meip (Machine) or seip (Supervisor) of `hart`
    pub fn external_interrupt(&self, hart: u32, level: PrivLevel) -> bool {
        self.aplic.xeip(level, hart) || self.imsic.xeip(hart, level)
    }

    pub fn hgeip(&self, hart: u32) -> u64 {
        self.imsic.hgeip(hart)
    }
}

/// Report decode failures with the bus address instead of the window offset
fn absolute(err: AiaError, addr: u64) -> AiaError {
    match err {
        AiaError::UnmappedAddress(_) => AiaError::UnmappedAddress(addr),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imsic::{IMSIC_EIDELIVERY, IMSIC_EIE0};

    #[test]
    fn test_route() {
        let aia = Aia::new(AiaConfig::default()).unwrap();
        assert_eq!(
            aia.route(0x0C00_4018),
            Route::Aplic(PrivLevel::Machine, 0x4018)
        );
        assert_eq!(
            aia.route(0x0D00_0000),
            Route::Aplic(PrivLevel::Supervisor, 0)
        );
        assert_eq!(aia.route(0x2400_1000), Route::Imsic);
        assert_eq!(aia.route(0x1000_0000), Route::Unmapped);
    }

    #[test]
    fn test_unmapped_reports_bus_address() {
        let mut aia = Aia::new(AiaConfig::default()).unwrap();
        assert_eq!(
            aia.mmio_read(0x0C00_4040),
            Err(AiaError::UnmappedAddress(0x0C00_4040))
        );
        assert_eq!(
            aia.mmio_write(0x0000_1000, 1),
            Err(AiaError::UnmappedAddress(0x1000))
        );
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let cfg = AiaConfig {
            nr_harts: 0,
            ..AiaConfig::default()
        };
        assert!(matches!(Aia::new(cfg), Err(AiaError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_rejects_empty_source_table() {
        let cfg = AiaConfig {
            nr_sources: 0,
            ..AiaConfig::default()
        };
        assert!(matches!(Aia::new(cfg), Err(AiaError::InvalidConfig(_))));
    }

    #[test]
    fn test_msi_path_raises_seip() {
        let mut aia = Aia::new(AiaConfig::default()).unwrap();
        let s = PrivLevel::Supervisor;
        // Delegate source 4 to S, MSI mode, target hart 0 eiid 14
        aia.mmio_write(0x0C00_0010, 0x400).unwrap();
        aia.mmio_write(0x0D00_0000, 0x104).unwrap();
        aia.mmio_write(0x0D00_0010, 4).unwrap();
        aia.mmio_write(0x0D00_3010, 14).unwrap();
        aia.mmio_write(0x0D00_1EDC, 4).unwrap();
        aia.imsic_csr_write(0, s, 0, IMSIC_EIE0, 1 << 14).unwrap();
        aia.imsic_csr_write(0, s, 0, IMSIC_EIDELIVERY, 1).unwrap();

        aia.set_source(4, true);
        assert!(aia.external_interrupt(0, s));
        assert!(!aia.external_interrupt(0, PrivLevel::Machine));
        assert_eq!(aia.imsic_claim(0, s, 0).unwrap(), (14 << 16) | 14);
        assert!(!aia.external_interrupt(0, s));
    }
}
