/// Privilege level served by an APLIC domain or an IMSIC interrupt file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrivLevel {
    Machine,
    Supervisor,
}

impl PrivLevel {
    /// Decode the privilege encoding used on the IMSIC CSR channel (M=3, S=1)
    pub fn from_bits(v: u32) -> Option<Self> {
        match v {
            3 => Some(Self::Machine),
            1 => Some(Self::Supervisor),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Machine => 3,
            Self::Supervisor => 1,
        }
    }
}
