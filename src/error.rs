//! Error type shared by every fallible operation of the model.

use thiserror::Error;

use crate::level::PrivLevel;

/// Errors surfaced to the register-bus / CSR-channel caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiaError {
    /// Topology parameters out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Address does not decode to any register
    #[error("unmapped address {0:#x}")]
    UnmappedAddress(u64),
    /// Hart index beyond the instantiated harts
    #[error("hart {hart} out of range (harts: {nr_harts})")]
    InvalidHart { hart: u32, nr_harts: u32 },
    /// Priority numerically larger than the lowest implemented priority
    #[error("priority {prio} out of range (lowest: {min_prio})")]
    InvalidPriority { prio: u32, min_prio: u32 },
    /// Guest index beyond the implemented VS files
    #[error("guest {guest} out of range (VS files: {nr_vs_files})")]
    InvalidGuest { guest: u32, nr_vs_files: u32 },
    /// Guest index requested for a machine-level target
    #[error("guest index only valid for S level")]
    GuestOnMachineLevel,
    /// External interrupt identity beyond the IMSIC files
    #[error("interrupt identity {eiid} out of range (ids: {nr_ids})")]
    InvalidIdentity { eiid: u32, nr_ids: u32 },
    /// Reserved source mode encoding
    #[error("reserved source mode {0}")]
    InvalidSourceMode(u32),
    /// Delegation to a child domain that does not exist
    #[error("source {id} delegated to missing child {child}")]
    InvalidChildIndex { id: u32, child: u32 },
    /// S-domain source activated without the M domain delegating it
    #[error("source {id} is not delegated to the S domain")]
    NotDelegated { id: u32 },
    /// M-domain source taken back while the S domain still drives it
    #[error("source {id} is still active in the S domain")]
    DelegationOverlap { id: u32 },
    /// Illegal access through the IMSIC CSR channel
    #[error("illegal IMSIC access: {level:?} file, guest {guest}, select {select:#x}")]
    IllegalImsicAccess {
        level: PrivLevel,
        guest: u32,
        select: u32,
    },
}

pub type Result<T> = std::result::Result<T, AiaError>;
