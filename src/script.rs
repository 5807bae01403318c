//! Line-oriented event scripts driving an [`Aia`].
//!
//! One command per line, `#` starts a comment, numbers are decimal or `0x` hex:
//!
//! ```text
//! write ADDR DATA
//! read ADDR                        # claiming read
//! peek ADDR                        # read without side effects
//! expect ADDR VALUE                # claiming read, must equal VALUE
//! line ID 0|1
//! pulse ID
//! csr-write HART m|s GUEST SEL DATA
//! csr-read HART m|s GUEST SEL
//! claim HART m|s GUEST
//! eip HART m|s
//! ```

use std::io::{self, Write};

use thiserror::Error;

use crate::aia::Aia;
use crate::error::AiaError;
use crate::level::PrivLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Write { addr: u64, data: u32 },
    Read { addr: u64 },
    Peek { addr: u64 },
    Expect { addr: u64, value: u32 },
    Line { id: u32, level: bool },
    Pulse { id: u32 },
    CsrWrite {
        hart: u32,
        level: PrivLevel,
        guest: u32,
        sel: u32,
        data: u64,
    },
    CsrRead {
        hart: u32,
        level: PrivLevel,
        guest: u32,
        sel: u32,
    },
    Claim {
        hart: u32,
        level: PrivLevel,
        guest: u32,
    },
    Eip { hart: u32, level: PrivLevel },
}

/// A command and the script line it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub line: usize,
    pub command: Command,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("line {line}: {addr:#x} read {actual:#010x}, expected {expected:#010x}")]
    Mismatch {
        line: usize,
        addr: u64,
        expected: u32,
        actual: u32,
    },
    #[error("line {line}: {source}")]
    Aia {
        line: usize,
        #[source]
        source: AiaError,
    },
    #[error("output: {0}")]
    Io(#[from] io::Error),
}

fn parse_num(tok: &str) -> Option<u64> {
    match tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => tok.replace('_', "").parse().ok(),
    }
}

fn parse_level(tok: &str) -> Option<PrivLevel> {
    match tok {
        "m" | "M" => Some(PrivLevel::Machine),
        "s" | "S" => Some(PrivLevel::Supervisor),
        other => other.parse().ok().and_then(PrivLevel::from_bits),
    }
}

/// Parse one line; None for blank and comment-only lines
fn parse_line(text: &str) -> std::result::Result<Option<Command>, String> {
    let text = text.split('#').next().unwrap_or("");
    let toks: Vec<&str> = text.split_whitespace().collect();
    let Some((&op, args)) = toks.split_first() else {
        return Ok(None);
    };

    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{} takes {} arguments, got {}", op, n, args.len()))
        }
    };
    let num = |i: usize| parse_num(args[i]).ok_or_else(|| format!("bad number '{}'", args[i]));
    let num32 = |i: usize| {
        num(i).and_then(|v| u32::try_from(v).map_err(|_| format!("'{}' exceeds 32 bits", args[i])))
    };
    let level = |i: usize| parse_level(args[i]).ok_or_else(|| format!("bad level '{}'", args[i]));

    let command = match op {
        "write" => {
            arity(2)?;
            Command::Write {
                addr: num(0)?,
                data: num32(1)?,
            }
        }
        "read" => {
            arity(1)?;
            Command::Read { addr: num(0)? }
        }
        "peek" => {
            arity(1)?;
            Command::Peek { addr: num(0)? }
        }
        "expect" => {
            arity(2)?;
            Command::Expect {
                addr: num(0)?,
                value: num32(1)?,
            }
        }
        "line" => {
            arity(2)?;
            Command::Line {
                id: num32(0)?,
                level: num(1)? != 0,
            }
        }
        "pulse" => {
            arity(1)?;
            Command::Pulse { id: num32(0)? }
        }
        "csr-write" => {
            arity(5)?;
            Command::CsrWrite {
                hart: num32(0)?,
                level: level(1)?,
                guest: num32(2)?,
                sel: num32(3)?,
                data: num(4)?,
            }
        }
        "csr-read" => {
            arity(4)?;
            Command::CsrRead {
                hart: num32(0)?,
                level: level(1)?,
                guest: num32(2)?,
                sel: num32(3)?,
            }
        }
        "claim" => {
            arity(3)?;
            Command::Claim {
                hart: num32(0)?,
                level: level(1)?,
                guest: num32(2)?,
            }
        }
        "eip" => {
            arity(2)?;
            Command::Eip {
                hart: num32(0)?,
                level: level(1)?,
            }
        }
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(command))
}

pub fn parse(text: &str) -> Result<Vec<Step>, ScriptError> {
    let mut steps = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        if let Some(command) = parse_line(raw).map_err(|msg| ScriptError::Parse { line, msg })? {
            steps.push(Step { line, command });
        }
    }
    Ok(steps)
}

/// Apply `steps` in order, printing every read result to `out`
pub fn run<W: Write>(aia: &mut Aia, steps: &[Step], out: &mut W) -> Result<(), ScriptError> {
    for step in steps {
        let line = step.line;
        let wrap = |source| ScriptError::Aia { line, source };
        log::debug!("line {}: {:?}", line, step.command);
        match step.command {
            Command::Write { addr, data } => aia.mmio_write(addr, data).map_err(wrap)?,
            Command::Read { addr } => {
                let val = aia.mmio_read(addr).map_err(wrap)?;
                writeln!(out, "{:#010x}", val)?;
            }
            Command::Peek { addr } => {
                let val = aia.mmio_peek(addr).map_err(wrap)?;
                writeln!(out, "{:#010x}", val)?;
            }
            Command::Expect { addr, value } => {
                let actual = aia.mmio_read(addr).map_err(wrap)?;
                if actual != value {
                    return Err(ScriptError::Mismatch {
                        line,
                        addr,
                        expected: value,
                        actual,
                    });
                }
                writeln!(out, "{:#010x}", actual)?;
            }
            Command::Line { id, level } => aia.set_source(id, level),
            Command::Pulse { id } => aia.pulse_source(id),
            Command::CsrWrite {
                hart,
                level,
                guest,
                sel,
                data,
            } => aia
                .imsic_csr_write(hart, level, guest, sel, data)
                .map_err(wrap)?,
            Command::CsrRead {
                hart,
                level,
                guest,
                sel,
            } => {
                let val = aia.imsic_csr_read(hart, level, guest, sel).map_err(wrap)?;
                writeln!(out, "{:#x}", val)?;
            }
            Command::Claim { hart, level, guest } => {
                let val = aia.imsic_claim(hart, level, guest).map_err(wrap)?;
                writeln!(out, "{:#010x}", val)?;
            }
            Command::Eip { hart, level } => {
                writeln!(out, "{}", aia.external_interrupt(hart, level) as u8)?;
            }
        }
    }
    Ok(())
}
