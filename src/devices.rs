// Memory-mapped devices. A device owns a window of the MMIO range and
// sees every notified read and write inside it; it may also raise an
// external interrupt, which the simulator picks up at the top of a step.

use std::collections::VecDeque;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    Byte = 1,
    Half = 2,
    Word = 4,
}

pub trait MmioDevice: Send {
    fn read(&mut self, address: u32, size: AccessSize) -> Result<i32, ()>;
    fn write(&mut self, address: u32, value: i32, size: AccessSize) -> Result<(), ()>;
    /// Cause bits to install when this device wants service, or None.
    fn pending_interrupt(&mut self) -> Option<u32> {
        None
    }
}

// Register offsets of the console device, relative to the MMIO base.
pub const RECEIVER_CONTROL: u32 = 0x0;
pub const RECEIVER_DATA: u32 = 0x4;
pub const TRANSMITTER_CONTROL: u32 = 0x8;
pub const TRANSMITTER_DATA: u32 = 0xc;

const READY: i32 = 0x1;
const INTERRUPT_ENABLE: i32 = 0x2;

// Interrupt cause bits (Cause register IP field).
pub const RECEIVER_CAUSE: u32 = 0x100;
pub const TRANSMITTER_CAUSE: u32 = 0x200;

/// The classic memory-mapped console: a one-character receiver fed from a
/// queue and a transmitter that writes straight through to stdout. The
/// ready bit of the receiver is cleared by reading its data register and
/// set again when another character is queued.
pub struct Console {
    base: u32,
    input: VecDeque<u8>,
    receiver_control: i32,
    transmitter_control: i32,
    interrupt_raised: bool,
}

impl Console {
    pub fn new(base: u32) -> Box<Self> {
        Box::new(Console {
            base,
            input: VecDeque::new(),
            receiver_control: 0,
            transmitter_control: READY,
            interrupt_raised: false,
        })
    }

    /// Feed keyboard input. Any thread that owns the machine may call this
    /// between steps; the device raises an interrupt if enabled.
    pub fn queue_input(&mut self, data: &str) {
        self.input.extend(data.bytes());
        if !self.input.is_empty() {
            self.receiver_control |= READY;
            if self.receiver_control & INTERRUPT_ENABLE != 0 {
                self.interrupt_raised = true;
            }
        }
    }
}

impl MmioDevice for Console {
    fn read(&mut self, address: u32, _size: AccessSize) -> Result<i32, ()> {
        match address.wrapping_sub(self.base) {
            RECEIVER_CONTROL => Ok(self.receiver_control),
            RECEIVER_DATA => {
                let value = self.input.pop_front().map(|b| b as i32).unwrap_or(0);
                if self.input.is_empty() {
                    self.receiver_control &= !READY;
                }
                Ok(value)
            }
            TRANSMITTER_CONTROL => Ok(self.transmitter_control),
            TRANSMITTER_DATA => Ok(0),
            _ => Err(()),
        }
    }

    fn write(&mut self, address: u32, value: i32, _size: AccessSize) -> Result<(), ()> {
        match address.wrapping_sub(self.base) {
            RECEIVER_CONTROL => {
                self.receiver_control =
                    (self.receiver_control & READY) | (value & INTERRUPT_ENABLE);
                Ok(())
            }
            TRANSMITTER_CONTROL => {
                self.transmitter_control = READY | (value & INTERRUPT_ENABLE);
                Ok(())
            }
            TRANSMITTER_DATA => {
                let byte = (value & 0xff) as u8;
                let mut out = io::stdout();
                let _ = out.write_all(&[byte]);
                let _ = out.flush();
                Ok(())
            }
            RECEIVER_DATA => Err(()),
            _ => Err(()),
        }
    }

    fn pending_interrupt(&mut self) -> Option<u32> {
        if self.interrupt_raised {
            self.interrupt_raised = false;
            Some(RECEIVER_CAUSE)
        } else {
            None
        }
    }
}
