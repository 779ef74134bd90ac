// Syscall services, selected by the number in $v0. Host-side resources
// (open file descriptors, seeded random streams) live in SystemIo, which
// the machine owns and closes on reset.

use crate::errors::{ExceptionCause, SimException};
use crate::instructions::{ExecInterrupt, ExecResult};
use crate::registers::{A0, A1, A2, V0};
use crate::Machine;
use chrono::Utc;
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Read, Write};
use std::thread;
use std::time::Duration;

enum FileHandle {
    Reader(io::BufReader<File>),
    Writer(File),
}

/// Host I/O owned by the machine: descriptors 0..2 are process stdio,
/// 3 and up are files opened by syscall 13.
pub struct SystemIo {
    files: HashMap<i32, FileHandle>,
    next_fd: i32,
    randoms: HashMap<i32, StdRng>,
}

impl SystemIo {
    pub fn new() -> Self {
        SystemIo { files: HashMap::new(), next_fd: 3, randoms: HashMap::new() }
    }

    /// Close every user descriptor. Called on machine reset; stdio stays.
    pub fn reset_files(&mut self) {
        self.files.clear();
        self.next_fd = 3;
    }

    pub fn open(&mut self, path: &str, flags: i32) -> i32 {
        let handle = match flags {
            0 => File::open(path).map(|f| FileHandle::Reader(io::BufReader::new(f))),
            1 => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map(FileHandle::Writer),
            9 => OpenOptions::new()
                .write(true)
                .create(true)
                .append(true)
                .open(path)
                .map(FileHandle::Writer),
            _ => return -1,
        };
        match handle {
            Ok(h) => {
                let fd = self.next_fd;
                self.next_fd += 1;
                self.files.insert(fd, h);
                fd
            }
            Err(_) => -1,
        }
    }

    pub fn read(&mut self, fd: i32, buffer: &mut [u8]) -> i32 {
        match fd {
            0 => match io::stdin().lock().read(buffer) {
                Ok(n) => n as i32,
                Err(_) => -1,
            },
            _ => match self.files.get_mut(&fd) {
                Some(FileHandle::Reader(r)) => match r.read(buffer) {
                    Ok(n) => n as i32,
                    Err(_) => -1,
                },
                _ => -1,
            },
        }
    }

    pub fn write(&mut self, fd: i32, buffer: &[u8]) -> i32 {
        match fd {
            1 => {
                let mut out = io::stdout();
                match out.write_all(buffer).and_then(|_| out.flush()) {
                    Ok(_) => buffer.len() as i32,
                    Err(_) => -1,
                }
            }
            2 => match io::stderr().write_all(buffer) {
                Ok(_) => buffer.len() as i32,
                Err(_) => -1,
            },
            _ => match self.files.get_mut(&fd) {
                Some(FileHandle::Writer(f)) => match f.write_all(buffer) {
                    Ok(_) => buffer.len() as i32,
                    Err(_) => -1,
                },
                _ => -1,
            },
        }
    }

    pub fn close(&mut self, fd: i32) {
        if fd > 2 {
            self.files.remove(&fd);
        }
    }

    fn random(&mut self, id: i32) -> &mut StdRng {
        self.randoms.entry(id).or_insert_with(StdRng::from_entropy)
    }

    pub fn seed_random(&mut self, id: i32, seed: i32) {
        self.randoms.insert(id, StdRng::seed_from_u64(seed as u32 as u64));
    }
}

fn print(text: &str) {
    let mut out = io::stdout();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

fn read_stdin_line() -> String {
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
    line
}

fn syscall_error(message: impl Into<String>) -> ExecInterrupt {
    SimException::new(ExceptionCause::Syscall, message).into()
}

/// Dispatch the service selected by $v0. Runs on the simulator worker;
/// blocking reads block the worker, matching the reference behavior.
pub fn process(m: &mut Machine) -> ExecResult {
    let service = m.gpr(V0 as i32);
    match service {
        1 => print(&m.gpr(A0 as i32).to_string()),
        2 => {
            let value = m.fpr_single(12);
            print(&format!("{}", value));
        }
        3 => {
            let value = m.fpr_double(12)?;
            print(&format!("{}", value));
        }
        4 => {
            let address = m.gpr(A0 as i32) as u32;
            let text = m.memory.get_string(address).map_err(SimException::from)?;
            print(&text);
        }
        5 => {
            let line = read_stdin_line();
            match crate::bits::parse_int(line.trim()) {
                Some(value) => m.set_gpr(V0 as i32, value),
                None => return Err(syscall_error(format!("invalid integer input: {:?}", line.trim()))),
            }
        }
        6 => {
            let line = read_stdin_line();
            match line.trim().parse::<f32>() {
                Ok(value) => m.set_fpr_single(0, value),
                Err(_) => return Err(syscall_error("invalid float input")),
            }
        }
        7 => {
            let line = read_stdin_line();
            match line.trim().parse::<f64>() {
                Ok(value) => m.set_fpr_double(0, value)?,
                Err(_) => return Err(syscall_error("invalid double input")),
            }
        }
        8 => {
            let buffer = m.gpr(A0 as i32) as u32;
            let max = m.gpr(A1 as i32);
            if max > 0 {
                let line = read_stdin_line();
                let bytes: Vec<u8> = line.bytes().take(max as usize - 1).collect();
                let mut address = buffer;
                for byte in &bytes {
                    m.store_byte_checked(address, *byte as i32)?;
                    address += 1;
                }
                m.store_byte_checked(address, 0)?;
            }
        }
        9 => {
            let bytes = m.gpr(A0 as i32).max(0) as u32;
            let address = crate::memory::align_to_next(m.heap_cursor, 4);
            m.heap_cursor = address + bytes;
            m.set_gpr(V0 as i32, address as i32);
        }
        10 => return Err(ExecInterrupt::Halt(0)),
        11 => {
            let byte = (m.gpr(A0 as i32) & 0xff) as u8;
            let mut out = io::stdout();
            let _ = out.write_all(&[byte]);
            let _ = out.flush();
        }
        12 => {
            let mut buffer = [0u8; 1];
            let n = io::stdin().lock().read(&mut buffer).unwrap_or(0);
            m.set_gpr(V0 as i32, if n == 0 { -1 } else { buffer[0] as i32 });
        }
        13 => {
            let path = m
                .memory
                .get_string(m.gpr(A0 as i32) as u32)
                .map_err(SimException::from)?;
            let flags = m.gpr(A1 as i32);
            let fd = m.io.open(&path, flags);
            m.set_gpr(V0 as i32, fd);
        }
        14 => {
            let fd = m.gpr(A0 as i32);
            let buffer = m.gpr(A1 as i32) as u32;
            let length = m.gpr(A2 as i32).max(0) as usize;
            let mut data = vec![0u8; length];
            let count = m.io.read(fd, &mut data);
            for (i, byte) in data.iter().take(count.max(0) as usize).enumerate() {
                m.store_byte_checked(buffer + i as u32, *byte as i32)?;
            }
            m.set_gpr(V0 as i32, count);
        }
        15 => {
            let fd = m.gpr(A0 as i32);
            let buffer = m.gpr(A1 as i32) as u32;
            let length = m.gpr(A2 as i32).max(0) as usize;
            let mut data = Vec::with_capacity(length);
            for i in 0..length {
                data.push(m.load_byte(buffer + i as u32)? as u8);
            }
            let count = m.io.write(fd, &data);
            m.set_gpr(V0 as i32, count);
        }
        16 => {
            let fd = m.gpr(A0 as i32);
            m.io.close(fd);
        }
        17 => return Err(ExecInterrupt::Halt(m.gpr(A0 as i32))),
        30 => {
            let millis = Utc::now().timestamp_millis();
            let (hi, lo) = crate::bits::long_to_words(millis);
            m.set_gpr(A0 as i32, lo);
            m.set_gpr(A1 as i32, hi);
        }
        32 => {
            let millis = m.gpr(A0 as i32).max(0) as u64;
            thread::sleep(Duration::from_millis(millis));
        }
        34 => print(&format!("0x{:08x}", m.gpr(A0 as i32) as u32)),
        35 => print(&format!("{:032b}", m.gpr(A0 as i32) as u32)),
        36 => print(&(m.gpr(A0 as i32) as u32).to_string()),
        40 => {
            let id = m.gpr(A0 as i32);
            let seed = m.gpr(A1 as i32);
            m.io.seed_random(id, seed);
        }
        41 => {
            let id = m.gpr(A0 as i32);
            let value = m.io.random(id).next_u32() as i32;
            m.set_gpr(A0 as i32, value);
        }
        42 => {
            let id = m.gpr(A0 as i32);
            let bound = m.gpr(A1 as i32);
            if bound <= 0 {
                return Err(syscall_error("random range upper bound must be positive"));
            }
            let value = m.io.random(id).gen_range(0..bound);
            m.set_gpr(A0 as i32, value);
        }
        43 => {
            let id = m.gpr(A0 as i32);
            let value: f64 = m.io.random(id).gen();
            m.set_fpr_double(0, value)?;
        }
        _ => {
            warn!("unknown syscall service {}", service);
            return Err(syscall_error(format!("unknown syscall service {}", service)));
        }
    }
    Ok(())
}
