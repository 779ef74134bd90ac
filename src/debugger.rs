// Interactive terminal debugger for the CLI. Draws a register panel and
// the statement listing around PC, and drives the simulator one step at
// a time, with breakpoints, watched memory cells and reverse stepping.

use crate::simulator::{RunEvent, Simulator};
use crate::Machine;
use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};
use termion::{clear, color, cursor};

const LISTING_LINES: usize = 12;

#[derive(PartialEq, Clone)]
enum DebugCommand {
    Quit,
    Step,
    Continue,
    Back,
    SetBreakpoint(Option<String>),
    DeleteBreakpoint(Option<String>),
    Watch(Option<String>),
    Unwatch(Option<String>),
}

pub struct Debugger {
    last_command: DebugCommand,
    watches: HashSet<u32>,
}

impl Debugger {
    pub fn new() -> Self {
        Debugger { last_command: DebugCommand::Step, watches: HashSet::new() }
    }

    /// Drive the machine under user control until quit or termination.
    pub fn run(&mut self, sim: &mut Simulator, machine: &mut Machine) -> RunEvent {
        loop {
            self.draw(sim, machine);
            match self.read_command() {
                DebugCommand::Quit => return RunEvent::Stopped,
                DebugCommand::Step => {
                    self.last_command = DebugCommand::Step;
                    match sim.run(machine, 1) {
                        RunEvent::StepLimit | RunEvent::Breakpoint(_) | RunEvent::Paused => {}
                        done => return self.finish(done),
                    }
                }
                DebugCommand::Continue => match sim.run(machine, -1) {
                    RunEvent::Breakpoint(a) => {
                        println!("breakpoint at 0x{:08x}", a);
                    }
                    RunEvent::StepLimit | RunEvent::Paused => {}
                    done => return self.finish(done),
                },
                DebugCommand::Back => {
                    if !sim.step_back(machine) {
                        println!("nothing to undo");
                    }
                }
                DebugCommand::SetBreakpoint(arg) => match parse_address(&arg) {
                    Some(a) => {
                        sim.breakpoints.insert(a);
                    }
                    None => println!("invalid address"),
                },
                DebugCommand::DeleteBreakpoint(arg) => match parse_address(&arg) {
                    Some(a) => {
                        sim.breakpoints.remove(&a);
                    }
                    None => println!("invalid address"),
                },
                DebugCommand::Watch(arg) => match parse_address(&arg) {
                    Some(a) => {
                        self.watches.insert(a);
                    }
                    None => println!("invalid address"),
                },
                DebugCommand::Unwatch(arg) => match parse_address(&arg) {
                    Some(a) => {
                        self.watches.remove(&a);
                    }
                    None => println!("invalid address"),
                },
            }
        }
    }

    fn finish(&self, event: RunEvent) -> RunEvent {
        match &event {
            RunEvent::Terminated(code) => println!("\nprogram terminated (exit code {})", code),
            RunEvent::RuntimeError(e) => println!("\nruntime error: {}", e),
            RunEvent::Stopped => println!("\nstopped"),
            _ => {}
        }
        event
    }

    fn read_command(&mut self) -> DebugCommand {
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return DebugCommand::Quit;
        }
        let mut parts = input.split_whitespace();
        match parts.next() {
            Some("q") => DebugCommand::Quit,
            Some("s") | Some("n") => DebugCommand::Step,
            Some("c") => DebugCommand::Continue,
            Some("u") => DebugCommand::Back,
            Some("b") => DebugCommand::SetBreakpoint(parts.next().map(String::from)),
            Some("d") => DebugCommand::DeleteBreakpoint(parts.next().map(String::from)),
            Some("w") => DebugCommand::Watch(parts.next().map(String::from)),
            Some("x") => DebugCommand::Unwatch(parts.next().map(String::from)),
            _ => self.last_command.clone(),
        }
    }

    fn draw(&self, sim: &Simulator, machine: &mut Machine) {
        print!("{}{}", clear::All, cursor::Goto(1, 1));
        print!("{}", RegisterPanel(machine));
        self.draw_listing(sim, machine);
        if !self.watches.is_empty() {
            println!("\nwatched memory:");
            let mut watches: Vec<u32> = self.watches.iter().copied().collect();
            watches.sort_unstable();
            for address in watches {
                match machine.memory.get_word(address, false) {
                    Ok(value) => println!("  0x{:08x}: 0x{:08x}", address, value as u32),
                    Err(_) => println!("  0x{:08x}: <unmapped>", address),
                }
            }
        }
        println!(
            "\nn step, c continue, u undo step, b/d <hexaddr> breakpoint, w/x <hexaddr> watch, q quit"
        );
        print!("> ");
        let _ = io::stdout().flush();
    }

    fn draw_listing(&self, sim: &Simulator, machine: &Machine) {
        println!("\n  address     code        source");
        let pc = machine.registers.pc;
        let start = pc.saturating_sub(8);
        for i in 0..LISTING_LINES {
            let address = start.wrapping_add(4 * i as u32);
            let statement = match machine.memory.statement_at(address) {
                Some(s) => s,
                None => continue,
            };
            let marker = if sim.breakpoints.contains(&address) {
                format!("{}*{}", color::Fg(color::Red), color::Fg(color::Reset))
            } else {
                " ".to_string()
            };
            if address == pc {
                println!(
                    "{}{}>{}{}",
                    marker,
                    color::Fg(color::Green),
                    statement,
                    color::Fg(color::Reset)
                );
            } else {
                println!("{}  {}", marker, statement);
            }
        }
    }
}

/// Register grid: four columns of name/value pairs plus PC, HI and LO.
struct RegisterPanel<'m>(&'m Machine);

impl<'m> fmt::Display for RegisterPanel<'m> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = crate::tokens::GPR_NAMES;
        for row in 0..8 {
            for col in 0..4 {
                let n = col * 8 + row;
                write!(f, "{:>5} {:08x}   ", names[n], self.0.registers.get(n as u32) as u32)?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "   pc {:08x}    hi {:08x}    lo {:08x}",
            self.0.registers.pc,
            self.0.registers.hi() as u32,
            self.0.registers.lo() as u32
        )
    }
}

fn parse_address(argument: &Option<String>) -> Option<u32> {
    let text = argument.as_ref()?;
    let text = text.strip_prefix("0x").unwrap_or(text);
    u32::from_str_radix(text, 16).ok()
}
