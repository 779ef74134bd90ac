// CLI driver: assemble the given source files and simulate the result.
// Flags are bare words in the SPIM tradition rather than dashed options.

use emips::dump::{self, DumpFormat};
use emips::debugger::Debugger;
use emips::errors::DEFAULT_ERROR_LIMIT;
use emips::instructions::InstructionSet;
use emips::memory::LayoutKind;
use emips::simulator::{RunEvent, Simulator};
use emips::{assemble_files, Machine, Settings};
use std::path::PathBuf;
use std::process::exit;

const USAGE: &str = "usage: emips [options] file.asm [file.asm ...]
options:
  a            assemble only, do not run
  db           enable delayed branching
  be           big-endian memory
  np           forbid extended (pseudo) instructions
  pseudo       permit extended instructions (default)
  ae           treat assembler warnings as errors
  sm           permit self-modifying code
  dbg          run under the interactive debugger
  me N         limit the diagnostic count to N
  mc CONFIG    memory configuration: Default, CompactData, CompactText
  dump SEG FMT FILE
               after assembly dump segment SEG (.text or .data) in format
               FMT (Binary, HexText, AsciiText) to FILE";

const EXIT_ASSEMBLY_FAILED: i32 = 2;
const EXIT_RUNTIME_ERROR: i32 = 1;

struct DumpRequest {
    segment: String,
    format: DumpFormat,
    path: PathBuf,
}

struct CommandLine {
    settings: Settings,
    files: Vec<PathBuf>,
    assemble_only: bool,
    use_debugger: bool,
    dumps: Vec<DumpRequest>,
}

fn parse_args(args: &[String]) -> Result<CommandLine, String> {
    let mut settings = Settings::default();
    let mut files = Vec::new();
    let mut assemble_only = false;
    let mut use_debugger = false;
    let mut dumps = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "a" => assemble_only = true,
            "db" => settings.delayed_branching = true,
            "be" => settings.big_endian = true,
            "np" => settings.extended_pseudo = false,
            "pseudo" => settings.extended_pseudo = true,
            "ae" => settings.warnings_are_errors = true,
            "sm" => settings.self_modifying = true,
            "dbg" => use_debugger = true,
            "me" => {
                i += 1;
                settings.max_errors = args
                    .get(i)
                    .and_then(|a| a.parse().ok())
                    .ok_or("me requires a positive count")?;
                if settings.max_errors == 0 {
                    settings.max_errors = DEFAULT_ERROR_LIMIT;
                }
            }
            "mc" => {
                i += 1;
                settings.layout = match args.get(i).map(|s| s.as_str()) {
                    Some("Default") => LayoutKind::Default,
                    Some("CompactData") => LayoutKind::CompactData,
                    Some("CompactText") => LayoutKind::CompactText,
                    other => {
                        return Err(format!("unknown memory configuration {:?}", other.unwrap_or("")))
                    }
                };
            }
            "dump" => {
                let segment = args.get(i + 1).ok_or("dump requires SEG FMT FILE")?.clone();
                let format = args
                    .get(i + 2)
                    .and_then(|f| DumpFormat::from_name(f))
                    .ok_or("dump format must be Binary, HexText or AsciiText")?;
                let path = PathBuf::from(args.get(i + 3).ok_or("dump requires a file name")?);
                dumps.push(DumpRequest { segment, format, path });
                i += 3;
            }
            name if name.ends_with(".asm") || name.ends_with(".s") => {
                files.push(PathBuf::from(name));
            }
            other => return Err(format!("unrecognized argument \"{}\"", other)),
        }
        i += 1;
    }
    if files.is_empty() {
        return Err("no source files given".to_string());
    }
    Ok(CommandLine { settings, files, assemble_only, use_debugger, dumps })
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(message) => {
            eprintln!("emips: {}\n{}", message, USAGE);
            exit(EXIT_ASSEMBLY_FAILED);
        }
    };
    let set = InstructionSet::new();
    let mut machine = Machine::new(command.settings);
    if let Err(errors) = assemble_files(&mut machine, &set, &command.files) {
        eprint!("{}", errors.report());
        eprintln!(
            "{} error(s), {} warning(s); assembly failed",
            errors.error_count(),
            errors.warning_count()
        );
        exit(EXIT_ASSEMBLY_FAILED);
    }
    for request in &command.dumps {
        // The configured layout, not the assembler, bounds each dump.
        let layout = machine.layout();
        let range = match request.segment.as_str() {
            ".text" => Some((layout.text_base, layout.text_limit)),
            ".data" => Some((layout.data_base, layout.data_limit)),
            _ => None,
        };
        match range {
            Some((first, last)) => {
                let last = machine.memory.written_extent(first, last);
                if let Err(e) =
                    dump::dump_segment(&mut machine.memory, first, last, request.format, &request.path)
                {
                    eprintln!("emips: cannot dump {}: {}", request.path.display(), e);
                }
            }
            None => eprintln!("emips: unknown dump segment {}", request.segment),
        }
    }
    if command.assemble_only {
        exit(0);
    }
    let mut simulator = Simulator::new(&set);
    let event = if command.use_debugger {
        Debugger::new().run(&mut simulator, &mut machine)
    } else {
        simulator.run(&mut machine, -1)
    };
    match event {
        RunEvent::Terminated(code) => exit(code),
        RunEvent::Stopped => exit(0),
        RunEvent::RuntimeError(e) => {
            eprintln!("emips: runtime error: {}", e);
            exit(EXIT_RUNTIME_ERROR);
        }
        RunEvent::Breakpoint(_) | RunEvent::Paused | RunEvent::StepLimit => exit(0),
    }
}
