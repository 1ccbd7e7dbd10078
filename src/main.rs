//! Morava-32 Emulator - CLI Entry Point
//!
//! Commands:
//! - `morava-emu run <image>` - Load a program image and run it
//! - `morava-emu inspect <image>` - Show the entry point and segment table
//! - `morava-emu test` - Run the built-in self-test

use clap::{Parser, Subcommand};
use std::io::Write;

#[derive(Parser)]
#[command(name = "morava-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator for the Morava-32 educational 32-bit computer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program image until it halts or faults
    Run {
        /// Path to the program image
        image: String,
        /// Maximum number of instructions to execute
        #[arg(short, long, default_value = "100000000")]
        max_cycles: u64,
        /// Print each instruction with PC, SP and PSW as it executes
        #[arg(short, long)]
        trace: bool,
        /// Write a JSON snapshot of the machine state on exit
        #[arg(long)]
        dump_state: Option<String>,
    },
    /// Show the entry point and segment table of an image
    Inspect {
        /// Path to the program image
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { image, max_cycles, trace, dump_state } => {
            run_image(&image, max_cycles, trace, dump_state.as_deref());
        }
        Commands::Inspect { image } => {
            inspect_image(&image);
        }
        Commands::Test => {
            run_self_test();
        }
    }
}

fn load_or_exit(path: &str) -> morava::Image {
    match morava::load_image(path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_image(path: &str, max_cycles: u64, trace: bool, dump_state: Option<&str>) {
    use morava::{Cpu, CpuState};

    let image = load_or_exit(path);
    if image.is_empty() {
        eprintln!("❌ Image has no content");
        std::process::exit(1);
    }

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_image(&image) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }
    cpu.irq.start_reader(std::io::stdin());

    let stdout = std::io::stdout();
    let mut fault = None;

    while cpu.is_running() && cpu.cycles < max_cycles {
        let pc = cpu.regs.pc();
        match cpu.step() {
            Ok(instr) => {
                if trace {
                    eprintln!(
                        "{:08x}: {:<28} sp={:08x} psw={}",
                        pc,
                        instr.to_string(),
                        cpu.regs.sp(),
                        cpu.regs.psw
                    );
                }
            }
            Err(e) => {
                fault = Some((pc, e));
                break;
            }
        }

        if !cpu.output.is_empty() {
            let mut out = stdout.lock();
            let _ = out.write_all(&cpu.output);
            let _ = out.flush();
            cpu.output.clear();
        }
    }

    println!();
    println!("━━━ Result ━━━");
    println!("Cycles:  {}", cpu.cycles);
    println!("State:   {:?}", cpu.state);
    println!("PC:      {:#010x}", cpu.regs.pc());
    println!("SP:      {:#010x}", cpu.regs.sp());
    println!("PSW:     {}", cpu.regs.psw);
    println!("Elapsed: {:.3?}", cpu.irq.elapsed());
    for i in 0..13 {
        print!("r{:<2}={:08x} ", i, cpu.regs.get(i));
        if i % 4 == 3 {
            println!();
        }
    }
    println!();

    if let Some(path) = dump_state {
        match serde_json::to_string_pretty(&cpu.snapshot()) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    eprintln!("❌ Failed to write state dump: {}", e);
                }
            }
            Err(e) => eprintln!("❌ Failed to serialize state: {}", e),
        }
    }

    if let Some((pc, e)) = fault {
        eprintln!("❌ CPU fault at PC={:#010x}: {}", pc, e);
        std::process::exit(1);
    }

    if cpu.state == CpuState::Running && cpu.cycles >= max_cycles {
        println!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }
}

fn inspect_image(path: &str) {
    let image = load_or_exit(path);

    println!("entry  {:#010x}", image.entry);
    for segment in &image.segments {
        println!(
            "segment {:#010x}..{:#010x}  {} bytes",
            segment.base,
            segment.base as u64 + segment.bytes.len() as u64,
            segment.bytes.len()
        );
    }
}

fn run_self_test() {
    use morava::cpu::alu;
    use morava::cpu::decode::{encode, Instruction, InstructionWord};
    use morava::cpu::execute::assemble_words;
    use morava::{Cpu, Image, ImageSegment};

    println!("━━━ Morava-32 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;
    let mut check = |name: &str, ok: bool| {
        if ok {
            println!("{}... ✓", name);
            passed += 1;
        } else {
            println!("{}... ✗", name);
            failed += 1;
        }
    };

    let (sum, flags) = alu::add(5, 3);
    check("ALU add", sum == 8 && !flags.c && !flags.o);

    let (_, flags) = alu::add(i32::MAX, 1);
    check("ALU overflow detection", flags.c && flags.o);

    let instr = Instruction::Add { dst: 0, lhs: 1, rhs: 2 };
    let roundtrip = Instruction::decode(InstructionWord::unpack(encode(&instr)));
    check("Codec roundtrip", roundtrip == Ok(instr));

    let mut cpu = Cpu::new();
    let image = Image {
        entry: 0x4000_0000,
        segments: vec![ImageSegment {
            base: 0x4000_0000,
            bytes: assemble_words(&[Instruction::Halt]),
        }],
    };
    let ok = cpu.load_image(&image).is_ok() && cpu.run().is_ok() && cpu.is_halted();
    check("CPU halt", ok);

    let mut cpu = Cpu::new();
    let image = Image {
        entry: 0x4000_0000,
        segments: vec![ImageSegment {
            base: 0x4000_0000,
            bytes: assemble_words(&[
                Instruction::LdReg { dst: 1, src: 1, disp: 5 },
                Instruction::LdReg { dst: 2, src: 2, disp: 3 },
                Instruction::Add { dst: 0, lhs: 1, rhs: 2 },
                Instruction::Halt,
            ]),
        }],
    };
    let ok = cpu.load_image(&image).is_ok() && cpu.run().is_ok() && cpu.regs.get(0) == 8;
    check("CPU arithmetic", ok);

    let cpu = Cpu::new();
    check("Unmapped access faults", cpu.mem.read_word(0x1234).is_err());

    println!();
    println!("Results: {} passed, {} failed", passed, failed);
    if failed > 0 {
        std::process::exit(1);
    }
    println!("✓ All tests passed!");
}
