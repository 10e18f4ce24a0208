#![forbid(unsafe_code)]

// Native-only runner. The wasm32 stub keeps `--target wasm32-unknown-unknown --workspace` builds
// working.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::{self, BufWriter, Write};
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use anyhow::{bail, Context, Result};
    use clap::Parser;
    use tracing::info;
    use tracing_subscriber::EnvFilter;
    use x86pc_cpu_core::decoder::SegReg;
    use x86pc_cpu_core::CpuState;
    use x86pc_machine::{
        DebugCon, FaultPolicy, Machine, MachineConfig, RunExit, DEBUGCON_PORT,
    };

    const SLICE_INST_BUDGET: u64 = 100_000;

    #[derive(Debug, Parser)]
    #[command(about = "Boot a BIOS image on the x86pc machine model")]
    pub struct Args {
        /// System BIOS image, placed so that it ends at 0xFFFFF.
        #[arg(long)]
        bios: PathBuf,

        /// Optional video BIOS option ROM, placed at 0xC0000.
        #[arg(long)]
        vga_bios: Option<PathBuf>,

        /// Guest RAM size in MiB.
        #[arg(long, default_value_t = 16)]
        memory_mib: usize,

        /// Stop after at most N cycles. Without it the run lasts until the guest halts or faults.
        #[arg(long)]
        max_insts: Option<u64>,

        /// Deliver CPU faults to the guest's interrupt handlers instead of stopping.
        #[arg(long)]
        deliver_faults: bool,

        /// Stop before executing the instruction at this linear address (hex with `0x`, or
        /// decimal). May be repeated.
        #[arg(long = "break", value_parser = parse_addr)]
        breakpoints: Vec<u32>,

        /// Where to write DebugCon output (I/O port `0xE9`): `stdout`, `none`, or a file path.
        #[arg(long, default_value = "stdout")]
        debugcon_out: String,
    }

    enum LoopControl {
        Continue,
        Break,
    }

    pub fn main() -> Result<()> {
        let args = Args::parse();

        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(io::stderr)
            .init();

        let memory_size = args
            .memory_mib
            .checked_mul(1024 * 1024)
            .context("memory size overflow")?;
        let cfg = MachineConfig {
            memory_size,
            fault_policy: if args.deliver_faults {
                FaultPolicy::DeliverToGuest
            } else {
                FaultPolicy::Stop
            },
            ..MachineConfig::default()
        };
        let mut machine = Machine::new(cfg).context("failed to create machine")?;

        let bios = read_image(&args.bios)?;
        machine
            .load_bios(&bios)
            .with_context(|| format!("failed to load BIOS {}", args.bios.display()))?;
        if let Some(path) = &args.vga_bios {
            let image = read_image(path)?;
            machine
                .load_vga_bios(&image)
                .with_context(|| format!("failed to load VGA BIOS {}", path.display()))?;
        }
        for &addr in &args.breakpoints {
            machine.add_breakpoint(addr);
        }

        let debugcon = DebugCon::shared();
        machine
            .io_mut()
            .register_ports(&[DEBUGCON_PORT], debugcon.clone());
        let mut debugcon_sink = open_optional_sink(&args.debugcon_out)?;

        info!(
            bios = %args.bios.display(),
            memory_mib = args.memory_mib,
            "starting machine"
        );

        let budget = args.max_insts.unwrap_or(u64::MAX);
        let mut total_executed: u64 = 0;
        loop {
            if total_executed >= budget {
                eprintln!("instruction budget exhausted after {total_executed} cycles");
                break;
            }
            let exit = machine.run((budget - total_executed).min(SLICE_INST_BUDGET));
            total_executed = total_executed.saturating_add(exit.executed());

            if let Some(out) = debugcon_sink.as_mut() {
                stream_debugcon(&debugcon, out)?;
            }
            match handle_exit(&machine, exit, total_executed)? {
                LoopControl::Continue => continue,
                LoopControl::Break => break,
            }
        }

        if let Some(out) = debugcon_sink.as_mut() {
            stream_debugcon(&debugcon, out)?;
            out.flush()?;
        }
        Ok(())
    }

    fn read_image(path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
    }

    fn open_optional_sink(dest: &str) -> Result<Option<Box<dyn Write>>> {
        match dest {
            "none" => Ok(None),
            "stdout" => Ok(Some(Box::new(io::stdout()))),
            path => {
                let file = File::create(path)
                    .with_context(|| format!("failed to create output file: {path}"))?;
                Ok(Some(Box::new(BufWriter::new(file))))
            }
        }
    }

    fn stream_debugcon(debugcon: &Rc<RefCell<DebugCon>>, out: &mut dyn Write) -> Result<()> {
        let bytes = debugcon.borrow_mut().take_output();
        if !bytes.is_empty() {
            out.write_all(&bytes)?;
        }
        Ok(())
    }

    fn handle_exit(machine: &Machine, exit: RunExit, total_executed: u64) -> Result<LoopControl> {
        match exit {
            RunExit::Completed { .. } => Ok(LoopControl::Continue),
            RunExit::Halted { .. } => {
                eprintln!("guest halted after {total_executed} cycles");
                Ok(LoopControl::Break)
            }
            RunExit::Stopped { .. } => {
                eprintln!("machine stopped after {total_executed} cycles");
                Ok(LoopControl::Break)
            }
            RunExit::Breakpoint { addr, .. } => {
                eprintln!("breakpoint at {addr:#07x} after {total_executed} cycles");
                eprintln!("{}", format_registers(machine.cpu()));
                Ok(LoopControl::Break)
            }
            RunExit::Exception { exception, .. } => {
                eprintln!("{}", format_registers(machine.cpu()));
                bail!("execution stopped after {total_executed} cycles: {exception}")
            }
        }
    }

    fn parse_addr(s: &str) -> Result<u32, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
    }

    fn format_registers(cpu: &CpuState) -> String {
        format!(
            "EAX={:08x} EBX={:08x} ECX={:08x} EDX={:08x}\n\
             ESI={:08x} EDI={:08x} EBP={:08x} ESP={:08x}\n\
             CS={:04x} DS={:04x} ES={:04x} SS={:04x} EIP={:08x} EFLAGS={:08x} CR0={:08x}",
            cpu.eax(),
            cpu.ebx(),
            cpu.ecx(),
            cpu.edx(),
            cpu.esi(),
            cpu.edi(),
            cpu.ebp(),
            cpu.esp(),
            cpu.selector(SegReg::Cs),
            cpu.selector(SegReg::Ds),
            cpu.selector(SegReg::Es),
            cpu.selector(SegReg::Ss),
            cpu.eip(),
            cpu.flags.to_image(),
            cpu.cr[0],
        )
    }

}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
